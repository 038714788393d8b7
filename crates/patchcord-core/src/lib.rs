//! Patchcord Core - live MIDI rule routing and pattern players.
//!
//! This crate provides the building blocks of a patch-driven MIDI rig:
//!
//! - **Events** - Voice and transport events, raw MIDI parsing
//! - **Routes** - Range matching and affine/log value mappings
//! - **Compiler** - Rule text and rule specs to [`Rule`] values
//! - **Router** - Rule matching, transforms and side effects
//! - **Players** - Sequence, arpeggio, loop recorder and file player
//! - **Engine** - The [`SoundEngine`] seam and an offline [`RecordingEngine`]
//! - **Session** - One entry point tying the above together
//!
//! # Architecture
//!
//! Incoming events go through [`Session::handle_event`]. The original is
//! passed to the engine (and its native routing table); the router then
//! matches its own rules in insertion order and injects each transformed
//! event directly. Players schedule their events on the engine clock and
//! are called back a few ticks ahead of every step.
//!
//! ```
//! use patchcord_core::{Event, RuleScope, Session};
//!
//! let mut session = Session::offline();
//! session.add_rule("cc:1/7=cc:1/7/0-100", RuleScope::Patch).unwrap();
//! session.handle_event(&Event::cc(1, 7, 127.0));
//! ```

pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod patch;
pub mod players;
pub mod route;
pub mod router;
pub mod rule;
pub mod session;
pub mod timing;

pub use compiler::{parse_note_name, RuleCompiler, RuleSpec, SpecValue};
pub use config::{Config, RouterConfig, SequencerConfig};
pub use engine::{PlayerId, RecordingEngine, SoundEngine};
pub use error::{CompileError, Error, Result};
pub use events::{Event, EventKind};
pub use patch::{Bank, Patch};
pub use players::{
    ArpStyle, Arpeggio, ArpeggioDef, MidiFile, MidiFileDef, MidiLoop, MidiLoopDef, Player,
    PlayerDef, PlayerDirectory, Sequence, SequenceDef, Step,
};
pub use route::Route;
pub use router::EventRouter;
pub use rule::{Rule, RuleEffect, RuleScope, Transformed};
pub use session::Session;
pub use timing::{StepTiming, TickClock, TimeSignature};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_signature_beats_per_bar() {
        let sig_4_4 = TimeSignature::new(4, 4);
        assert!((sig_4_4.beats_per_bar() - 4.0).abs() < 0.001);

        let sig_6_8 = TimeSignature::new(6, 8);
        assert!((sig_6_8.beats_per_bar() - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_note_names() {
        assert_eq!(parse_note_name("C-1"), Some(0));
        assert_eq!(parse_note_name("C4"), Some(60));
        assert_eq!(parse_note_name("Db-1"), Some(1));
        assert_eq!(parse_note_name("-C4"), Some(-60));
    }

    #[test]
    fn test_offline_session_passes_events_through() {
        let mut session = Session::offline();
        assert_eq!(session.handle_event(&Event::note(1, 60, 100.0)), 0);
        assert_eq!(session.engine().sent().len(), 1);
        assert!(session.engine().sent()[0].route);
    }
}

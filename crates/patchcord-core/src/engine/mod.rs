//! The sound engine seam.
//!
//! Everything that makes noise, keeps time or owns a file player sits
//! behind [`SoundEngine`]. The router and the players only ever talk to
//! `&mut dyn SoundEngine`, so a synthesizer binding and the offline
//! [`RecordingEngine`] are interchangeable.

mod recording;

use std::fmt;
use std::path::Path;

pub use recording::{Due, FileTransport, RecordingEngine, SentEvent};

use crate::events::Event;
use crate::rule::Rule;
use crate::timing::DEFAULT_TICKS_PER_SECOND;

/// Ticks per beat reported by a file player that does not know better.
pub const DEFAULT_FILE_TICKS_PER_BEAT: u32 = 480;

/// Identifies a player when it talks to the engine timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

/// Operations consumed from the synthesizer and its clock.
pub trait SoundEngine {
    /// Deliver an event. With `route` set the engine's native routing table
    /// processes it first; otherwise it goes straight to the synthesizer.
    fn send_event(&mut self, event: &Event, route: bool);

    /// Queue an event for `player` at an absolute tick.
    fn schedule_event(&mut self, event: &Event, player: PlayerId, at_tick: u64);

    /// Ask for `player`'s scheduler to be called back at an absolute tick.
    fn schedule_callback(&mut self, player: PlayerId, at_tick: u64);

    /// Drop everything still queued for `player`.
    fn remove_events(&mut self, player: PlayerId);

    fn current_tick(&self) -> u64;

    fn ticks_per_second(&self) -> f64 {
        DEFAULT_TICKS_PER_SECOND
    }

    /// Push a rule onto the native routing table.
    fn add_native_rule(&mut self, rule: &Rule);

    fn clear_native_rules(&mut self);

    fn set_setting(&mut self, name: &str, value: f64);

    fn get_setting(&self, name: &str) -> Option<f64>;

    fn set_effect_param(&mut self, effect: &str, port: &str, value: f64);

    fn get_effect_param(&self, effect: &str, port: &str) -> Option<f64>;

    /// Load and start a file. Returns `false` if the file could not be used.
    fn file_play(&mut self, path: &Path) -> bool;

    fn file_stop(&mut self);

    fn file_seek(&mut self, tick: u64);

    fn file_set_tempo(&mut self, bpm: f64);

    fn file_ticks_per_beat(&self) -> u32 {
        DEFAULT_FILE_TICKS_PER_BEAT
    }
}

//! Self-scheduling players and the directory that owns them.
//!
//! A player is a small state machine driven by engine callbacks. It asks
//! the engine to call its [`Player::scheduler`] a little ahead of the next
//! step, queues that step's events at their exact tick, then re-arms.
//! [`SoundEngine::remove_events`] is the only way to cancel what is queued.

mod arpeggio;
mod midifile;
mod midiloop;
mod sequence;

use log::{debug, info};
use serde::{Deserialize, Serialize};

pub use arpeggio::{ArpStyle, Arpeggio, ArpeggioDef};
pub use midifile::{MidiFile, MidiFileDef};
pub use midiloop::{MidiLoop, MidiLoopDef};
pub use sequence::{Sequence, SequenceDef, Step};

use crate::config::SequencerConfig;
use crate::engine::{PlayerId, SoundEngine};
use crate::error::{Error, Result};
use crate::events::Event;

/// Capabilities shared by every player.
///
/// Only the first four are required; the rest default to doing nothing so
/// a rule that targets the wrong kind of player is harmless.
pub trait Player {
    /// Start (`loops < 0` forever, `loops > 0` that many times) or stop (`0`).
    fn play(&mut self, loops: f64, engine: &mut dyn SoundEngine);

    fn set_tempo(&mut self, bpm: f64, engine: &mut dyn SoundEngine);

    /// Stop for good and release everything queued.
    fn dismiss(&mut self, engine: &mut dyn SoundEngine);

    /// Engine callback.
    fn scheduler(&mut self, engine: &mut dyn SoundEngine);

    fn is_playing(&self) -> bool;

    fn add(&mut self, _event: &Event, _engine: &mut dyn SoundEngine) {}

    /// `> 0` starts a layer, `0` stops, `< 0` stops and undoes that many layers.
    fn record(&mut self, _value: f64, _engine: &mut dyn SoundEngine) {}

    fn set_swing(&mut self, _swing: f64) {}

    fn set_groove(&mut self, _groove: Vec<f64>) {}

    /// Jump to a 1-based bar at the next bar boundary.
    fn seek(&mut self, _bar: u32) {}

    /// Position report from the engine's file player.
    fn on_file_tick(&mut self, _tick: u64, _engine: &mut dyn SoundEngine) {}
}

/// Serialisable description of a player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlayerDef {
    Sequence(SequenceDef),
    Arpeggio(ArpeggioDef),
    #[serde(rename = "midiloop")]
    MidiLoop(MidiLoopDef),
    #[serde(rename = "midifile")]
    MidiFile(MidiFileDef),
}

impl PlayerDef {
    /// Check the definition without building anything.
    pub fn validate(&self, name: &str) -> Result<()> {
        let reason = match self {
            PlayerDef::Sequence(def) => def.problem(),
            PlayerDef::MidiFile(def) => def.problem(),
            PlayerDef::MidiLoop(def) => def.problem(),
            PlayerDef::Arpeggio(_) => None,
        };
        match reason {
            Some(reason) => Err(Error::Player {
                name: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn build(&self, id: PlayerId, config: &SequencerConfig, ticks_per_second: f64) -> Box<dyn Player> {
        match self {
            PlayerDef::Sequence(def) => Box::new(Sequence::new(id, def, config, ticks_per_second)),
            PlayerDef::Arpeggio(def) => Box::new(Arpeggio::new(id, def, config, ticks_per_second)),
            PlayerDef::MidiLoop(def) => Box::new(MidiLoop::new(id, def, config, ticks_per_second)),
            PlayerDef::MidiFile(def) => Box::new(MidiFile::new(def)),
        }
    }
}

struct PlayerEntry {
    id: PlayerId,
    name: String,
    def: PlayerDef,
    player: Box<dyn Player>,
}

/// Owns the players and hands out ids.
pub struct PlayerDirectory {
    entries: Vec<PlayerEntry>,
    next_id: u32,
    config: SequencerConfig,
}

impl Default for PlayerDirectory {
    fn default() -> Self {
        Self::new(SequencerConfig::default())
    }
}

impl PlayerDirectory {
    pub fn new(config: SequencerConfig) -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            config,
        }
    }

    /// Create a player, or keep the existing one when `def` is unchanged.
    ///
    /// A changed definition dismisses the old player first.
    pub fn add_player(
        &mut self,
        name: &str,
        def: PlayerDef,
        engine: &mut dyn SoundEngine,
    ) -> Result<PlayerId> {
        if let Some(entry) = self.entries.iter().find(|e| e.name == name) {
            if entry.def == def {
                debug!("keeping player '{}' ({})", name, entry.id);
                return Ok(entry.id);
            }
        }
        def.validate(name)?;
        self.remove_player(name, engine);

        let id = PlayerId(self.next_id);
        self.next_id += 1;
        let player = def.build(id, &self.config, engine.ticks_per_second());
        info!("created player '{}' ({})", name, id);
        self.entries.push(PlayerEntry {
            id,
            name: name.to_string(),
            def,
            player,
        });
        Ok(id)
    }

    /// Dismiss and drop a player. Returns whether it existed.
    pub fn remove_player(&mut self, name: &str, engine: &mut dyn SoundEngine) -> bool {
        match self.entries.iter().position(|e| e.name == name) {
            Some(index) => {
                let mut entry = self.entries.remove(index);
                entry.player.dismiss(engine);
                info!("dismissed player '{}' ({})", name, entry.id);
                true
            }
            None => false,
        }
    }

    /// Dismiss every player whose name is not in `keep`.
    pub fn retain_names(&mut self, keep: &[&str], engine: &mut dyn SoundEngine) {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !keep.contains(&e.name.as_str()))
            .map(|e| e.name.clone())
            .collect();
        for name in doomed {
            self.remove_player(&name, engine);
        }
    }

    pub fn clear(&mut self, engine: &mut dyn SoundEngine) {
        self.retain_names(&[], engine);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Player> {
        let entry = self.entries.iter().find(|e| e.name == name)?;
        let player: &dyn Player = entry.player.as_ref();
        Some(player)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut dyn Player> {
        let entry = self.entries.iter_mut().find(|e| e.name == name)?;
        let player: &mut dyn Player = entry.player.as_mut();
        Some(player)
    }

    pub fn by_id_mut(&mut self, id: PlayerId) -> Option<&mut dyn Player> {
        let entry = self.entries.iter_mut().find(|e| e.id == id)?;
        let player: &mut dyn Player = entry.player.as_mut();
        Some(player)
    }

    pub fn id_of(&self, name: &str) -> Option<PlayerId> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.id)
    }

    pub fn def(&self, name: &str) -> Option<&PlayerDef> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.def)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Run a closure over every player, e.g. to forward file ticks.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut dyn Player)) {
        for entry in self.entries.iter_mut() {
            f(entry.player.as_mut());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RecordingEngine;

    fn loop_def(beats: f64) -> PlayerDef {
        PlayerDef::MidiLoop(MidiLoopDef {
            beats: Some(beats),
            tempo: None,
        })
    }

    #[test]
    fn test_same_definition_keeps_player() {
        let mut engine = RecordingEngine::new();
        let mut players = PlayerDirectory::default();
        let first = players.add_player("loop", loop_def(4.0), &mut engine).unwrap();
        let again = players.add_player("loop", loop_def(4.0), &mut engine).unwrap();
        assert_eq!(first, again);

        let changed = players.add_player("loop", loop_def(8.0), &mut engine).unwrap();
        assert_ne!(first, changed);
        assert_eq!(players.len(), 1);
        assert_eq!(players.id_of("loop"), Some(changed));
    }

    #[test]
    fn test_remove_and_retain() {
        let mut engine = RecordingEngine::new();
        let mut players = PlayerDirectory::default();
        players.add_player("a", loop_def(4.0), &mut engine).unwrap();
        players.add_player("b", loop_def(4.0), &mut engine).unwrap();
        players.add_player("c", loop_def(4.0), &mut engine).unwrap();

        assert!(players.remove_player("a", &mut engine));
        assert!(!players.remove_player("a", &mut engine));
        players.retain_names(&["c"], &mut engine);
        assert_eq!(players.names().collect::<Vec<_>>(), vec!["c"]);
        assert!(players.get("b").is_none());
    }

    #[test]
    fn test_invalid_definition_is_rejected() {
        let mut engine = RecordingEngine::new();
        let mut players = PlayerDirectory::default();
        let def = PlayerDef::Sequence(SequenceDef::default());
        let err = players.add_player("empty", def, &mut engine).unwrap_err();
        assert!(matches!(err, Error::Player { .. }));
        assert!(players.is_empty());
    }

    #[test]
    fn test_definition_from_toml() {
        let def: PlayerDef = toml::from_str(
            r#"
            type = "arpeggio"
            style = "both"
            tdiv = 16
            "#,
        )
        .unwrap();
        assert!(matches!(def, PlayerDef::Arpeggio(ArpeggioDef { style: ArpStyle::Both, tdiv: 16, .. })));

        let def: PlayerDef = toml::from_str("type = \"midiloop\"\nbeats = 8.0\n").unwrap();
        assert_eq!(def, loop_def(8.0));
    }
}

//! Backing-track player wrapping the engine's file transport.
//!
//! Bars are counted from 1. Seeks and jumps only ever land on bar
//! boundaries so the performance stays in phase.

use std::path::PathBuf;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::Player;
use crate::engine::SoundEngine;
use crate::timing::TimeSignature;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MidiFileDef {
    pub file: PathBuf,
    /// `(from_bar, to_bar)`: on reaching `from_bar` continue at `to_bar`,
    /// or stop when `to_bar` is 0.
    #[serde(default)]
    pub jumps: Vec<(u32, u32)>,
    #[serde(default)]
    pub time_signature: TimeSignature,
    #[serde(default)]
    pub tempo: Option<f64>,
}

impl MidiFileDef {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            jumps: Vec::new(),
            time_signature: TimeSignature::default(),
            tempo: None,
        }
    }

    pub(super) fn problem(&self) -> Option<String> {
        if self.file.as_os_str().is_empty() {
            return Some("no file given".to_string());
        }
        self.jumps
            .iter()
            .find(|(from, _)| *from == 0)
            .map(|_| "jump bars are counted from 1".to_string())
    }
}

pub struct MidiFile {
    file: PathBuf,
    jumps: Vec<(u32, u32)>,
    time_signature: TimeSignature,
    tempo: Option<f64>,
    playing: bool,
    last_tick: u64,
    pending_seek: Option<u32>,
}

impl MidiFile {
    pub fn new(def: &MidiFileDef) -> Self {
        Self {
            file: def.file.clone(),
            jumps: def.jumps.clone(),
            time_signature: def.time_signature,
            tempo: def.tempo,
            playing: false,
            last_tick: 0,
            pending_seek: None,
        }
    }

    /// File ticks per bar.
    fn bar_length(&self, engine: &dyn SoundEngine) -> u64 {
        let ticks = engine.file_ticks_per_beat() as f64 * self.time_signature.beats_per_bar();
        (ticks.round() as u64).max(1)
    }

    fn bar_start(bar: u32, bar_length: u64) -> u64 {
        bar.saturating_sub(1) as u64 * bar_length
    }

    fn stop(&mut self, engine: &mut dyn SoundEngine) {
        if self.playing {
            engine.file_stop();
            self.playing = false;
            self.pending_seek = None;
            debug!("stopped {:?}", self.file);
        }
    }
}

impl Player for MidiFile {
    fn play(&mut self, loops: f64, engine: &mut dyn SoundEngine) {
        if !loops.is_finite() || loops == 0.0 {
            self.stop(engine);
            return;
        }
        if !engine.file_play(&self.file) {
            warn!("could not play {:?}", self.file);
            return;
        }
        if let Some(bpm) = self.tempo {
            engine.file_set_tempo(bpm);
        }
        self.playing = true;
        self.last_tick = 0;
        info!("playing {:?}", self.file);
    }

    fn set_tempo(&mut self, bpm: f64, engine: &mut dyn SoundEngine) {
        if bpm.is_finite() && bpm > 0.0 {
            self.tempo = Some(bpm);
            engine.file_set_tempo(bpm);
        }
    }

    fn dismiss(&mut self, engine: &mut dyn SoundEngine) {
        self.stop(engine);
    }

    /// File players are clocked by `on_file_tick`.
    fn scheduler(&mut self, _engine: &mut dyn SoundEngine) {}

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn seek(&mut self, bar: u32) {
        self.pending_seek = Some(bar.max(1));
    }

    fn on_file_tick(&mut self, tick: u64, engine: &mut dyn SoundEngine) {
        if !self.playing {
            return;
        }
        let bar_length = self.bar_length(engine);
        let crossed_bar = tick % bar_length < tick.saturating_sub(self.last_tick);

        if crossed_bar {
            if let Some(bar) = self.pending_seek.take() {
                let target = Self::bar_start(bar, bar_length);
                debug!("seeking {:?} to bar {}", self.file, bar);
                engine.file_seek(target);
                self.last_tick = target;
                return;
            }
        }

        let last = self.last_tick;
        let jump = self.jumps.iter().copied().find(|&(from, _)| {
            let start = Self::bar_start(from, bar_length);
            last < start && start <= tick
        });
        match jump {
            Some((_, 0)) => self.stop(engine),
            Some((from, to)) => {
                let target = Self::bar_start(to, bar_length);
                debug!("jump from bar {} to bar {}", from, to);
                engine.file_seek(target);
                self.last_tick = target;
            }
            None => self.last_tick = tick,
        }
    }
}

//! Live loop recorder with overdub layers.
//!
//! Events are stamped with their beat offset from the start of the current
//! pass. Each recording pass is a layer; playback merges all layers into a
//! single beat-ordered timeline.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::Player;
use crate::config::SequencerConfig;
use crate::engine::{PlayerId, SoundEngine};
use crate::events::Event;
use crate::timing::TickClock;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MidiLoopDef {
    /// Fixed loop length. Without it the first recording sets the length.
    pub beats: Option<f64>,
    pub tempo: Option<f64>,
}

impl MidiLoopDef {
    pub(super) fn problem(&self) -> Option<String> {
        match self.beats {
            Some(beats) if !(beats.is_finite() && beats > 0.0) => {
                Some("beats must be a positive number".to_string())
            }
            _ => None,
        }
    }
}

type Layer = Vec<(f64, Event)>;

pub struct MidiLoop {
    id: PlayerId,
    clock: TickClock,
    seq_lag: u64,
    fixed_beats: Option<f64>,
    beats: Option<f64>,
    layers: Vec<Layer>,
    timeline: Layer,
    recording: bool,
    playing: bool,
    loops_left: Option<u32>,
    /// Tick at which the current pass began.
    loop_start: u64,
    /// Next timeline entry to queue.
    cursor: usize,
    /// The armed callback is the end-of-pass one.
    wrap_pending: bool,
}

impl MidiLoop {
    pub fn new(id: PlayerId, def: &MidiLoopDef, config: &SequencerConfig, ticks_per_second: f64) -> Self {
        Self {
            id,
            clock: TickClock::new(ticks_per_second, def.tempo.unwrap_or(config.default_tempo)),
            seq_lag: config.seq_lag,
            fixed_beats: def.beats,
            beats: def.beats,
            layers: Vec::new(),
            timeline: Vec::new(),
            recording: false,
            playing: false,
            loops_left: None,
            loop_start: 0,
            cursor: 0,
            wrap_pending: false,
        }
    }

    pub fn layers(&self) -> usize {
        self.layers.len()
    }

    pub fn timeline(&self) -> &[(f64, Event)] {
        &self.timeline
    }

    /// Loop length in beats, once known.
    pub fn beats(&self) -> Option<f64> {
        self.beats
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    fn loop_ticks(&self) -> Option<u64> {
        let beats = self.beats?;
        let ticks = self.clock.beats_to_ticks(beats).round() as u64;
        (ticks > 0).then_some(ticks)
    }

    /// Beat offset of `now` within the current pass.
    fn position(&self, now: u64) -> f64 {
        let elapsed = self.clock.ticks_to_beats(now as f64 - self.loop_start as f64);
        match self.beats {
            Some(beats) => elapsed.rem_euclid(beats),
            None => elapsed.max(0.0),
        }
    }

    /// Move `loop_start` to the pass containing `now`.
    fn align(&mut self, now: u64) {
        let Some(len) = self.loop_ticks() else {
            return;
        };
        if now < self.loop_start {
            let passes = (self.loop_start - now).div_ceil(len);
            self.loop_start = self.loop_start.saturating_sub(passes * len);
        } else {
            self.loop_start += (now - self.loop_start) / len * len;
        }
    }

    fn flatten(&mut self) {
        self.timeline = self.layers.iter().flatten().cloned().collect();
        self.timeline.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    fn arm(&mut self, engine: &mut dyn SoundEngine) {
        let Some(len) = self.loop_ticks() else {
            return;
        };
        let at = match self.timeline.get(self.cursor) {
            Some((beat, _)) => self.loop_start + self.clock.beats_to_ticks(*beat).round() as u64,
            None => {
                self.wrap_pending = true;
                self.loop_start + len
            }
        };
        engine.schedule_callback(self.id, at.saturating_sub(self.seq_lag));
    }

    fn start_playing(&mut self, engine: &mut dyn SoundEngine) {
        engine.remove_events(self.id);
        self.playing = true;
        self.loop_start = engine.current_tick();
        self.cursor = 0;
        self.wrap_pending = false;
        debug!("{}: loop playing from {}", self.id, self.loop_start);
        self.arm(engine);
    }

    /// Re-arm after the timeline or tempo changed mid-pass.
    fn resync(&mut self, engine: &mut dyn SoundEngine) {
        engine.remove_events(self.id);
        let now = engine.current_tick();
        self.align(now);
        let pos = self.position(now);
        self.cursor = self.timeline.partition_point(|(beat, _)| *beat < pos);
        self.wrap_pending = false;
        self.arm(engine);
    }

    fn stop(&mut self, engine: &mut dyn SoundEngine) {
        self.playing = false;
        self.wrap_pending = false;
        engine.remove_events(self.id);
    }

    fn start_recording(&mut self, engine: &mut dyn SoundEngine) {
        if self.recording {
            return;
        }
        if !self.playing {
            if self.beats.is_some() {
                self.start_playing(engine);
            } else {
                self.loop_start = engine.current_tick();
            }
        }
        self.recording = true;
        self.layers.push(Vec::new());
        info!("{}: recording layer {}", self.id, self.layers.len());
    }

    /// Finish the current layer, then keep only the first `undo_to` layers.
    pub fn stop_recording(&mut self, undo_to: Option<usize>, engine: &mut dyn SoundEngine) {
        let was_recording = self.recording;
        self.recording = false;
        let now = engine.current_tick();

        if was_recording && self.beats.is_none() {
            let elapsed = self.clock.ticks_to_beats(now.saturating_sub(self.loop_start) as f64);
            if elapsed > 0.0 {
                self.beats = Some(elapsed);
                info!("{}: loop length set to {:.3} beats", self.id, elapsed);
            } else {
                self.layers.pop();
            }
        }
        if let Some(keep) = undo_to {
            self.layers.truncate(keep);
        }
        self.flatten();

        if self.layers.is_empty() {
            if self.playing {
                self.stop(engine);
            }
            self.beats = self.fixed_beats;
            debug!("{}: loop is empty", self.id);
            return;
        }

        if self.playing {
            self.resync(engine);
        } else if was_recording {
            self.loops_left = None;
            self.start_playing(engine);
        }
    }
}

impl Player for MidiLoop {
    fn play(&mut self, loops: f64, engine: &mut dyn SoundEngine) {
        if !loops.is_finite() || loops == 0.0 {
            self.recording = false;
            self.stop(engine);
            return;
        }
        if self.beats.is_none() {
            debug!("{}: nothing recorded yet", self.id);
            return;
        }
        self.loops_left = if loops < 0.0 {
            None
        } else {
            Some((loops.round() as u32).max(1))
        };
        self.start_playing(engine);
    }

    fn set_tempo(&mut self, bpm: f64, engine: &mut dyn SoundEngine) {
        if !self.playing {
            self.clock.set_bpm(bpm);
            return;
        }
        let now = engine.current_tick();
        self.align(now);
        let pos = self.position(now);
        self.clock.set_bpm(bpm);
        let offset = self.clock.beats_to_ticks(pos).round() as u64;
        self.loop_start = now.saturating_sub(offset);
        self.resync(engine);
    }

    fn dismiss(&mut self, engine: &mut dyn SoundEngine) {
        self.recording = false;
        self.stop(engine);
    }

    fn scheduler(&mut self, engine: &mut dyn SoundEngine) {
        if !self.playing {
            return;
        }
        let Some(len) = self.loop_ticks() else {
            return;
        };
        if self.wrap_pending {
            self.wrap_pending = false;
            self.loop_start += len;
            self.cursor = 0;
            if let Some(left) = self.loops_left {
                if left <= 1 {
                    self.stop(engine);
                    return;
                }
                self.loops_left = Some(left - 1);
            }
        } else if let Some((beat, event)) = self.timeline.get(self.cursor) {
            let at = self.loop_start + self.clock.beats_to_ticks(*beat).round() as u64;
            engine.schedule_event(event, self.id, at);
            self.cursor += 1;
        }
        self.arm(engine);
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn add(&mut self, event: &Event, engine: &mut dyn SoundEngine) {
        if !self.recording {
            return;
        }
        let beat = self.position(engine.current_tick());
        if let Some(layer) = self.layers.last_mut() {
            layer.push((beat, event.clone()));
        }
    }

    fn record(&mut self, value: f64, engine: &mut dyn SoundEngine) {
        if value > 0.0 {
            self.start_recording(engine);
        } else if value == 0.0 {
            self.stop_recording(None, engine);
        } else if value < 0.0 {
            let undo = value.abs().round() as usize;
            let keep = self.layers.len().saturating_sub(undo);
            self.stop_recording(Some(keep), engine);
        }
    }
}

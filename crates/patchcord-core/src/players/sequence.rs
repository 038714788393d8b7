//! Step sequencer.
//!
//! A sequence is a list of patterns, each a stack of tracks of equal
//! subdivision, and an order list saying which pattern plays next.

use std::fmt;
use std::str::FromStr;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use super::Player;
use crate::config::SequencerConfig;
use crate::engine::{PlayerId, SoundEngine};
use crate::error::CompileError;
use crate::events::{Event, EventKind};
use crate::timing::{StepTiming, TickClock};

/// One cell of a track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Step {
    Rest,
    Event(Event),
}

impl FromStr for Step {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "_" | "." | "-" => Ok(Step::Rest),
            text => Ok(Step::Event(text.parse()?)),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Rest => f.write_str("_"),
            Step::Event(event) => write!(f, "{}", event),
        }
    }
}

impl TryFrom<String> for Step {
    type Error = CompileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Step> for String {
    fn from(step: Step) -> Self {
        step.to_string()
    }
}

/// A pattern is a stack of tracks; a track is a row of steps.
pub type Pattern = Vec<Vec<Step>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequenceDef {
    pub patterns: Vec<Pattern>,
    /// 1-based pattern numbers; `-n` jumps back n entries once per pass,
    /// `0` stops. Empty plays every pattern in turn.
    pub order: Vec<i32>,
    pub tdiv: u32,
    pub swing: f64,
    pub groove: Vec<f64>,
    pub tempo: Option<f64>,
}

impl Default for SequenceDef {
    fn default() -> Self {
        let timing = StepTiming::default();
        Self {
            patterns: Vec::new(),
            order: Vec::new(),
            tdiv: timing.tdiv,
            swing: timing.swing,
            groove: timing.groove,
            tempo: None,
        }
    }
}

fn pattern_len(pattern: &Pattern) -> usize {
    pattern.iter().map(Vec::len).max().unwrap_or(0)
}

impl SequenceDef {
    pub(super) fn problem(&self) -> Option<String> {
        if self.patterns.is_empty() {
            return Some("no patterns".to_string());
        }
        if let Some(k) = self.patterns.iter().position(|p| pattern_len(p) == 0) {
            return Some(format!("pattern {} has no steps", k + 1));
        }
        if self.tdiv == 0 {
            return Some("tdiv must be positive".to_string());
        }
        if let Some(k) = self.order.iter().find(|&&k| k as i64 > self.patterns.len() as i64) {
            return Some(format!("order refers to missing pattern {}", k));
        }
        if !self.order.is_empty() && !self.order.iter().any(|&k| k > 0) {
            return Some("order never plays a pattern".to_string());
        }
        None
    }
}

pub struct Sequence {
    id: PlayerId,
    patterns: Vec<Pattern>,
    order: Vec<i32>,
    timing: StepTiming,
    clock: TickClock,
    seq_lag: u64,
    playing: bool,
    /// Passes left, `None` for forever.
    loops_left: Option<u32>,
    /// Index into `order`.
    pos: usize,
    /// Jumps already taken during this pass.
    jumped: Vec<bool>,
    current: usize,
    step: usize,
    next_tick: u64,
    /// Note-offs queued but not yet due, with their tick.
    sounding: Vec<(u64, Event)>,
}

impl Sequence {
    pub fn new(id: PlayerId, def: &SequenceDef, config: &SequencerConfig, ticks_per_second: f64) -> Self {
        let order: Vec<i32> = if def.order.is_empty() {
            (1..=def.patterns.len() as i32).collect()
        } else {
            def.order.clone()
        };
        Self {
            id,
            patterns: def.patterns.clone(),
            jumped: vec![false; order.len()],
            order,
            timing: StepTiming::new(def.tdiv, def.swing, def.groove.clone()),
            clock: TickClock::new(ticks_per_second, def.tempo.unwrap_or(config.default_tempo)),
            seq_lag: config.seq_lag,
            playing: false,
            loops_left: None,
            pos: 0,
            current: 0,
            step: 0,
            next_tick: 0,
            sounding: Vec::new(),
        }
    }

    pub fn tempo(&self) -> f64 {
        self.clock.bpm()
    }

    /// Resolve the order list to the next pattern, or `None` to stop.
    fn next_pattern(&mut self) -> Option<usize> {
        let limit = self.order.len() * 2 + 2;
        for _ in 0..limit {
            if self.pos >= self.order.len() {
                match self.loops_left {
                    Some(n) if n <= 1 => return None,
                    Some(n) => self.loops_left = Some(n - 1),
                    None => {}
                }
                self.pos = 0;
                self.jumped.iter_mut().for_each(|j| *j = false);
            }
            match self.order[self.pos] {
                0 => return None,
                k if k > 0 && (k as usize) <= self.patterns.len() => return Some(k as usize - 1),
                k if k > 0 => {
                    warn!("{}: order refers to missing pattern {}", self.id, k);
                    self.pos += 1;
                }
                k => {
                    if self.jumped[self.pos] {
                        self.pos += 1;
                    } else {
                        self.jumped[self.pos] = true;
                        self.pos = self.pos.saturating_sub(k.unsigned_abs() as usize);
                    }
                }
            }
        }
        warn!("{}: order list never reaches a pattern", self.id);
        None
    }

    fn start(&mut self, loops: Option<u32>, engine: &mut dyn SoundEngine) {
        let now = engine.current_tick();
        self.loops_left = loops;
        self.pos = 0;
        self.step = 0;
        self.jumped.iter_mut().for_each(|j| *j = false);
        self.playing = true;
        self.next_tick = now + self.seq_lag;
        engine.schedule_callback(self.id, now);
        debug!("{}: sequence started, loops {:?}", self.id, loops);
    }

    fn stop(&mut self, engine: &mut dyn SoundEngine) {
        self.playing = false;
        engine.remove_events(self.id);
        let now = engine.current_tick();
        for (off_tick, off) in self.sounding.drain(..) {
            if off_tick > now {
                engine.send_event(&off, false);
            }
        }
        debug!("{}: sequence stopped", self.id);
    }
}

impl Player for Sequence {
    fn play(&mut self, loops: f64, engine: &mut dyn SoundEngine) {
        if self.playing {
            self.stop(engine);
        }
        if !loops.is_finite() || loops == 0.0 {
            return;
        }
        let loops = if loops < 0.0 {
            None
        } else {
            Some((loops.round() as u32).max(1))
        };
        self.start(loops, engine);
    }

    fn set_tempo(&mut self, bpm: f64, _engine: &mut dyn SoundEngine) {
        self.clock.set_bpm(bpm);
    }

    fn dismiss(&mut self, engine: &mut dyn SoundEngine) {
        if self.playing {
            self.stop(engine);
        }
    }

    fn scheduler(&mut self, engine: &mut dyn SoundEngine) {
        if !self.playing {
            return;
        }
        let now = engine.current_tick();
        self.sounding.retain(|(off_tick, _)| *off_tick > now);

        if self.step == 0 {
            match self.next_pattern() {
                Some(index) => self.current = index,
                None => {
                    self.stop(engine);
                    return;
                }
            }
        }

        let pattern = &self.patterns[self.current];
        let at = self.next_tick;
        let step_ticks = self.timing.step_ticks(self.step, &self.clock);
        let accent = self.timing.accent(self.step);
        trace!("{}: pattern {} step {} at {}", self.id, self.current + 1, self.step, at);

        for track in pattern {
            let Some(Step::Event(event)) = track.get(self.step) else {
                continue;
            };
            let mut val = event.val() * accent;
            if event.kind() == EventKind::Note {
                val = val.round().clamp(0.0, 127.0);
            }
            let event = event.with_val(val);
            engine.schedule_event(&event, self.id, at);
            if event.is_key_down() {
                let off = event.with_kind(EventKind::NoteOff).with_val(0.0);
                engine.schedule_event(&off, self.id, at + step_ticks);
                self.sounding.push((at + step_ticks, off));
            }
        }

        self.step += 1;
        if self.step >= pattern_len(pattern) {
            self.step = 0;
            self.pos += 1;
        }
        self.next_tick = at + step_ticks;
        engine.schedule_callback(self.id, self.next_tick.saturating_sub(self.seq_lag));
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn set_swing(&mut self, swing: f64) {
        self.timing.set_swing(swing);
    }

    fn set_groove(&mut self, groove: Vec<f64>) {
        self.timing.set_groove(groove);
    }
}

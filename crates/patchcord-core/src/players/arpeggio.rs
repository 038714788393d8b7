//! Arpeggiator driven by held keys.

use log::debug;
use serde::{Deserialize, Serialize};

use super::Player;
use crate::config::SequencerConfig;
use crate::engine::{PlayerId, SoundEngine};
use crate::events::{Event, EventKind};
use crate::timing::{StepTiming, TickClock};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArpStyle {
    #[default]
    Up,
    Down,
    /// Up, then back down without repeating the ends.
    Both,
    /// Every held key on every step.
    Chord,
    /// Keys in the order they were pressed.
    Manual,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArpeggioDef {
    pub style: ArpStyle,
    pub tdiv: u32,
    pub swing: f64,
    pub groove: Vec<f64>,
    pub tempo: Option<f64>,
}

impl Default for ArpeggioDef {
    fn default() -> Self {
        Self {
            style: ArpStyle::Up,
            tdiv: 16,
            swing: 0.5,
            groove: vec![1.0],
            tempo: None,
        }
    }
}

pub struct Arpeggio {
    id: PlayerId,
    style: ArpStyle,
    timing: StepTiming,
    clock: TickClock,
    seq_lag: u64,
    /// Held keys in press order.
    held: Vec<Event>,
    /// Play order derived from `held`.
    notes: Vec<Event>,
    playing: bool,
    step: usize,
    next_tick: u64,
    sounding: Vec<(u64, Event)>,
}

impl Arpeggio {
    pub fn new(id: PlayerId, def: &ArpeggioDef, config: &SequencerConfig, ticks_per_second: f64) -> Self {
        Self {
            id,
            style: def.style,
            timing: StepTiming::new(def.tdiv, def.swing, def.groove.clone()),
            clock: TickClock::new(ticks_per_second, def.tempo.unwrap_or(config.default_tempo)),
            seq_lag: config.seq_lag,
            held: Vec::new(),
            notes: Vec::new(),
            playing: false,
            step: 0,
            next_tick: 0,
            sounding: Vec::new(),
        }
    }

    /// Note numbers in play order.
    pub fn notes(&self) -> Vec<i32> {
        self.notes.iter().filter_map(Event::num).collect()
    }

    fn rebuild(&mut self) {
        let mut up = self.held.clone();
        up.sort_by_key(|e| e.num());
        self.notes = match self.style {
            ArpStyle::Up | ArpStyle::Chord => up,
            ArpStyle::Down => up.into_iter().rev().collect(),
            ArpStyle::Both => {
                let middle: Vec<Event> = if up.len() > 2 {
                    up[1..up.len() - 1].iter().rev().cloned().collect()
                } else {
                    Vec::new()
                };
                up.into_iter().chain(middle).collect()
            }
            ArpStyle::Manual => self.held.clone(),
        };
    }

    /// Queue one step at `next_tick` and arm the callback for the next.
    fn emit(&mut self, engine: &mut dyn SoundEngine) {
        if self.notes.is_empty() {
            return;
        }
        let at = self.next_tick;
        let step_ticks = self.timing.step_ticks(self.step, &self.clock);
        let accent = self.timing.accent(self.step);

        let keys: Vec<Event> = if self.style == ArpStyle::Chord {
            self.notes.clone()
        } else {
            vec![self.notes[self.step % self.notes.len()].clone()]
        };
        for key in keys {
            let note = key.with_val((key.val() * accent).round().clamp(0.0, 127.0));
            engine.schedule_event(&note, self.id, at);
            if note.is_key_down() {
                let off = note.with_kind(EventKind::NoteOff).with_val(0.0);
                engine.schedule_event(&off, self.id, at + step_ticks);
                self.sounding.push((at + step_ticks, off));
            }
        }

        self.step += 1;
        self.next_tick = at + step_ticks;
        engine.schedule_callback(self.id, self.next_tick.saturating_sub(self.seq_lag));
    }

    /// Chords strike at once; other styles wait for the first callback.
    fn start(&mut self, engine: &mut dyn SoundEngine) {
        let now = engine.current_tick();
        self.playing = true;
        self.step = 0;
        debug!("{}: arpeggio started", self.id);
        if self.style == ArpStyle::Chord {
            self.next_tick = now;
            self.emit(engine);
        } else {
            self.next_tick = now + self.seq_lag;
            engine.schedule_callback(self.id, now);
        }
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
        debug!("{}: arpeggio stopped", self.id);
    }
}

impl Player for Arpeggio {
    /// Arpeggios follow the keys; only `0` does anything, releasing them all.
    fn play(&mut self, loops: f64, engine: &mut dyn SoundEngine) {
        if loops == 0.0 {
            self.held.clear();
            self.notes.clear();
            if self.playing {
                self.stop(engine);
            }
        }
    }

    fn set_tempo(&mut self, bpm: f64, _engine: &mut dyn SoundEngine) {
        self.clock.set_bpm(bpm);
    }

    fn dismiss(&mut self, engine: &mut dyn SoundEngine) {
        self.held.clear();
        self.notes.clear();
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
        self.emit(engine);
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn add(&mut self, event: &Event, engine: &mut dyn SoundEngine) {
        if !matches!(event.kind(), EventKind::Note | EventKind::NoteOff) {
            return;
        }
        let was_empty = self.held.is_empty();
        self.held
            .retain(|k| (k.chan(), k.num()) != (event.chan(), event.num()));
        if event.is_key_down() {
            self.held.push(event.clone());
        }
        self.rebuild();

        if was_empty && !self.held.is_empty() {
            self.start(engine);
        } else if !was_empty && self.held.is_empty() {
            self.stop(engine);
        }
    }

    fn set_swing(&mut self, swing: f64) {
        self.timing.set_swing(swing);
    }

    fn set_groove(&mut self, groove: Vec<f64>) {
        self.timing.set_groove(groove);
    }
}

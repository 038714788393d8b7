//! Timing primitives shared by the players.
//!
//! Every player speaks in Sound Engine ticks. This module converts between
//! ticks and beats and computes step lengths under swing and groove:
//!
//! - [`TickClock`] - Tempo-aware tick/beat conversion
//! - [`TimeSignature`] - Musical time signature (e.g., 4/4, 3/4)
//! - [`StepTiming`] - Subdivision, swing and groove of a stepped pattern

use serde::{Deserialize, Serialize};

/// Engine ticks per second unless the engine reports otherwise.
pub const DEFAULT_TICKS_PER_SECOND: f64 = 1000.0;

/// Lead time in ticks between a scheduler callback and the step it arms.
pub const SEQ_LAG: u64 = 10;

/// Tempo used by players whose definition does not name one.
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Musical time signature (numerator/denominator).
///
/// The numerator indicates beats per bar, and the denominator indicates
/// the note value that gets one beat (4 = quarter note, 8 = eighth note).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    /// Create a new time signature.
    ///
    /// Values are clamped to at least 1 to prevent division by zero.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    /// Calculate the number of quarter-note beats per bar.
    ///
    /// For 4/4: 4 beats per bar
    /// For 3/4: 3 beats per bar
    /// For 6/8: 3 beats per bar (6 eighth notes = 3 quarter notes)
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * (4.0 / self.denominator as f64)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Converts between beats and engine ticks at a given tempo.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickClock {
    ticks_per_second: f64,
    bpm: f64,
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICKS_PER_SECOND, DEFAULT_TEMPO)
    }
}

impl TickClock {
    pub fn new(ticks_per_second: f64, bpm: f64) -> Self {
        let mut clock = Self {
            ticks_per_second: if ticks_per_second > 0.0 {
                ticks_per_second
            } else {
                DEFAULT_TICKS_PER_SECOND
            },
            bpm: DEFAULT_TEMPO,
        };
        clock.set_bpm(bpm);
        clock
    }

    /// Set the tempo. Non-finite or non-positive values are ignored.
    pub fn set_bpm(&mut self, bpm: f64) {
        if bpm.is_finite() && bpm > 0.0 {
            self.bpm = bpm.clamp(1.0, 999.0);
        } else {
            log::debug!("ignoring tempo {}", bpm);
        }
    }

    /// Get the current BPM.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn ticks_per_second(&self) -> f64 {
        self.ticks_per_second
    }

    /// Length of one beat in ticks.
    pub fn ticks_per_beat(&self) -> f64 {
        self.ticks_per_second * 60.0 / self.bpm
    }

    pub fn beats_to_ticks(&self, beats: f64) -> f64 {
        beats * self.ticks_per_beat()
    }

    pub fn ticks_to_beats(&self, ticks: f64) -> f64 {
        ticks / self.ticks_per_beat()
    }

    /// Tempo implied by `beats` elapsing over `ticks`.
    pub fn bpm_from_interval(&self, beats: f64, ticks: u64) -> Option<f64> {
        if ticks == 0 {
            return None;
        }
        Some(self.ticks_per_second * 60.0 * beats / ticks as f64)
    }
}

/// Subdivision, swing and groove of a stepped pattern.
///
/// `tdiv` counts steps per four beats, so 8 is eighth notes and 16 is
/// sixteenths. Swing only applies to subdivisions that split evenly into
/// off-beats (`tdiv >= 8` and not a multiple of 3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub tdiv: u32,
    pub swing: f64,
    pub groove: Vec<f64>,
}

impl Default for StepTiming {
    fn default() -> Self {
        Self {
            tdiv: 8,
            swing: 0.5,
            groove: vec![1.0],
        }
    }
}

impl StepTiming {
    pub fn new(tdiv: u32, swing: f64, groove: Vec<f64>) -> Self {
        let mut timing = Self {
            tdiv: tdiv.max(1),
            swing: 0.5,
            groove: vec![1.0],
        };
        timing.set_swing(swing);
        timing.set_groove(groove);
        timing
    }

    /// Whether this subdivision is eligible for swing.
    pub fn swings(&self) -> bool {
        self.tdiv >= 8 && self.tdiv % 3 != 0
    }

    pub fn set_swing(&mut self, swing: f64) {
        if swing.is_finite() {
            self.swing = swing.clamp(0.0, 1.0);
        }
    }

    pub fn set_groove(&mut self, groove: Vec<f64>) {
        let groove: Vec<f64> = groove.into_iter().filter(|g| g.is_finite()).collect();
        self.groove = if groove.is_empty() { vec![1.0] } else { groove };
    }

    /// Accent multiplier for the given step.
    pub fn accent(&self, step: usize) -> f64 {
        self.groove[step % self.groove.len()]
    }

    /// Duration of the given step in ticks.
    pub fn step_ticks(&self, step: usize, clock: &TickClock) -> u64 {
        let base = clock.beats_to_ticks(4.0 / self.tdiv as f64);
        let scaled = if self.swings() {
            if step % 2 == 0 {
                base * 2.0 * self.swing
            } else {
                base * 2.0 * (1.0 - self.swing)
            }
        } else {
            base
        };
        (scaled.round() as u64).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_signature_beats_per_bar() {
        assert!((TimeSignature::new(4, 4).beats_per_bar() - 4.0).abs() < 0.001);
        assert!((TimeSignature::new(3, 4).beats_per_bar() - 3.0).abs() < 0.001);
        assert!((TimeSignature::new(6, 8).beats_per_bar() - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_tick_clock_conversion() {
        let clock = TickClock::new(1000.0, 120.0);
        // At 120 BPM, 1 beat = 0.5 seconds = 500 ticks
        assert!((clock.ticks_per_beat() - 500.0).abs() < 0.001);
        assert!((clock.ticks_to_beats(1500.0) - 3.0).abs() < 0.001);
        assert!((clock.bpm_from_interval(1.0, 500).unwrap() - 120.0).abs() < 0.001);
        assert!(clock.bpm_from_interval(1.0, 0).is_none());
    }

    #[test]
    fn test_tick_clock_rejects_bad_tempo() {
        let mut clock = TickClock::default();
        clock.set_bpm(-3.0);
        clock.set_bpm(f64::NAN);
        assert!((clock.bpm() - DEFAULT_TEMPO).abs() < 0.001);
    }

    #[test]
    fn test_swing_only_on_even_subdivisions() {
        let clock = TickClock::new(1000.0, 120.0);
        let straight = StepTiming::new(8, 0.5, vec![1.0]);
        assert_eq!(straight.step_ticks(0, &clock), 250);
        assert_eq!(straight.step_ticks(1, &clock), 250);

        let swung = StepTiming::new(8, 0.6, vec![1.0]);
        assert_eq!(swung.step_ticks(0, &clock), 300);
        assert_eq!(swung.step_ticks(1, &clock), 200);

        let triplets = StepTiming::new(12, 0.6, vec![1.0]);
        assert!(!triplets.swings());
        assert_eq!(triplets.step_ticks(0, &clock), triplets.step_ticks(1, &clock));

        let quarters = StepTiming::new(4, 0.7, vec![1.0]);
        assert_eq!(quarters.step_ticks(0, &clock), 500);
    }

    #[test]
    fn test_groove_cycles_and_defaults() {
        let timing = StepTiming::new(16, 0.5, vec![1.2, 0.8, 1.0]);
        assert!((timing.accent(0) - 1.2).abs() < 1e-9);
        assert!((timing.accent(4) - 0.8).abs() < 1e-9);

        let empty = StepTiming::new(16, 0.5, vec![]);
        assert!((empty.accent(7) - 1.0).abs() < 1e-9);
    }
}

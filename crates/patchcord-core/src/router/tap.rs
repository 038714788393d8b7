//! Tap tempo estimation.

use crate::timing::{TickClock, DEFAULT_TEMPO};

/// Last tap and the interval before it, for one target.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TapTempo {
    last_tap: Option<u64>,
    last_interval: Option<u64>,
}

impl TapTempo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tap worth `beats` beats at `tick`.
    ///
    /// Returns a tempo once two consecutive intervals agree, i.e. the
    /// shorter divided by the longer exceeds `ratio`. A gap longer than
    /// `timeout` ticks starts over.
    pub fn tap(
        &mut self,
        tick: u64,
        beats: f64,
        ticks_per_second: f64,
        ratio: f64,
        timeout: u64,
    ) -> Option<f64> {
        let previous_tap = self.last_tap.replace(tick);
        let dt = tick.checked_sub(previous_tap?)?;
        if dt == 0 {
            return None;
        }
        if dt > timeout {
            self.last_interval = None;
            return None;
        }
        let previous = self.last_interval.replace(dt)?;
        let similarity = dt.min(previous) as f64 / dt.max(previous) as f64;
        if similarity > ratio {
            TickClock::new(ticks_per_second, DEFAULT_TEMPO).bpm_from_interval(beats, dt)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tap(state: &mut TapTempo, tick: u64) -> Option<f64> {
        state.tap(tick, 1.0, 1000.0, 0.5, 3000)
    }

    #[test]
    fn test_similar_intervals_commit() {
        let mut state = TapTempo::new();
        assert_eq!(tap(&mut state, 0), None);
        assert_eq!(tap(&mut state, 500), None);
        assert_eq!(tap(&mut state, 1000), Some(120.0));
        // 600 against 500 is still similar
        assert_eq!(tap(&mut state, 1600), Some(100.0));
    }

    #[test]
    fn test_dissimilar_intervals_do_not_commit() {
        let mut state = TapTempo::new();
        tap(&mut state, 0);
        tap(&mut state, 1000);
        assert_eq!(tap(&mut state, 1200), None);
        // 200 then 220 agree again
        assert_eq!(tap(&mut state, 1420).map(|bpm| bpm.round()), Some(273.0));
    }

    #[test]
    fn test_timeout_restarts() {
        let mut state = TapTempo::new();
        tap(&mut state, 0);
        tap(&mut state, 500);
        assert_eq!(tap(&mut state, 5000), None);
        assert_eq!(tap(&mut state, 5500), None);
        assert_eq!(tap(&mut state, 6000), Some(120.0));
    }

    #[test]
    fn test_beats_per_tap() {
        let mut state = TapTempo::new();
        state.tap(0, 2.0, 1000.0, 0.5, 3000);
        state.tap(1000, 2.0, 1000.0, 0.5, 3000);
        assert_eq!(state.tap(2000, 2.0, 1000.0, 0.5, 3000), Some(120.0));
    }
}

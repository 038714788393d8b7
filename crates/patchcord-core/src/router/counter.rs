//! Named wrap-around counters for relative controls.

use std::collections::HashMap;

use crate::route::Route;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Counter {
    value: f64,
    low: f64,
    high: f64,
}

/// Counters keyed by name, created on first use.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: HashMap<String, Counter>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step `name` by `inc` when `value` is non-zero and return the result.
    ///
    /// A new counter spans the output range of `range` (0..=127 without
    /// one) and starts at its `tomin`. Stepping past either end wraps to
    /// the other.
    pub fn step(&mut self, name: &str, range: Option<&Route>, inc: f64, value: f64) -> f64 {
        let counter = self.counters.entry(name.to_string()).or_insert_with(|| {
            let (start, end) = range.map_or((0.0, 127.0), |r| (r.tomin, r.tomax));
            Counter {
                value: start,
                low: start.min(end),
                high: start.max(end),
            }
        });
        if value != 0.0 {
            let next = counter.value + inc;
            counter.value = if next > counter.high {
                counter.low
            } else if next < counter.low {
                counter.high
            } else {
                next
            };
        }
        counter.value
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.counters.get(name).map(|c| c.value)
    }

    pub fn reset(&mut self) {
        self.counters.clear();
    }
}

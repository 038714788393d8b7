//! One-dimensional value mappings used by rules.
//!
//! A [`Route`] describes an input domain `[min, max]`, an output range
//! `[tomin, tomax]` and the affine transform between them. When
//! `min > max` the domain is an exclusion interval: values strictly between
//! `max` and `min` are rejected and everything else passes.

use serde::{Deserialize, Serialize};

/// Affine mapping from an input domain to an output range.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub min: f64,
    pub max: f64,
    pub tomin: f64,
    pub tomax: f64,
    pub mul: f64,
    pub add: f64,
}

impl Route {
    /// Identity mapping over `[min, max]`.
    pub fn identity(min: f64, max: f64) -> Self {
        Self::affine(min, max, 1.0, 0.0)
    }

    /// Explicit multiplier/offset; the output range follows from the domain.
    pub fn affine(min: f64, max: f64, mul: f64, add: f64) -> Self {
        Self {
            min,
            max,
            tomin: min * mul + add,
            tomax: max * mul + add,
            mul,
            add,
        }
    }

    /// Map `[min, max]` onto `[tomin, tomax]`.
    ///
    /// A single-point domain cannot be scaled, so it keeps `mul = 1` and
    /// collapses onto the constant `tomin`.
    pub fn fromto(min: f64, max: f64, tomin: f64, tomax: f64) -> Self {
        let mul = if min == max {
            1.0
        } else {
            (tomax - tomin) / (max - min)
        };
        Self {
            min,
            max,
            tomin,
            tomax,
            mul,
            add: tomin - min * mul,
        }
    }

    /// Whether this route's domain is an exclusion interval.
    pub fn is_exclusion(&self) -> bool {
        self.min > self.max
    }

    /// Whether the domain spans more than one value.
    pub fn is_range(&self) -> bool {
        self.min < self.max
    }

    /// Test a value against the domain.
    pub fn contains(&self, value: f64) -> bool {
        if self.is_exclusion() {
            !(self.max < value && value < self.min)
        } else {
            self.min <= value && value <= self.max
        }
    }

    /// Linear transform of a value.
    pub fn apply(&self, value: f64) -> f64 {
        value * self.mul + self.add
    }

    /// Exponential transform: `tomin + (tomax-tomin)*(b^x - 1)/(b - 1)` with
    /// `b = 10^log` and `x` the position of `value` within the domain.
    ///
    /// Falls back to [`Route::apply`] when the curve is degenerate.
    pub fn apply_log(&self, value: f64, log: f64) -> f64 {
        let base = 10f64.powf(log);
        if !base.is_finite() || (base - 1.0).abs() < f64::EPSILON {
            return self.apply(value);
        }
        let x = if self.max == self.min {
            0.0
        } else {
            (value - self.min) / (self.max - self.min)
        };
        self.tomin + (self.tomax - self.tomin) * (base.powf(x) - 1.0) / (base - 1.0)
    }

    /// Narrow the domain to one value, keeping the transform.
    pub fn pinned(&self, value: f64) -> Self {
        Self {
            min: value,
            max: value,
            tomin: self.apply(value),
            tomax: self.apply(value),
            ..*self
        }
    }
}

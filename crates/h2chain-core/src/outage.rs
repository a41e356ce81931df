//! Stochastic failure model for plant agents.
//!
//! Each tick a plant that is not already failed draws a uniform value `v`
//! from its injected RNG. If `v` does not exceed the current risk the plant
//! fails for `floor(v * 100)` ticks. Risk rises by a fixed step for every
//! tick the plant overproduces and falls back by the same step otherwise,
//! never below the configured baseline.

use rand::Rng;

/// Upper bound (exclusive) of a failure duration in ticks.
pub const MAX_FAILURE_TICKS: u32 = 100;

/// Failure state and cumulative counters of one plant.
#[derive(Debug, Clone, PartialEq)]
pub struct OutageModel {
    baseline: f64,
    step: f64,
    current_risk: f64,
    in_failure: bool,
    ticks_remaining: u32,
    failure_ticks: u64,
    total_ticks: u64,
}

impl OutageModel {
    /// Create a model with `baseline` risk and the given drift step.
    pub fn new(baseline: f64, step: f64) -> Self {
        let baseline = if baseline.is_finite() {
            baseline.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            baseline,
            step: step.max(0.0),
            current_risk: baseline,
            in_failure: false,
            ticks_remaining: 0,
            failure_ticks: 0,
            total_ticks: 0,
        }
    }

    /// Advance the model by one tick. Returns `true` when the plant is
    /// offline for this tick.
    pub fn tick(&mut self, rng: &mut impl Rng) -> bool {
        self.total_ticks = self.total_ticks.saturating_add(1);

        if self.in_failure {
            self.ticks_remaining = self.ticks_remaining.saturating_sub(1);
            if self.ticks_remaining == 0 {
                self.in_failure = false;
                self.current_risk = self.baseline;
            }
        } else {
            let draw: f64 = rng.random();
            if draw <= self.current_risk {
                self.in_failure = true;
                self.ticks_remaining = failure_duration(draw);
            }
        }

        if self.in_failure {
            self.failure_ticks = self.failure_ticks.saturating_add(1);
        }
        self.in_failure
    }

    /// Drift the risk after a production step while online.
    pub fn after_production(&mut self, overproducing: bool) {
        self.current_risk = if overproducing {
            (self.current_risk + self.step).min(1.0)
        } else {
            (self.current_risk - self.step).max(self.baseline)
        };
    }

    /// Whether the plant is currently failed.
    pub const fn in_failure(&self) -> bool {
        self.in_failure
    }

    /// Ticks left in the current failure.
    pub const fn ticks_remaining(&self) -> u32 {
        self.ticks_remaining
    }

    /// Current probability of failing on the next draw.
    pub const fn current_risk(&self) -> f64 {
        self.current_risk
    }

    /// Configured baseline risk.
    pub const fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Fraction of all ticks spent offline.
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_ratio(&self) -> f64 {
        crate::ratio_or_zero(self.failure_ticks as f64, self.total_ticks as f64)
    }
}

/// Failure length for a triggering draw `v` in `[0, 1)`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn failure_duration(draw: f64) -> u32 {
    let ticks = (draw.clamp(0.0, 1.0) * f64::from(MAX_FAILURE_TICKS)).floor() as u32;
    ticks.min(MAX_FAILURE_TICKS.saturating_sub(1))
}

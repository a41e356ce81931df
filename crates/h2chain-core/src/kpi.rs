//! KPI derivation for plant agents.

use h2chain_types::{KpiReport, PlantId, PlantStatus};

use crate::conversion::{PlantRating, Planned};
use crate::ratio_or_zero;

/// Everything a plant observed during one production step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    /// Whether the plant was in a forced outage.
    pub offline: bool,
    /// Power granted.
    pub power: f64,
    /// Input resource granted.
    pub input: f64,
    /// Output produced.
    pub output: f64,
    /// Plan the grants were requested under.
    pub planned: Planned,
}

/// Tracks the overproduction streak and turns outcomes into reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KpiTracker {
    overproduction_streak: u32,
}

impl KpiTracker {
    /// Create a tracker with no streak.
    pub const fn new() -> Self {
        Self {
            overproduction_streak: 0,
        }
    }

    /// Current number of consecutive overproducing ticks.
    pub const fn overproduction_streak(&self) -> u32 {
        self.overproduction_streak
    }

    /// Build the report for one tick and update the streak.
    pub fn record(
        &mut self,
        plant_id: &PlantId,
        timestamp: &str,
        rating: &PlantRating,
        outcome: &TickOutcome,
        failure_ratio: f64,
    ) -> KpiReport {
        let capacity_ratio = ratio_or_zero(outcome.output, rating.nominal_output);
        self.overproduction_streak = if is_overproducing(capacity_ratio) {
            self.overproduction_streak.saturating_add(1)
        } else {
            0
        };
        KpiReport {
            timestamp: timestamp.to_owned(),
            plant_id: plant_id.clone(),
            status: status(outcome),
            efficiency: ratio_or_zero(outcome.output, outcome.power),
            productivity: ratio_or_zero(outcome.output, outcome.input),
            capacity_ratio,
            overproduction_streak: self.overproduction_streak,
            failure_ratio,
            production_loss: rating.loss_fraction(),
            nominal_output: rating.nominal_output,
            nominal_power: rating.nominal_power,
            nominal_input: rating.nominal_input,
        }
    }
}

/// A plant overproduces when its output exceeds nominal output.
pub fn is_overproducing(capacity_ratio: f64) -> bool {
    capacity_ratio > 1.0
}

/// Status of a tick; the first matching condition wins.
pub fn status(outcome: &TickOutcome) -> PlantStatus {
    if outcome.offline {
        PlantStatus::Offline
    } else if outcome.power <= 0.0 && outcome.planned.power > 0.0 {
        PlantStatus::PowerNotReceived
    } else if outcome.input <= 0.0 && outcome.planned.input > 0.0 {
        PlantStatus::ResourceNotReceived
    } else {
        PlantStatus::Online
    }
}

//! Demand planning and production formulas of a conversion plant.
//!
//! A plant is rated by its nominal input, power and output per tick and a
//! loss multiplier on input. Given a planned output the plant derives how
//! much input and power it needs; given what it actually received it
//! derives what it produces. Every quantity is rounded to four decimals
//! and every ratio with a zero denominator is zero.

use crate::config::PlantSpec;
use crate::{ratio_or_zero, round4};

/// Nominal constants of one plant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantRating {
    /// Input consumed per tick at nominal output.
    pub nominal_input: f64,
    /// Power drawn per tick at nominal output.
    pub nominal_power: f64,
    /// Output per tick at 100% performance.
    pub nominal_output: f64,
    /// Loss multiplier on input, at least 1.
    pub production_loss: f64,
}

/// What a plant intends to consume and produce in the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Planned {
    /// Planned input demand.
    pub input: f64,
    /// Planned power demand.
    pub power: f64,
    /// Planned output.
    pub output: f64,
}

impl From<&PlantSpec> for PlantRating {
    fn from(spec: &PlantSpec) -> Self {
        Self {
            nominal_input: spec.nominal_input_demand,
            nominal_power: spec.nominal_power_demand,
            nominal_output: spec.nominal_output,
            production_loss: spec.production_losses,
        }
    }
}

impl PlantRating {
    /// The plan a freshly started plant runs with.
    pub const fn nominal_plan(&self) -> Planned {
        Planned {
            input: self.nominal_input,
            power: self.nominal_power,
            output: self.nominal_output,
        }
    }

    /// Derive input and power demand for `planned_output`.
    pub fn calculate_demand(&self, planned_output: f64) -> Planned {
        let output = planned_output.max(0.0);
        let input_per_output = ratio_or_zero(self.nominal_input, self.nominal_output);
        let power_per_output = ratio_or_zero(self.nominal_power, self.nominal_output);
        Planned {
            input: round4(output * input_per_output * self.production_loss),
            power: round4(power_per_output * output),
            output,
        }
    }

    /// Output produced from `supplied_input` under `planned`.
    ///
    /// Below the planned input the plant converts linearly, losing input
    /// to the process; at or above it the plant produces exactly the
    /// planned output. The result never exceeds the planned output.
    pub fn produce(&self, planned: &Planned, supplied_input: f64) -> f64 {
        let supplied = supplied_input.max(0.0);
        let output = if supplied < planned.input {
            let output_per_input = ratio_or_zero(self.nominal_output, self.nominal_input);
            round4(ratio_or_zero(supplied * output_per_input, self.production_loss))
        } else {
            planned.output
        };
        output.min(planned.output).max(0.0)
    }

    /// Fraction of input lost to the process, `1 - 1/loss`.
    pub fn loss_fraction(&self) -> f64 {
        if self.production_loss <= 1.0 {
            0.0
        } else {
            1.0 - self.production_loss.recip()
        }
    }
}

/// How much of the planned input to request given the power actually
/// granted. Full power buys the full plan; partial power buys a
/// proportional share.
pub fn input_demand_for_power(planned: &Planned, power: f64) -> f64 {
    if power >= planned.power {
        planned.input
    } else if planned.power <= 0.0 {
        0.0
    } else {
        round4(power.max(0.0) / planned.power * planned.input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    const FILTER: PlantRating = PlantRating {
        nominal_input: 25.0,
        nominal_power: 6.0,
        nominal_output: 20.0,
        production_loss: 1.25,
    };

    #[test]
    fn demand_scales_with_planned_output() {
        let plan = FILTER.calculate_demand(10.0);
        // 10 * (25/20) * 1.25
        assert!(close(plan.input, 15.625));
        // (6/20) * 10
        assert!(close(plan.power, 3.0));
        assert!(close(plan.output, 10.0));
    }

    #[test]
    fn planned_input_produces_planned_output() {
        let plan = FILTER.calculate_demand(16.0);
        assert!(close(FILTER.produce(&plan, plan.input), 16.0));
        assert!(close(FILTER.produce(&plan, plan.input * 3.0), 16.0));
    }

    #[test]
    fn short_input_converts_linearly_with_loss() {
        let plan = FILTER.nominal_plan();
        // 10 * (20/25) / 1.25
        assert!(close(FILTER.produce(&plan, 10.0), 6.4));
        assert!(close(FILTER.produce(&plan, 0.0), 0.0));
        assert!(close(FILTER.produce(&plan, -3.0), 0.0));
    }

    #[test]
    fn output_never_exceeds_plan() {
        let plan = FILTER.calculate_demand(5.0);
        for input in [0.0, 1.0, 4.0, 7.8, 7.812_5, 100.0] {
            assert!(FILTER.produce(&plan, input) <= plan.output);
        }
    }

    #[test]
    fn zero_nominals_produce_zero() {
        let idle = PlantRating {
            nominal_input: 0.0,
            nominal_power: 0.0,
            nominal_output: 0.0,
            production_loss: 1.0,
        };
        let plan = idle.calculate_demand(10.0);
        assert!(close(plan.input, 0.0));
        assert!(close(plan.power, 0.0));
        let short = Planned {
            input: 5.0,
            power: 0.0,
            output: 10.0,
        };
        assert!(close(idle.produce(&short, 2.0), 0.0));
    }

    #[test]
    fn input_request_follows_power() {
        let plan = Planned {
            input: 20.0,
            power: 8.0,
            output: 16.0,
        };
        assert!(close(input_demand_for_power(&plan, 8.0), 20.0));
        assert!(close(input_demand_for_power(&plan, 12.0), 20.0));
        assert!(close(input_demand_for_power(&plan, 2.0), 5.0));
        assert!(close(input_demand_for_power(&plan, 0.0), 0.0));

        let unpowered = Planned {
            power: 0.0,
            ..plan
        };
        // Needs no power, so any grant covers the plan.
        assert!(close(input_demand_for_power(&unpowered, 0.0), 20.0));
    }

    #[test]
    fn loss_fraction() {
        assert!(close(FILTER.loss_fraction(), 0.2));
        let lossless = PlantRating {
            production_loss: 1.0,
            ..FILTER
        };
        assert!(close(lossless.loss_fraction(), 0.0));
    }
}

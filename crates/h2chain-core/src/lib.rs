//! Core negotiation engine for the h2chain simulation.
//!
//! Everything in this crate is synchronous and transport-agnostic. The
//! engine binary owns the bus and the task layout; the types here own the
//! protocol state and the arithmetic.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration with environment overrides
//! - [`clock`] -- Tick clock producing simulated timestamps
//! - [`topics`] -- Subject names on the bus
//! - [`machine`] -- Per-plant production gate
//! - [`outage`] -- Stochastic failure model
//! - [`conversion`] -- Demand planning and production formulas
//! - [`kpi`] -- KPI derivation and status ordering
//! - [`allocation`] -- Proportional and tiered allocation policies
//! - [`aggregator`] -- Per-resource collection and flush logic
//! - [`summary`] -- Rolling stage means
//! - [`plant`] -- Plant agent tying the pieces together
//! - [`sources`] -- Wind turbines, water pipe and hydrogen demand
//! - [`physics`] -- Wind power curve and synthetic weather

pub mod aggregator;
pub mod allocation;
pub mod clock;
pub mod config;
pub mod conversion;
pub mod kpi;
pub mod machine;
pub mod outage;
pub mod physics;
pub mod plant;
pub mod sources;
pub mod summary;
pub mod topics;

/// Round to four decimal places, the precision used for every quantity
/// that leaves a plant.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Round to two decimal places, the precision of stage summaries.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Divide, returning zero when the denominator is zero or not finite.
pub fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < f64::EPSILON || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_helpers() {
        assert!((round4(1.234_56) - 1.2346).abs() < 1e-12);
        assert!((round2(2.345_1) - 2.35).abs() < 1e-12);
    }

    #[test]
    fn zero_denominator_yields_zero() {
        assert!(ratio_or_zero(5.0, 0.0).abs() < f64::EPSILON);
        assert!((ratio_or_zero(5.0, 2.0) - 2.5).abs() < f64::EPSILON);
    }
}

//! Property tests for the failure model.

#![allow(clippy::unwrap_used)]

use h2chain_core::outage::{MAX_FAILURE_TICKS, OutageModel, failure_duration};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::SmallRng;

proptest! {
    #[test]
    fn failure_duration_is_bounded(draw in 0.0_f64..1.0) {
        prop_assert!(failure_duration(draw) < MAX_FAILURE_TICKS);
    }

    #[test]
    fn risk_never_drops_below_baseline_or_exceeds_one(
        baseline in 0.0_f64..0.2,
        step in 0.0_f64..0.05,
        seed in any::<u64>(),
        pattern in prop::collection::vec(any::<bool>(), 1..300),
    ) {
        let mut model = OutageModel::new(baseline, step);
        let mut rng = SmallRng::seed_from_u64(seed);
        for overproducing in pattern {
            let offline = model.tick(&mut rng);
            if !offline {
                model.after_production(overproducing);
            }
            prop_assert!(model.current_risk() >= model.baseline());
            prop_assert!(model.current_risk() <= 1.0);
            prop_assert!(model.ticks_remaining() < MAX_FAILURE_TICKS);
            let ratio = model.failure_ratio();
            prop_assert!((0.0..=1.0).contains(&ratio));
        }
    }
}

//! Property tests for the allocation policies.
//!
//! Whatever the demands, supply and KPIs, no policy may grant more than
//! the supply on offer, every grant stays within its demand, and plentiful
//! supply satisfies everyone under the proportional policy.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::collections::BTreeMap;

use h2chain_core::allocation::{AllocationPolicy, ProportionalPolicy, TieredPolicy, to_decimal};
use h2chain_core::config::TierThresholds;
use h2chain_types::{KpiReport, PlantId, PlantStatus, ResourceKind};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn demands_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0_f64..10_000.0, 1..8)
}

fn to_demands(values: &[f64]) -> BTreeMap<PlantId, Decimal> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            (
                PlantId::new(format!("plant-{i}")),
                to_decimal(*v).round_dp(4),
            )
        })
        .collect()
}

fn kpi_strategy() -> impl Strategy<Value = (bool, f64, f64, u32, f64)> {
    (
        any::<bool>(),
        0.0_f64..1.0,
        0.0_f64..2.0,
        0_u32..12,
        0.0_f64..500.0,
    )
}

fn to_kpis(
    demands: &BTreeMap<PlantId, Decimal>,
    raw: &[(bool, f64, f64, u32, f64)],
) -> BTreeMap<PlantId, KpiReport> {
    demands
        .keys()
        .zip(raw)
        .map(|(id, (offline, failure, cper, streak, nominal))| {
            (
                id.clone(),
                KpiReport {
                    timestamp: "2018-01-01T00:00:00".to_owned(),
                    plant_id: id.clone(),
                    status: if *offline {
                        PlantStatus::Offline
                    } else {
                        PlantStatus::Online
                    },
                    efficiency: 1.0,
                    productivity: 1.0,
                    capacity_ratio: *cper,
                    overproduction_streak: *streak,
                    failure_ratio: *failure,
                    production_loss: 0.05,
                    nominal_output: 1.0,
                    nominal_power: *nominal,
                    nominal_input: *nominal,
                },
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn proportional_never_grants_more_than_available(
        values in demands_strategy(),
        available in 0.0_f64..20_000.0,
    ) {
        let demands = to_demands(&values);
        let available = to_decimal(available);
        let record = ProportionalPolicy
            .allocate(&demands, available, &BTreeMap::new())
            .unwrap();
        prop_assert!(record.total() <= available);
        prop_assert_eq!(record.grants().len(), demands.len());
        for (id, demand) in &demands {
            prop_assert!(record.grant(id) >= Decimal::ZERO);
            prop_assert!(record.grant(id) <= *demand);
        }
    }

    #[test]
    fn proportional_satisfies_everyone_when_supply_suffices(
        values in demands_strategy(),
        surplus in 0.0_f64..1_000.0,
    ) {
        let demands = to_demands(&values);
        let total: Decimal = demands.values().copied().sum();
        let available = total + to_decimal(surplus);
        let record = ProportionalPolicy
            .allocate(&demands, available, &BTreeMap::new())
            .unwrap();
        for (id, demand) in &demands {
            prop_assert_eq!(record.grant(id), *demand);
        }
    }

    #[test]
    fn tiered_never_grants_more_than_available(
        values in demands_strategy(),
        raw in prop::collection::vec(kpi_strategy(), 8),
        available in 0.0_f64..20_000.0,
    ) {
        let demands = to_demands(&values);
        let kpis = to_kpis(&demands, &raw);
        let available = to_decimal(available);
        let record = TieredPolicy::new(ResourceKind::Power, TierThresholds::default())
            .allocate(&demands, available, &kpis)
            .unwrap();
        prop_assert!(record.total() <= available);
        for (id, demand) in &demands {
            let grant = record.grant(id);
            prop_assert!(grant >= Decimal::ZERO);
            prop_assert!(grant <= *demand);
            if kpis[id].status == PlantStatus::Offline {
                prop_assert_eq!(grant, Decimal::ZERO);
            }
        }
    }
}

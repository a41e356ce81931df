//! Allocation policies for rationing a scarce resource.
//!
//! An aggregator hands a policy the demand of every requester, the supply
//! available this tick and the latest KPI of each requester; the policy
//! returns one grant per requester. Grants are exact decimals with four
//! decimal places so that the conservation law can be checked without
//! floating-point drift:
//!
//! ```text
//! sum(grants) <= available
//! ```
//!
//! Both policies enforce it by construction and a final
//! [`enforce_conservation`] pass trims any residual excess.
//!
//! # Policies
//!
//! - [`ProportionalPolicy`] -- full demand when supply suffices, otherwise
//!   `demand / total_demand * available` per requester.
//! - [`TieredPolicy`] -- each requester is classified into a [`Tier`] from
//!   its KPI and granted `min(demand, cap, remaining / plants_left)`,
//!   walking requesters in ascending id order. The cap scales the
//!   requester's nominal draw of the resource being allocated: nominal
//!   power on the power stage, nominal input everywhere else.

use std::collections::BTreeMap;

use h2chain_types::{AllocationMode, KpiReport, PlantId, PlantStatus, ResourceKind};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;

use crate::config::TierThresholds;

/// Decimal places of every grant.
pub const GRANT_DECIMALS: u32 = 4;

/// Errors that can occur while computing an allocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// Decimal arithmetic overflowed.
    #[error("decimal overflow while computing {context}")]
    Overflow {
        /// Which quantity overflowed.
        context: &'static str,
    },
}

const fn overflow(context: &'static str) -> AllocationError {
    AllocationError::Overflow { context }
}

/// Per-tick mapping from requester to granted amount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationRecord {
    grants: BTreeMap<PlantId, Decimal>,
}

impl AllocationRecord {
    /// Build a record from explicit grants.
    pub const fn from_grants(grants: BTreeMap<PlantId, Decimal>) -> Self {
        Self { grants }
    }

    /// A record granting nothing to each of `requesters`.
    pub fn zeroed<'a>(requesters: impl IntoIterator<Item = &'a PlantId>) -> Self {
        Self {
            grants: requesters
                .into_iter()
                .map(|id| (id.clone(), Decimal::ZERO))
                .collect(),
        }
    }

    /// Amount granted to `requester`, zero if unknown.
    pub fn grant(&self, requester: &PlantId) -> Decimal {
        self.grants.get(requester).copied().unwrap_or(Decimal::ZERO)
    }

    /// All grants in requester order.
    pub const fn grants(&self) -> &BTreeMap<PlantId, Decimal> {
        &self.grants
    }

    /// Sum of all grants.
    pub fn total(&self) -> Decimal {
        checked_sum(self.grants.values().copied()).unwrap_or(Decimal::MAX)
    }
}

/// A rationing rule consumed by the aggregator.
pub trait AllocationPolicy: Send + Sync + std::fmt::Debug {
    /// The mode this policy implements.
    fn mode(&self) -> AllocationMode;

    /// Compute one grant per entry in `demands`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Overflow`] if decimal arithmetic overflows.
    fn allocate(
        &self,
        demands: &BTreeMap<PlantId, Decimal>,
        available: Decimal,
        kpis: &BTreeMap<PlantId, KpiReport>,
    ) -> Result<AllocationRecord, AllocationError>;
}

// ---------------------------------------------------------------------------
// Proportional
// ---------------------------------------------------------------------------

/// Shares supply in proportion to demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProportionalPolicy;

impl AllocationPolicy for ProportionalPolicy {
    fn mode(&self) -> AllocationMode {
        AllocationMode::Proportional
    }

    fn allocate(
        &self,
        demands: &BTreeMap<PlantId, Decimal>,
        available: Decimal,
        _kpis: &BTreeMap<PlantId, KpiReport>,
    ) -> Result<AllocationRecord, AllocationError> {
        let available = available.max(Decimal::ZERO);
        let demands: BTreeMap<PlantId, Decimal> = demands
            .iter()
            .map(|(id, demand)| (id.clone(), (*demand).max(Decimal::ZERO)))
            .collect();
        let total = checked_sum(demands.values().copied()).ok_or(overflow("total demand"))?;

        if total <= available {
            return Ok(AllocationRecord::from_grants(demands));
        }

        let mut grants = shares(&demands, total, available, RoundingStrategy::MidpointNearestEven)?;
        let rounded_total = checked_sum(grants.values().copied()).ok_or(overflow("grant total"))?;
        if rounded_total > available {
            grants = shares(&demands, total, available, RoundingStrategy::ToZero)?;
        }
        enforce_conservation(&mut grants, available)?;
        Ok(AllocationRecord::from_grants(grants))
    }
}

fn shares(
    demands: &BTreeMap<PlantId, Decimal>,
    total: Decimal,
    available: Decimal,
    strategy: RoundingStrategy,
) -> Result<BTreeMap<PlantId, Decimal>, AllocationError> {
    demands
        .iter()
        .map(|(id, demand)| -> Result<(PlantId, Decimal), AllocationError> {
            let share = demand
                .checked_mul(available)
                .and_then(|scaled| scaled.checked_div(total))
                .or_else(|| {
                    demand
                        .checked_div(total)
                        .and_then(|fraction| fraction.checked_mul(available))
                })
                .ok_or(overflow("proportional share"))?;
            Ok((
                id.clone(),
                share.round_dp_with_strategy(GRANT_DECIMALS, strategy),
            ))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tiered
// ---------------------------------------------------------------------------

/// KPI classification of a requester under the tiered policy.
///
/// Tiers are checked in declaration order and the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Long overproduction streak, or failing while over-productive: 0.8x.
    Throttled,
    /// Short streak, low loss, rarely fails: 1.5x.
    Premium,
    /// Moderate streak, very low loss, occasionally fails: 1.3x.
    Preferred,
    /// Streak under six ticks: 1.1x.
    Standard,
    /// Everything else: 1.0x.
    Baseline,
}

impl Tier {
    /// Classify a KPI report.
    pub fn classify(kpi: &KpiReport, thresholds: &TierThresholds) -> Self {
        let streak = kpi.overproduction_streak;
        if streak > 8 || (kpi.failure_ratio > thresholds.high && kpi.productivity > 1.0) {
            Self::Throttled
        } else if streak < 2 && kpi.production_loss < 0.3 && kpi.failure_ratio < thresholds.low {
            Self::Premium
        } else if streak < 4 && kpi.production_loss < 0.1 && kpi.failure_ratio < thresholds.mid {
            Self::Preferred
        } else if streak < 6 {
            Self::Standard
        } else {
            Self::Baseline
        }
    }

    /// Cap as a multiple of the requester's nominal demand.
    pub const fn multiplier(self) -> Decimal {
        match self {
            Self::Throttled => Decimal::from_parts(8, 0, 0, false, 1),
            Self::Premium => Decimal::from_parts(15, 0, 0, false, 1),
            Self::Preferred => Decimal::from_parts(13, 0, 0, false, 1),
            Self::Standard => Decimal::from_parts(11, 0, 0, false, 1),
            Self::Baseline => Decimal::ONE,
        }
    }
}

/// Grants capped by KPI tier and by an even split of what remains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TieredPolicy {
    resource: ResourceKind,
    thresholds: TierThresholds,
}

impl TieredPolicy {
    /// Create a policy allocating `resource` with the given failure
    /// thresholds.
    pub const fn new(resource: ResourceKind, thresholds: TierThresholds) -> Self {
        Self {
            resource,
            thresholds,
        }
    }

    /// Cap for one requester, or `None` when it must get nothing.
    fn cap(&self, kpi: Option<&KpiReport>) -> Option<Decimal> {
        let kpi = kpi.filter(|k| k.status != PlantStatus::Offline)?;
        let nominal = to_decimal(kpi.nominal_demand(self.resource)).max(Decimal::ZERO);
        Tier::classify(kpi, &self.thresholds)
            .multiplier()
            .checked_mul(nominal)
    }
}

impl AllocationPolicy for TieredPolicy {
    fn mode(&self) -> AllocationMode {
        AllocationMode::Adaptive
    }

    fn allocate(
        &self,
        demands: &BTreeMap<PlantId, Decimal>,
        available: Decimal,
        kpis: &BTreeMap<PlantId, KpiReport>,
    ) -> Result<AllocationRecord, AllocationError> {
        let mut remaining = available.max(Decimal::ZERO);
        let mut plants_left = Decimal::from(demands.len());
        let mut grants = BTreeMap::new();

        // BTreeMap iteration is ascending by requester id.
        for (id, demand) in demands {
            let grant = match self.cap(kpis.get(id)) {
                Some(cap) => {
                    let fair = remaining
                        .checked_div(plants_left)
                        .ok_or(overflow("fair share"))?;
                    (*demand)
                        .min(cap)
                        .min(fair)
                        .max(Decimal::ZERO)
                        .round_dp_with_strategy(GRANT_DECIMALS, RoundingStrategy::ToZero)
                }
                None => Decimal::ZERO,
            };
            remaining = remaining
                .checked_sub(grant)
                .ok_or(overflow("remaining supply"))?
                .max(Decimal::ZERO);
            plants_left = plants_left
                .checked_sub(Decimal::ONE)
                .ok_or(overflow("plant count"))?;
            grants.insert(id.clone(), grant);
        }

        enforce_conservation(&mut grants, available.max(Decimal::ZERO))?;
        Ok(AllocationRecord::from_grants(grants))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Trim grants, largest first, until their sum fits in `available`.
///
/// # Errors
///
/// Returns [`AllocationError::Overflow`] if the grant sum overflows.
pub fn enforce_conservation(
    grants: &mut BTreeMap<PlantId, Decimal>,
    available: Decimal,
) -> Result<(), AllocationError> {
    let total = checked_sum(grants.values().copied()).ok_or(overflow("grant total"))?;
    if total <= available {
        return Ok(());
    }
    let mut excess = total
        .checked_sub(available)
        .ok_or(overflow("grant excess"))?;
    warn!(
        total = %total,
        available = %available,
        excess = %excess,
        "grants exceed supply, trimming"
    );

    let mut by_size: Vec<(PlantId, Decimal)> =
        grants.iter().map(|(id, g)| (id.clone(), *g)).collect();
    by_size.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (id, amount) in by_size {
        if excess <= Decimal::ZERO {
            break;
        }
        let cut = amount.min(excess);
        let trimmed = amount.checked_sub(cut).ok_or(overflow("trimmed grant"))?;
        grants.insert(id, trimmed);
        excess = excess.checked_sub(cut).ok_or(overflow("grant excess"))?;
    }
    Ok(())
}

/// Convert a wire quantity to a decimal; non-finite values become zero.
pub fn to_decimal(value: f64) -> Decimal {
    if value.is_finite() {
        Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    }
}

/// Convert a decimal back to a wire quantity.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, Decimal::checked_add)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn demands(values: &[(&str, i64)]) -> BTreeMap<PlantId, Decimal> {
        values
            .iter()
            .map(|(id, v)| (PlantId::from(*id), dec(*v)))
            .collect()
    }

    fn grants_of(record: &AllocationRecord) -> Vec<Decimal> {
        record.grants().values().copied().collect()
    }

    fn kpi(id: &str, streak: u32, failure: f64, prod: f64, ploss: f64, nominal: f64) -> KpiReport {
        KpiReport {
            timestamp: "t".to_owned(),
            plant_id: PlantId::from(id),
            status: PlantStatus::Online,
            efficiency: 1.0,
            productivity: prod,
            capacity_ratio: 1.0,
            overproduction_streak: streak,
            failure_ratio: failure,
            production_loss: ploss,
            nominal_output: 1.0,
            nominal_power: nominal,
            nominal_input: nominal,
        }
    }

    fn tiered() -> TieredPolicy {
        TieredPolicy::new(ResourceKind::Power, TierThresholds::default())
    }

    fn kpis(reports: Vec<KpiReport>) -> BTreeMap<PlantId, KpiReport> {
        reports
            .into_iter()
            .map(|k| (k.plant_id.clone(), k))
            .collect()
    }

    #[test]
    fn proportional_scarcity_is_fair() {
        let record = ProportionalPolicy
            .allocate(&demands(&[("a", 90), ("b", 60)]), dec(100), &BTreeMap::new())
            .unwrap();
        assert_eq!(grants_of(&record), vec![dec(60), dec(40)]);
    }

    #[test]
    fn proportional_ten_twenty_thirty() {
        let d = demands(&[("a", 10), ("b", 20), ("c", 30)]);
        let scarce = ProportionalPolicy.allocate(&d, dec(30), &BTreeMap::new()).unwrap();
        assert_eq!(grants_of(&scarce), vec![dec(5), dec(10), dec(15)]);

        let plenty = ProportionalPolicy.allocate(&d, dec(60), &BTreeMap::new()).unwrap();
        assert_eq!(grants_of(&plenty), vec![dec(10), dec(20), dec(30)]);
    }

    #[test]
    fn proportional_full_satisfaction_is_exact() {
        let d = demands(&[("a", 7), ("b", 3)]);
        let record = ProportionalPolicy.allocate(&d, dec(1000), &BTreeMap::new()).unwrap();
        assert_eq!(record.grant(&PlantId::from("a")), dec(7));
        assert_eq!(record.grant(&PlantId::from("b")), dec(3));
    }

    #[test]
    fn proportional_shares_round_to_four_places() {
        let record = ProportionalPolicy
            .allocate(&demands(&[("a", 1), ("b", 2)]), dec(1), &BTreeMap::new())
            .unwrap();
        assert_eq!(
            grants_of(&record),
            vec![Decimal::new(3333, 4), Decimal::new(6667, 4)]
        );
        assert_eq!(record.total(), dec(1));
    }

    #[test]
    fn proportional_rounding_drift_is_truncated() {
        // Each exact share is 0.66665, a rounding midpoint.
        let d = demands(&[("a", 1), ("b", 1), ("c", 1)]);
        let available = Decimal::new(199_995, 5);
        let record = ProportionalPolicy.allocate(&d, available, &BTreeMap::new()).unwrap();
        assert!(record.total() <= available);
        for grant in record.grants().values() {
            assert!(grant.scale() <= GRANT_DECIMALS);
        }
    }

    #[test]
    fn proportional_clamps_negative_inputs() {
        let mut d = demands(&[("a", 10)]);
        d.insert(PlantId::from("b"), dec(-5));
        let record = ProportionalPolicy.allocate(&d, dec(4), &BTreeMap::new()).unwrap();
        assert_eq!(record.grant(&PlantId::from("b")), Decimal::ZERO);
        assert_eq!(record.grant(&PlantId::from("a")), dec(4));

        let record = ProportionalPolicy
            .allocate(&demands(&[("a", 10)]), dec(-1), &BTreeMap::new())
            .unwrap();
        assert_eq!(record.total(), Decimal::ZERO);
    }

    #[test]
    fn tier_one_wins_over_later_matches() {
        let thresholds = TierThresholds::default();
        // Streak 0 also satisfies the 1.1x and 1.0x tiers.
        let failing = kpi("a", 0, 0.5, 1.2, 0.0, 10.0);
        assert_eq!(Tier::classify(&failing, &thresholds), Tier::Throttled);
        let long_streak = kpi("a", 9, 0.0, 0.5, 0.0, 10.0);
        assert_eq!(Tier::classify(&long_streak, &thresholds), Tier::Throttled);
    }

    #[test]
    fn tier_ladder() {
        let t = TierThresholds::default();
        assert_eq!(Tier::classify(&kpi("a", 1, 0.01, 0.9, 0.2, 1.0), &t), Tier::Premium);
        assert_eq!(Tier::classify(&kpi("a", 3, 0.1, 0.9, 0.05, 1.0), &t), Tier::Preferred);
        assert_eq!(Tier::classify(&kpi("a", 5, 0.2, 0.9, 0.5, 1.0), &t), Tier::Standard);
        assert_eq!(Tier::classify(&kpi("a", 7, 0.2, 0.9, 0.5, 1.0), &t), Tier::Baseline);
    }

    #[test]
    fn tiered_caps_by_nominal_demand() {
        let policy = tiered();
        let reports = kpis(vec![
            // Throttled: cap 0.8 * 10 = 8.
            kpi("a", 9, 0.0, 0.5, 0.0, 10.0),
            // Premium: cap 1.5 * 10 = 15.
            kpi("b", 0, 0.0, 0.5, 0.0, 10.0),
        ]);
        let record = policy
            .allocate(&demands(&[("a", 20), ("b", 20)]), dec(100), &reports)
            .unwrap();
        assert_eq!(record.grant(&PlantId::from("a")), dec(8));
        assert_eq!(record.grant(&PlantId::from("b")), dec(15));
    }

    #[test]
    fn tiered_splits_remaining_supply_in_id_order() {
        let policy = tiered();
        let reports = kpis(vec![
            kpi("a", 0, 0.0, 0.5, 0.0, 100.0),
            kpi("b", 0, 0.0, 0.5, 0.0, 100.0),
            kpi("c", 0, 0.0, 0.5, 0.0, 100.0),
        ]);
        // a: min(5, 150, 30/3=10) = 5; b: min(50, 150, 25/2) = 12.5;
        // c: min(50, 150, 12.5/1) = 12.5.
        let record = policy
            .allocate(&demands(&[("c", 50), ("a", 5), ("b", 50)]), dec(30), &reports)
            .unwrap();
        assert_eq!(
            grants_of(&record),
            vec![dec(5), Decimal::new(125, 1), Decimal::new(125, 1)]
        );
    }

    #[test]
    fn tiered_skips_offline_and_unknown_requesters() {
        let policy = tiered();
        let mut offline = kpi("a", 0, 0.0, 0.5, 0.0, 100.0);
        offline.status = PlantStatus::Offline;
        let reports = kpis(vec![offline, kpi("c", 0, 0.0, 0.5, 0.0, 100.0)]);
        let record = policy
            .allocate(&demands(&[("a", 10), ("b", 10), ("c", 10)]), dec(30), &reports)
            .unwrap();
        assert_eq!(record.grant(&PlantId::from("a")), Decimal::ZERO);
        assert_eq!(record.grant(&PlantId::from("b")), Decimal::ZERO);
        // Only one plant left when c is reached, so it may take all of it.
        assert_eq!(record.grant(&PlantId::from("c")), dec(10));
    }

    #[test]
    fn tiered_cap_uses_the_draw_of_the_allocated_resource() {
        // A healthy electrolyzer: 3 kg/tick output, 750 kW, 0.03 m³ input.
        let report = KpiReport {
            nominal_output: 3.0,
            nominal_power: 750.0,
            nominal_input: 0.03,
            ..kpi("electrolyzer-1", 0, 0.0, 100.0, 0.05, 0.0)
        };
        let reports = kpis(vec![report]);

        let power = TieredPolicy::new(ResourceKind::Power, TierThresholds::default())
            .allocate(&demands(&[("electrolyzer-1", 750)]), dec(15_000), &reports)
            .unwrap();
        assert_eq!(power.grant(&PlantId::from("electrolyzer-1")), dec(750));

        // Premium cap on input is 1.5 * 0.03 = 0.045.
        let mut water = BTreeMap::new();
        water.insert(PlantId::from("electrolyzer-1"), Decimal::new(6, 2));
        let water = TieredPolicy::new(ResourceKind::DistilledWater, TierThresholds::default())
            .allocate(&water, dec(2), &reports)
            .unwrap();
        assert_eq!(
            water.grant(&PlantId::from("electrolyzer-1")),
            Decimal::new(45, 3)
        );
    }

    #[test]
    fn trimming_takes_from_largest_grants() {
        let mut grants = demands(&[("a", 5), ("b", 10)]);
        enforce_conservation(&mut grants, dec(12)).unwrap();
        assert_eq!(grants.get(&PlantId::from("a")), Some(&dec(5)));
        assert_eq!(grants.get(&PlantId::from("b")), Some(&dec(7)));
    }

    #[test]
    fn decimal_conversion() {
        assert_eq!(to_decimal(12.5), Decimal::new(125, 1));
        assert_eq!(to_decimal(f64::NAN), Decimal::ZERO);
        assert!((to_f64(Decimal::new(40_125, 4)) - 4.0125).abs() < 1e-12);
    }
}

//! Wire payloads exchanged on the bus.
//!
//! Every payload is flat JSON and carries the tick `timestamp` it belongs
//! to. Agents echo the timestamp they received and never mint their own,
//! so a message can always be correlated with the cycle that caused it.

use serde::{Deserialize, Serialize};

use crate::enums::{AllocationMode, AllocationQuality, PlantStatus, ResourceKind};
use crate::ids::PlantId;

/// Tick announcement broadcast by the clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickMessage {
    /// Monotonic tick sequence number, starting at 1.
    pub sequence: u64,
    /// Simulated time label, `YYYY-MM-DDTHH:MM:SS`.
    pub timestamp: String,
}

/// A consumer's demand for one resource in one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Tick the request belongs to.
    pub timestamp: String,
    /// Who is asking.
    pub requester_id: PlantId,
    /// Subject the grant should be published on.
    pub reply_topic: String,
    /// Requested quantity, never negative.
    pub amount: f64,
}

/// A producer's offer of one resource in one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSupply {
    /// Tick the supply belongs to.
    pub timestamp: String,
    /// Offered quantity, never negative.
    pub amount: f64,
    /// Optional producer identity, used to detect duplicate supplies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<PlantId>,
}

/// The amount granted to one requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReply {
    /// Tick the grant belongs to.
    pub timestamp: String,
    /// Granted quantity.
    pub amount: f64,
}

/// Planned per-supplier output for the next tick, sent upstream by an
/// aggregator after each flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedOutput {
    /// Tick the plan was derived from.
    pub timestamp: String,
    /// Output each supplier should aim for.
    pub amount: f64,
}

/// Per-tick performance report of one plant.
///
/// Field names on the wire are the short forms consumed by the adaptive
/// allocation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    /// Tick the report belongs to.
    pub timestamp: String,
    /// Reporting plant.
    pub plant_id: PlantId,
    /// Operating status this tick.
    pub status: PlantStatus,
    /// Output per unit of power.
    #[serde(rename = "eff")]
    pub efficiency: f64,
    /// Output per unit of input resource.
    #[serde(rename = "prod")]
    pub productivity: f64,
    /// Output relative to nominal output.
    #[serde(rename = "cper")]
    pub capacity_ratio: f64,
    /// Consecutive ticks with `cper > 1.0`.
    #[serde(rename = "soproduction")]
    pub overproduction_streak: u32,
    /// Fraction of all ticks spent in failure.
    #[serde(rename = "failure")]
    pub failure_ratio: f64,
    /// Fraction of input lost to the process.
    #[serde(rename = "ploss")]
    pub production_loss: f64,
    /// Rated output at full performance.
    #[serde(rename = "nominalo")]
    pub nominal_output: f64,
    /// Rated power draw at full performance, in kW.
    #[serde(rename = "npower")]
    pub nominal_power: f64,
    /// Rated input draw at full performance, in input units.
    #[serde(rename = "namount")]
    pub nominal_input: f64,
}

impl KpiReport {
    /// Rated draw of `resource`: power for the power stage, the input
    /// resource otherwise.
    pub const fn nominal_demand(&self, resource: ResourceKind) -> f64 {
        match resource {
            ResourceKind::Power => self.nominal_power,
            _ => self.nominal_input,
        }
    }
}

/// Per-tick supply summary of one resource stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    /// Tick the summary belongs to.
    pub timestamp: String,
    /// Summarized resource.
    pub resource: ResourceKind,
    /// Total supply offered this tick.
    pub total: f64,
    /// Rolling mean of positive totals over the summary window.
    pub mean: f64,
    /// True when the tick was flushed with peers missing.
    pub degraded: bool,
}

/// Observability record of one allocation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationReport {
    /// Tick the allocation belongs to.
    pub timestamp: String,
    /// Allocated resource.
    pub resource: ResourceKind,
    /// Policy in force.
    pub mode: AllocationMode,
    /// Whether every expected peer reported.
    pub quality: AllocationQuality,
    /// Supply available for distribution.
    pub available: f64,
    /// Sum of all requests.
    pub total_demand: f64,
    /// Sum of all grants.
    pub granted: f64,
    /// Requests received.
    pub requesters: usize,
    /// Requests expected.
    pub expected_requesters: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kpi_uses_short_field_names() {
        let kpi = KpiReport {
            timestamp: "2018-01-01T00:15:00".to_owned(),
            plant_id: PlantId::from("filter-1"),
            status: PlantStatus::Online,
            efficiency: 1.5,
            productivity: 0.9,
            capacity_ratio: 1.1,
            overproduction_streak: 3,
            failure_ratio: 0.02,
            production_loss: 0.05,
            nominal_output: 20.0,
            nominal_power: 6.0,
            nominal_input: 25.0,
        };
        let value = serde_json::to_value(&kpi).unwrap();
        for key in [
            "eff",
            "prod",
            "cper",
            "soproduction",
            "failure",
            "ploss",
            "nominalo",
            "npower",
            "namount",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["status"], "online");
        assert!((kpi.nominal_demand(ResourceKind::Power) - 6.0).abs() < f64::EPSILON);
        assert!((kpi.nominal_demand(ResourceKind::Water) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn anonymous_supply_parses_without_supplier() {
        let supply: ResourceSupply =
            serde_json::from_str(r#"{"timestamp":"2018-01-01T00:00:00","amount":12.5}"#).unwrap();
        assert!(supply.supplier_id.is_none());
        let json = serde_json::to_string(&supply).unwrap();
        assert!(!json.contains("supplier_id"));
    }
}

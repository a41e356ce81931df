//! Subject names on the bus.
//!
//! Subjects are dot-separated and share one prefix so several simulations
//! can run against the same NATS server. `*` matches one segment and `>`
//! matches the rest of a subject.

use h2chain_types::{PlantId, ResourceKind};

/// Builder for every subject the simulation publishes or subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    /// Create a subject builder under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Tick broadcasts.
    pub fn tick(&self) -> String {
        format!("{}.tick", self.prefix)
    }

    /// Plain-text speed factor updates for the clock.
    pub fn speed_factor(&self) -> String {
        format!("{}.tick.speed_factor", self.prefix)
    }

    /// Plain-text adaptive allocation toggle.
    pub fn adaptive_mode(&self) -> String {
        format!("{}.allocation.adaptive_mode", self.prefix)
    }

    /// Requests for `resource`.
    pub fn request(&self, resource: ResourceKind) -> String {
        format!("{}.{resource}.request", self.prefix)
    }

    /// Supplies of `resource`.
    pub fn supply(&self, resource: ResourceKind) -> String {
        format!("{}.{resource}.supply", self.prefix)
    }

    /// Grant of `resource` addressed to one requester.
    pub fn reply(&self, resource: ResourceKind, requester: &PlantId) -> String {
        format!("{}.{resource}.reply.{requester}", self.prefix)
    }

    /// Planned per-supplier output of `resource` for the next tick.
    pub fn plan(&self, resource: ResourceKind) -> String {
        format!("{}.{resource}.plan", self.prefix)
    }

    /// Stage summary of `resource`.
    pub fn summary(&self, resource: ResourceKind) -> String {
        format!("{}.{resource}.summary", self.prefix)
    }

    /// Every stage summary.
    pub fn all_summaries(&self) -> String {
        format!("{}.*.summary", self.prefix)
    }

    /// Allocation report of `resource`.
    pub fn allocation(&self, resource: ResourceKind) -> String {
        format!("{}.{resource}.allocation", self.prefix)
    }

    /// Every allocation report.
    pub fn all_allocations(&self) -> String {
        format!("{}.*.allocation", self.prefix)
    }

    /// KPI reports of one plant.
    pub fn kpi(&self, plant: &PlantId) -> String {
        format!("{}.kpi.{plant}", self.prefix)
    }

    /// KPI reports of every plant.
    pub fn all_kpis(&self) -> String {
        format!("{}.kpi.*", self.prefix)
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new("h2")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_are_prefixed_and_segmented() {
        let topics = Topics::default();
        assert_eq!(topics.tick(), "h2.tick");
        assert_eq!(
            topics.request(ResourceKind::FilteredWater),
            "h2.filtered_water.request"
        );
        assert_eq!(
            topics.reply(ResourceKind::Power, &PlantId::from("filter-1")),
            "h2.power.reply.filter-1"
        );
        assert_eq!(topics.kpi(&PlantId::from("distil-2")), "h2.kpi.distil-2");
    }

    #[test]
    fn speed_factor_is_not_a_tick() {
        let topics = Topics::new("sim");
        assert_ne!(topics.tick(), topics.speed_factor());
        assert_eq!(topics.speed_factor(), "sim.tick.speed_factor");
    }
}

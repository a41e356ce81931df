//! Observer of stage summaries, allocation reports and KPIs.
//!
//! Keeps the latest record of each kind in memory and logs them. Nothing
//! downstream depends on it.

use std::collections::BTreeMap;

use h2chain_core::topics::Topics;
use h2chain_types::{
    AllocationQuality, AllocationReport, KpiReport, PlantId, PlantStatus, ResourceKind,
    StageSummary,
};
use tracing::{debug, info, warn};

use crate::handlers::{Actor, Envelope, decode};

/// Latest observations across the pipeline.
#[derive(Debug, Default)]
pub struct Monitor {
    summaries: BTreeMap<ResourceKind, StageSummary>,
    allocations: BTreeMap<ResourceKind, AllocationReport>,
    kpis: BTreeMap<PlantId, KpiReport>,
    partial_allocations: u64,
    allocation_count: u64,
}

impl Monitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest summary per resource.
    pub const fn summaries(&self) -> &BTreeMap<ResourceKind, StageSummary> {
        &self.summaries
    }

    /// Latest allocation report per resource.
    pub const fn allocations(&self) -> &BTreeMap<ResourceKind, AllocationReport> {
        &self.allocations
    }

    /// Latest KPI per plant.
    pub const fn kpis(&self) -> &BTreeMap<PlantId, KpiReport> {
        &self.kpis
    }

    /// Allocations seen so far.
    pub const fn allocation_count(&self) -> u64 {
        self.allocation_count
    }

    /// Allocations flushed without every peer.
    pub const fn partial_allocations(&self) -> u64 {
        self.partial_allocations
    }

    fn on_summary(&mut self, summary: StageSummary) -> Vec<Envelope> {
        info!(
            resource = %summary.resource,
            timestamp = summary.timestamp,
            total = summary.total,
            mean = summary.mean,
            degraded = summary.degraded,
            "stage summary"
        );
        self.summaries.insert(summary.resource, summary);
        Vec::new()
    }

    fn on_allocation(&mut self, report: AllocationReport) -> Vec<Envelope> {
        self.allocation_count = self.allocation_count.saturating_add(1);
        if report.quality == AllocationQuality::Partial {
            self.partial_allocations = self.partial_allocations.saturating_add(1);
            warn!(
                resource = %report.resource,
                timestamp = report.timestamp,
                requesters = report.requesters,
                expected = report.expected_requesters,
                "degraded allocation"
            );
        } else {
            debug!(
                resource = %report.resource,
                timestamp = report.timestamp,
                available = report.available,
                demand = report.total_demand,
                granted = report.granted,
                "allocation"
            );
        }
        self.allocations.insert(report.resource, report);
        Vec::new()
    }

    fn on_kpi(&mut self, kpi: KpiReport) -> Vec<Envelope> {
        if kpi.status != PlantStatus::Online {
            debug!(plant_id = %kpi.plant_id, status = ?kpi.status, "plant not fully supplied");
        }
        self.kpis.insert(kpi.plant_id.clone(), kpi);
        Vec::new()
    }
}

/// Build the monitor actor.
pub fn actor(state: Monitor, topics: &Topics) -> Actor<Monitor> {
    Actor::new("monitor", state)
        .route(topics.all_summaries(), |s: &mut Monitor, msg| {
            Ok(s.on_summary(decode(msg)?))
        })
        .route(topics.all_allocations(), |s: &mut Monitor, msg| {
            Ok(s.on_allocation(decode(msg)?))
        })
        .route(topics.all_kpis(), |s: &mut Monitor, msg| {
            Ok(s.on_kpi(decode(msg)?))
        })
}

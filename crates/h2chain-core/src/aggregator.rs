//! Per-resource collection and flush logic.
//!
//! One [`ResourceAggregator`] exists per resource. Each tick it collects
//! one request from each of its N requesters and one supply from each of
//! its M suppliers, then flushes: it runs the active allocation policy and
//! returns one reply per requester together with the plan, summary and
//! report for the tick.
//!
//! # Cycle Rules
//!
//! - A cycle is keyed by the tick timestamp and opened by the first tick or
//!   message carrying it. Timestamps are ordered by the time they name, see
//!   [`compare_timestamps`].
//! - A message for a newer timestamp closes an unfinished cycle: if its
//!   bounded wait has already elapsed it is flushed as partial, otherwise
//!   it is abandoned.
//! - A message for an older timestamp, or for a cycle already flushed, is
//!   stale and dropped.
//! - A second request from the same requester overwrites the first.
//! - If peers are missing when the bounded wait elapses,
//!   [`ResourceAggregator::flush_overdue`] flushes what arrived and marks
//!   the allocation partial.
//! - Flushing with zero requests is a no-op.
//!
//! The bounded wait can be changed at runtime with
//! [`ResourceAggregator::set_partial_timeout`]; it applies to cycles opened
//! afterwards. The aggregator never reads a clock itself; callers pass
//! `now`.
//!
//! Hydrogen is requested by the external consumer, which reports no KPIs,
//! so that stage always allocates proportionally whatever the mode switch
//! says.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use h2chain_types::{
    AllocationMode, AllocationQuality, AllocationReport, KpiReport, PlannedOutput, PlantId,
    ResourceKind, ResourceReply, ResourceRequest, ResourceSupply, StageSummary,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::allocation::{
    AllocationPolicy, AllocationRecord, ProportionalPolicy, TieredPolicy, to_decimal, to_f64,
};
use crate::clock::compare_timestamps;
use crate::config::TierThresholds;
use crate::summary::RollingMean;
use crate::{ratio_or_zero, round4};

/// How many peers an aggregator waits for each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCounts {
    /// Expected requests per tick.
    pub requesters: usize,
    /// Expected supplies per tick.
    pub suppliers: usize,
}

/// Settings shared by every aggregator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorSettings {
    /// Policy in force at start-up.
    pub mode: AllocationMode,
    /// Thresholds of the tiered policy.
    pub thresholds: TierThresholds,
    /// Bounded wait for missing peers.
    pub partial_timeout: Duration,
    /// Length of the rolling summary window.
    pub summary_window: usize,
}

/// One grant ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundReply {
    /// Requester the grant belongs to.
    pub requester: PlantId,
    /// Subject taken from the request.
    pub topic: String,
    /// Payload.
    pub reply: ResourceReply,
}

/// Result of one flush.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Tick the allocation belongs to.
    pub timestamp: String,
    /// Allocated resource.
    pub resource: ResourceKind,
    /// Policy that produced the grants.
    pub mode: AllocationMode,
    /// Whether every expected peer reported.
    pub quality: AllocationQuality,
    /// Exact grants.
    pub record: AllocationRecord,
    /// One reply per requester, ascending by requester id.
    pub replies: Vec<OutboundReply>,
    /// Planned per-supplier output for the next tick.
    pub plan: PlannedOutput,
    /// Stage summary for the tick.
    pub summary: StageSummary,
    /// Observability record.
    pub report: AllocationReport,
}

/// Cumulative counters surviving across ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregatorStats {
    /// Flushes with every peer present.
    pub complete_flushes: u64,
    /// Flushes forced by the bounded wait.
    pub partial_flushes: u64,
    /// Cycles discarded by a newer tick before flushing.
    pub abandoned_cycles: u64,
    /// Messages dropped as stale.
    pub stale_messages: u64,
    /// Requests or supplies that overwrote an earlier one.
    pub duplicate_messages: u64,
    /// Sum of every grant ever made.
    pub granted_total: Decimal,
}

#[derive(Debug)]
struct Cycle {
    timestamp: String,
    requests: BTreeMap<PlantId, ResourceRequest>,
    named_supplies: BTreeMap<PlantId, f64>,
    anonymous_supplies: Vec<f64>,
    deadline: Instant,
    flushed: bool,
}

impl Cycle {
    fn new(timestamp: &str, deadline: Instant) -> Self {
        Self {
            timestamp: timestamp.to_owned(),
            requests: BTreeMap::new(),
            named_supplies: BTreeMap::new(),
            anonymous_supplies: Vec::new(),
            deadline,
            flushed: false,
        }
    }

    fn supply_count(&self) -> usize {
        self.named_supplies
            .len()
            .saturating_add(self.anonymous_supplies.len())
    }

    fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.supply_count() == 0
    }

    fn available(&self) -> f64 {
        self.named_supplies
            .values()
            .chain(self.anonymous_supplies.iter())
            .sum()
    }
}

/// Collects one resource's requests and supplies and allocates per tick.
#[derive(Debug)]
pub struct ResourceAggregator {
    resource: ResourceKind,
    peers: PeerCounts,
    mode: AllocationMode,
    proportional: Box<dyn AllocationPolicy>,
    adaptive: Box<dyn AllocationPolicy>,
    partial_timeout: Duration,
    cycle: Option<Cycle>,
    kpis: BTreeMap<PlantId, KpiReport>,
    rolling: RollingMean,
    stats: AggregatorStats,
}

impl ResourceAggregator {
    /// Create an aggregator with the proportional and tiered policies.
    pub fn new(resource: ResourceKind, peers: PeerCounts, settings: &AggregatorSettings) -> Self {
        Self {
            resource,
            peers,
            mode: settings.mode,
            proportional: Box::new(ProportionalPolicy),
            adaptive: Box::new(TieredPolicy::new(resource, settings.thresholds)),
            partial_timeout: settings.partial_timeout,
            cycle: None,
            kpis: BTreeMap::new(),
            rolling: RollingMean::new(settings.summary_window),
            stats: AggregatorStats::default(),
        }
    }

    /// Replace the policy used for `policy.mode()`.
    #[must_use]
    pub fn with_policy(mut self, policy: Box<dyn AllocationPolicy>) -> Self {
        match policy.mode() {
            AllocationMode::Proportional => self.proportional = policy,
            AllocationMode::Adaptive => self.adaptive = policy,
        }
        self
    }

    /// The resource this aggregator allocates.
    pub const fn resource(&self) -> ResourceKind {
        self.resource
    }

    /// Expected peers per tick.
    pub const fn peers(&self) -> PeerCounts {
        self.peers
    }

    /// Mode selected by the switch.
    pub const fn mode(&self) -> AllocationMode {
        self.mode
    }

    /// Policy the next flush will use.
    pub const fn effective_mode(&self) -> AllocationMode {
        if self.resource.requested_by_plants() {
            self.mode
        } else {
            AllocationMode::Proportional
        }
    }

    /// Bounded wait applied to newly opened cycles.
    pub const fn partial_timeout(&self) -> Duration {
        self.partial_timeout
    }

    /// Change the bounded wait for cycles opened from now on.
    pub fn set_partial_timeout(&mut self, timeout: Duration) {
        if self.partial_timeout != timeout {
            debug!(
                resource = %self.resource,
                timeout_ms = timeout.as_millis(),
                "partial flush timeout changed"
            );
            self.partial_timeout = timeout;
        }
    }

    /// Cumulative counters.
    pub const fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Timestamp of the open or last flushed cycle.
    pub fn current_timestamp(&self) -> Option<&str> {
        self.cycle.as_ref().map(|c| c.timestamp.as_str())
    }

    /// Switch policy. Takes effect at the next flush.
    pub fn set_mode(&mut self, mode: AllocationMode) {
        if self.mode != mode {
            info!(resource = %self.resource, mode = ?mode, "allocation mode changed");
            self.mode = mode;
            if self.effective_mode() != mode {
                info!(
                    resource = %self.resource,
                    "requesters report no KPIs, allocation stays proportional"
                );
            }
        }
    }

    /// Store the latest KPI of a requester for the tiered policy.
    pub fn record_kpi(&mut self, kpi: KpiReport) {
        if let Some(existing) = self.kpis.get(&kpi.plant_id) {
            if compare_timestamps(&existing.timestamp, &kpi.timestamp) == Ordering::Greater {
                debug!(
                    resource = %self.resource,
                    plant_id = %kpi.plant_id,
                    "ignoring KPI older than the one on file"
                );
                return;
            }
        }
        self.kpis.insert(kpi.plant_id.clone(), kpi);
    }

    /// Latest KPI on file for `plant`.
    pub fn kpi(&self, plant: &PlantId) -> Option<&KpiReport> {
        self.kpis.get(plant)
    }

    /// Tick boundary: open the cycle for `timestamp`. Returns the partial
    /// allocation of the previous cycle if its bounded wait had elapsed.
    pub fn on_tick(&mut self, timestamp: &str, now: Instant) -> Vec<Allocation> {
        self.advance_to(timestamp, now).0
    }

    /// Buffer a request. Returns the allocations it caused: the overdue
    /// previous cycle, this cycle if the request completed its set, or
    /// both.
    pub fn submit_request(&mut self, mut request: ResourceRequest, now: Instant) -> Vec<Allocation> {
        if !request.amount.is_finite() || request.amount < 0.0 {
            warn!(
                resource = %self.resource,
                requester = %request.requester_id,
                amount = request.amount,
                "clamping invalid request amount to zero"
            );
            request.amount = 0.0;
        }
        let (mut flushed, accepted) = self.advance_to(&request.timestamp, now);
        let Some(cycle) = self.cycle.as_mut().filter(|_| accepted) else {
            return flushed;
        };
        let requester = request.requester_id.clone();
        let replaced = cycle.requests.insert(requester.clone(), request).is_some();
        if replaced {
            warn!(
                resource = %self.resource,
                requester = %requester,
                "duplicate request within one tick, keeping the last"
            );
            self.stats.duplicate_messages = self.stats.duplicate_messages.saturating_add(1);
        }
        flushed.extend(self.try_flush());
        flushed
    }

    /// Buffer a supply. Returns the allocations it caused, as for
    /// [`Self::submit_request`].
    pub fn submit_supply(&mut self, supply: ResourceSupply, now: Instant) -> Vec<Allocation> {
        let mut amount = supply.amount;
        if !amount.is_finite() || amount < 0.0 {
            warn!(
                resource = %self.resource,
                amount = amount,
                "clamping invalid supply amount to zero"
            );
            amount = 0.0;
        }
        let (mut flushed, accepted) = self.advance_to(&supply.timestamp, now);
        let Some(cycle) = self.cycle.as_mut().filter(|_| accepted) else {
            return flushed;
        };
        match supply.supplier_id {
            Some(supplier) => {
                if cycle.named_supplies.insert(supplier.clone(), amount).is_some() {
                    warn!(
                        resource = %self.resource,
                        supplier = %supplier,
                        "duplicate supply within one tick, keeping the last"
                    );
                    self.stats.duplicate_messages =
                        self.stats.duplicate_messages.saturating_add(1);
                }
            }
            None => cycle.anonymous_supplies.push(amount),
        }
        flushed.extend(self.try_flush());
        flushed
    }

    /// Flush the open cycle if its bounded wait has elapsed.
    pub fn flush_overdue(&mut self, now: Instant) -> Option<Allocation> {
        let overdue = self
            .cycle
            .as_ref()
            .is_some_and(|c| !c.flushed && now >= c.deadline);
        if overdue {
            self.flush_partial()
        } else {
            None
        }
    }

    /// Flush the open cycle now with whatever has arrived.
    pub fn flush_partial(&mut self) -> Option<Allocation> {
        let peers = self.peers;
        let resource = self.resource;
        let cycle = self.cycle.as_mut().filter(|c| !c.flushed)?;
        if cycle.requests.is_empty() {
            warn!(
                resource = %resource,
                timestamp = cycle.timestamp,
                supplies = cycle.supply_count(),
                "no requests arrived before the deadline, nothing to allocate"
            );
            cycle.flushed = true;
            return None;
        }
        warn!(
            resource = %resource,
            timestamp = cycle.timestamp,
            requests = cycle.requests.len(),
            expected_requests = peers.requesters,
            supplies = cycle.supply_count(),
            expected_supplies = peers.suppliers,
            "flushing partial allocation"
        );
        self.flush(AllocationQuality::Partial)
    }

    /// Move to the cycle of `timestamp`. Returns the partial flush of a
    /// superseded overdue cycle, and whether a message for `timestamp`
    /// belongs in the open cycle.
    fn advance_to(&mut self, timestamp: &str, now: Instant) -> (Vec<Allocation>, bool) {
        let resource = self.resource;
        let Some(current) = self.cycle.as_ref() else {
            self.open_cycle(timestamp, now);
            return (Vec::new(), true);
        };
        match compare_timestamps(timestamp, &current.timestamp) {
            Ordering::Equal if current.flushed => {
                debug!(
                    resource = %resource,
                    timestamp = timestamp,
                    "message for an already flushed tick dropped"
                );
                self.stats.stale_messages = self.stats.stale_messages.saturating_add(1);
                (Vec::new(), false)
            }
            Ordering::Equal => (Vec::new(), true),
            Ordering::Less => {
                warn!(
                    resource = %resource,
                    timestamp = timestamp,
                    current = current.timestamp,
                    "stale message dropped"
                );
                self.stats.stale_messages = self.stats.stale_messages.saturating_add(1);
                (Vec::new(), false)
            }
            Ordering::Greater => {
                let unfinished = !current.flushed && !current.is_empty();
                let overdue = now >= current.deadline;
                let mut flushed = Vec::new();
                if unfinished && overdue {
                    flushed.extend(self.flush_partial());
                } else if unfinished {
                    warn!(
                        resource = %resource,
                        abandoned = current.timestamp,
                        requests = current.requests.len(),
                        supplies = current.supply_count(),
                        "new tick before allocation completed, discarding cycle"
                    );
                    self.stats.abandoned_cycles = self.stats.abandoned_cycles.saturating_add(1);
                }
                self.open_cycle(timestamp, now);
                (flushed, true)
            }
        }
    }

    fn open_cycle(&mut self, timestamp: &str, now: Instant) {
        let deadline = now.checked_add(self.partial_timeout).unwrap_or(now);
        self.cycle = Some(Cycle::new(timestamp, deadline));
    }

    fn try_flush(&mut self) -> Option<Allocation> {
        let ready = self.cycle.as_ref().is_some_and(|c| {
            !c.flushed
                && !c.requests.is_empty()
                && c.requests.len() >= self.peers.requesters
                && c.supply_count() >= self.peers.suppliers
        });
        if ready {
            self.flush(AllocationQuality::Complete)
        } else {
            None
        }
    }

    fn flush(&mut self, quality: AllocationQuality) -> Option<Allocation> {
        let mode = self.effective_mode();
        let cycle = self.cycle.as_mut().filter(|c| !c.flushed)?;
        cycle.flushed = true;

        let available = cycle.available();
        let demands: BTreeMap<PlantId, Decimal> = cycle
            .requests
            .iter()
            .map(|(id, request)| (id.clone(), to_decimal(request.amount)))
            .collect();
        let total_demand: f64 = cycle.requests.values().map(|r| r.amount).sum();

        let policy = match mode {
            AllocationMode::Proportional => &self.proportional,
            AllocationMode::Adaptive => &self.adaptive,
        };
        let record = match policy.allocate(&demands, to_decimal(available), &self.kpis) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    resource = %self.resource,
                    error = %e,
                    "allocation failed, granting nothing this tick"
                );
                AllocationRecord::zeroed(demands.keys())
            }
        };

        let timestamp = cycle.timestamp.clone();
        let replies: Vec<OutboundReply> = cycle
            .requests
            .values()
            .map(|request| OutboundReply {
                requester: request.requester_id.clone(),
                topic: request.reply_topic.clone(),
                reply: ResourceReply {
                    timestamp: timestamp.clone(),
                    amount: to_f64(record.grant(&request.requester_id)),
                },
            })
            .collect();

        let granted = record.total();
        self.stats.granted_total = self
            .stats
            .granted_total
            .checked_add(granted)
            .unwrap_or(Decimal::MAX);
        match quality {
            AllocationQuality::Complete => {
                self.stats.complete_flushes = self.stats.complete_flushes.saturating_add(1);
            }
            AllocationQuality::Partial => {
                self.stats.partial_flushes = self.stats.partial_flushes.saturating_add(1);
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let per_supplier = ratio_or_zero(total_demand, self.peers.suppliers as f64);
        let total = round4(available);
        let mean = self.rolling.push(total);
        let degraded = quality == AllocationQuality::Partial;

        debug!(
            resource = %self.resource,
            timestamp = timestamp,
            available = available,
            total_demand = total_demand,
            granted = %granted,
            "allocation flushed"
        );

        Some(Allocation {
            resource: self.resource,
            mode,
            quality,
            plan: PlannedOutput {
                timestamp: timestamp.clone(),
                amount: round4(per_supplier),
            },
            summary: StageSummary {
                timestamp: timestamp.clone(),
                resource: self.resource,
                total,
                mean,
                degraded,
            },
            report: AllocationReport {
                timestamp: timestamp.clone(),
                resource: self.resource,
                mode,
                quality,
                available: total,
                total_demand: round4(total_demand),
                granted: to_f64(granted),
                requesters: replies.len(),
                expected_requesters: self.peers.requesters,
            },
            record,
            replies,
            timestamp,
        })
    }
}

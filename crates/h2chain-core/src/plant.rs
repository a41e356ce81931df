//! Plant agent: one conversion stage behind a uniform negotiation contract.
//!
//! Per tick a plant:
//!
//! 1. resets its gate and rolls its outage model on the tick message,
//!    then requests power for its current plan;
//! 2. on the power grant, requests as much input as that power can
//!    process;
//! 3. on the input grant, converts input to output exactly once, supplies
//!    the output downstream and reports its KPIs.
//!
//! An offline plant still walks through every step with zero amounts, so
//! the aggregators upstream and downstream always hear from it.
//!
//! Handlers return the messages to publish instead of publishing
//! themselves; the caller owns the transport.

use std::cmp::Ordering;

use h2chain_types::{
    KpiReport, PlannedOutput, PlantId, PlantKind, ResourceKind, ResourceReply, ResourceRequest,
    ResourceSupply, TickMessage,
};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::clock::compare_timestamps;
use crate::config::PlantSpec;
use crate::conversion::{PlantRating, Planned, input_demand_for_power};
use crate::kpi::{KpiTracker, TickOutcome, is_overproducing};
use crate::machine::{PlantState, PlantStateMachine};
use crate::outage::OutageModel;
use crate::topics::Topics;

/// A message a plant wants published.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Request addressed to the aggregator of `resource`.
    Request {
        /// Requested resource.
        resource: ResourceKind,
        /// Payload.
        request: ResourceRequest,
    },
    /// Supply addressed to the aggregator of `resource`.
    Supply {
        /// Supplied resource.
        resource: ResourceKind,
        /// Payload.
        supply: ResourceSupply,
    },
    /// KPI report of this plant.
    Kpi(KpiReport),
}

#[derive(Debug, Clone)]
struct TickState {
    timestamp: String,
    offline: bool,
    planned: Planned,
    power: Option<f64>,
    input: Option<f64>,
}

/// One filter, distillation or electrolysis plant.
#[derive(Debug)]
pub struct PlantAgent<R> {
    id: PlantId,
    kind: PlantKind,
    rating: PlantRating,
    planned: Planned,
    power_reply_topic: String,
    input_reply_topic: String,
    machine: PlantStateMachine,
    outage: OutageModel,
    kpi: KpiTracker,
    current: Option<TickState>,
    rng: R,
}

impl<R: Rng> PlantAgent<R> {
    /// Create a plant running at its nominal plan.
    pub fn new(kind: PlantKind, spec: &PlantSpec, topics: &Topics, risk_step: f64, rng: R) -> Self {
        let id = PlantId::new(spec.id.clone());
        let rating = PlantRating::from(spec);
        Self {
            power_reply_topic: topics.reply(ResourceKind::Power, &id),
            input_reply_topic: topics.reply(kind.input(), &id),
            id,
            kind,
            planned: rating.nominal_plan(),
            rating,
            machine: PlantStateMachine::new(),
            outage: OutageModel::new(spec.failure_probability, risk_step),
            kpi: KpiTracker::new(),
            current: None,
            rng,
        }
    }

    /// Plant id.
    pub const fn id(&self) -> &PlantId {
        &self.id
    }

    /// Conversion stage.
    pub const fn kind(&self) -> PlantKind {
        self.kind
    }

    /// Plan the next tick will run under.
    pub const fn planned(&self) -> Planned {
        self.planned
    }

    /// Production gate state.
    pub fn state(&self) -> PlantState {
        self.machine.state()
    }

    /// Failure model.
    pub const fn outage(&self) -> &OutageModel {
        &self.outage
    }

    /// Subject this plant expects its power grant on.
    pub fn power_reply_topic(&self) -> &str {
        &self.power_reply_topic
    }

    /// Subject this plant expects its input grant on.
    pub fn input_reply_topic(&self) -> &str {
        &self.input_reply_topic
    }

    /// Output this plant would make from `input` under its current plan.
    pub fn produce(&self, input: f64) -> f64 {
        self.rating.produce(&self.planned, input)
    }

    /// Tick boundary: reset, roll for outages and request power.
    pub fn on_tick(&mut self, tick: &TickMessage) -> Vec<Outbound> {
        if self
            .current
            .as_ref()
            .is_some_and(|c| compare_timestamps(&c.timestamp, &tick.timestamp) != Ordering::Less)
        {
            debug!(plant_id = %self.id, timestamp = tick.timestamp, "repeated or old tick ignored");
            return Vec::new();
        }

        self.machine.reset_for_tick();
        let was_failed = self.outage.in_failure();
        let offline = self.outage.tick(&mut self.rng);
        if offline && !was_failed {
            warn!(
                plant_id = %self.id,
                ticks = self.outage.ticks_remaining(),
                "plant entered failure"
            );
        } else if was_failed && !offline {
            info!(plant_id = %self.id, "plant back online");
        }

        let planned = self.planned;
        self.current = Some(TickState {
            timestamp: tick.timestamp.clone(),
            offline,
            planned,
            power: None,
            input: None,
        });

        let amount = if offline { 0.0 } else { planned.power };
        vec![Outbound::Request {
            resource: ResourceKind::Power,
            request: ResourceRequest {
                timestamp: tick.timestamp.clone(),
                requester_id: self.id.clone(),
                reply_topic: self.power_reply_topic.clone(),
                amount,
            },
        }]
    }

    /// Adopt the planned output announced by the downstream aggregator.
    /// Applies from the next tick on.
    pub fn on_plan(&mut self, plan: &PlannedOutput) {
        self.planned = self.rating.calculate_demand(plan.amount);
        debug!(
            plant_id = %self.id,
            output = self.planned.output,
            input = self.planned.input,
            power = self.planned.power,
            "plan updated"
        );
    }

    /// Power grant: request input sized to the power received.
    pub fn on_power(&mut self, reply: &ResourceReply) -> Vec<Outbound> {
        let Some(state) = self.state_for(reply, "power") else {
            return Vec::new();
        };
        if state.power.is_some() {
            debug!(plant_id = %self.id, "duplicate power grant ignored");
            return Vec::new();
        }
        let power = reply.amount.max(0.0);
        state.power = Some(power);
        let amount = if state.offline {
            0.0
        } else {
            input_demand_for_power(&state.planned, power)
        };
        let timestamp = state.timestamp.clone();
        self.machine.receive_power();

        let mut out = vec![Outbound::Request {
            resource: self.kind.input(),
            request: ResourceRequest {
                timestamp,
                requester_id: self.id.clone(),
                reply_topic: self.input_reply_topic.clone(),
                amount,
            },
        }];
        out.extend(self.try_process());
        out
    }

    /// Input grant: produce if power has also arrived.
    pub fn on_input(&mut self, reply: &ResourceReply) -> Vec<Outbound> {
        let Some(state) = self.state_for(reply, "input") else {
            return Vec::new();
        };
        if state.input.is_some() {
            debug!(plant_id = %self.id, "duplicate input grant ignored");
            return Vec::new();
        }
        state.input = Some(reply.amount.max(0.0));
        self.machine.receive_dependency();
        self.try_process()
    }

    fn state_for(&mut self, reply: &ResourceReply, what: &str) -> Option<&mut TickState> {
        match self.current.as_mut() {
            Some(state) if state.timestamp == reply.timestamp => Some(state),
            Some(state) => {
                warn!(
                    plant_id = %self.id,
                    grant = what,
                    timestamp = reply.timestamp,
                    current = state.timestamp,
                    "stale grant dropped"
                );
                None
            }
            None => {
                warn!(plant_id = %self.id, grant = what, "grant before first tick dropped");
                None
            }
        }
    }

    fn try_process(&mut self) -> Vec<Outbound> {
        let Some(state) = self.current.as_ref() else {
            return Vec::new();
        };
        let (Some(power), Some(input)) = (state.power, state.input) else {
            return Vec::new();
        };
        if !self.machine.start_processing() {
            return Vec::new();
        }

        let output = if state.offline {
            0.0
        } else {
            self.rating.produce(&state.planned, input)
        };
        let outcome = TickOutcome {
            offline: state.offline,
            power,
            input,
            output,
            planned: state.planned,
        };
        let timestamp = state.timestamp.clone();
        self.machine.complete_processing();

        let report = self.kpi.record(
            &self.id,
            &timestamp,
            &self.rating,
            &outcome,
            self.outage.failure_ratio(),
        );
        if !outcome.offline {
            self.outage
                .after_production(is_overproducing(report.capacity_ratio));
        }
        debug!(
            plant_id = %self.id,
            timestamp = timestamp,
            power = power,
            input = input,
            output = output,
            status = ?report.status,
            "production step finished"
        );

        vec![
            Outbound::Supply {
                resource: self.kind.output(),
                supply: ResourceSupply {
                    timestamp,
                    amount: output,
                    supplier_id: Some(self.id.clone()),
                },
            },
            Outbound::Kpi(report),
        ]
    }
}

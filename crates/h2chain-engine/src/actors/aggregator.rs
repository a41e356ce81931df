//! Bus wiring for one [`ResourceAggregator`].

use std::time::Duration;

use h2chain_core::aggregator::{Allocation, ResourceAggregator};
use h2chain_core::config::{MIN_SPEED_FACTOR, PartialFlushTimeout};
use h2chain_core::topics::Topics;
use h2chain_types::{AllocationMode, KpiReport, ResourceRequest, ResourceSupply, TickMessage};
use tokio::time::Instant;
use tracing::debug;

use crate::handlers::{
    Actor, Envelope, collect_envelopes, decode, decode_speed_factor, decode_text,
};

/// Actor state wrapping one aggregator.
#[derive(Debug)]
pub struct AggregatorActor {
    aggregator: ResourceAggregator,
    topics: Topics,
    pacing: Option<PartialFlushTimeout>,
}

impl AggregatorActor {
    /// Wrap `aggregator`, publishing under `topics`.
    pub const fn new(aggregator: ResourceAggregator, topics: Topics) -> Self {
        Self {
            aggregator,
            topics,
            pacing: None,
        }
    }

    /// Rescale the bounded wait whenever the speed factor changes.
    #[must_use]
    pub const fn with_pacing(mut self, pacing: PartialFlushTimeout) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// The wrapped aggregator.
    pub const fn aggregator(&self) -> &ResourceAggregator {
        &self.aggregator
    }

    fn on_tick(&mut self, tick: &TickMessage) -> Vec<Envelope> {
        let allocations = self.aggregator.on_tick(&tick.timestamp, now());
        self.outgoing(allocations)
    }

    fn on_request(&mut self, request: ResourceRequest) -> Vec<Envelope> {
        let allocations = self.aggregator.submit_request(request, now());
        self.outgoing(allocations)
    }

    fn on_supply(&mut self, supply: ResourceSupply) -> Vec<Envelope> {
        let allocations = self.aggregator.submit_supply(supply, now());
        self.outgoing(allocations)
    }

    fn on_speed_factor(&mut self, speed_factor: f64) -> Vec<Envelope> {
        let Some(pacing) = self.pacing else {
            return Vec::new();
        };
        if speed_factor >= MIN_SPEED_FACTOR {
            self.aggregator
                .set_partial_timeout(pacing.at_speed(speed_factor));
        } else {
            debug!(speed_factor, "speed factor below minimum ignored");
        }
        Vec::new()
    }

    fn on_kpi(&mut self, kpi: KpiReport) -> Vec<Envelope> {
        self.aggregator.record_kpi(kpi);
        Vec::new()
    }

    fn on_mode(&mut self, raw: &str) -> Vec<Envelope> {
        self.aggregator.set_mode(AllocationMode::from_toggle(raw));
        Vec::new()
    }

    fn watchdog(&mut self) -> Vec<Envelope> {
        let allocation = self.aggregator.flush_overdue(now());
        self.outgoing(allocation)
    }

    fn outgoing(&self, allocations: impl IntoIterator<Item = Allocation>) -> Vec<Envelope> {
        let envelopes = allocations.into_iter().flat_map(|allocation| {
            let resource = allocation.resource;
            let replies: Vec<_> = allocation
                .replies
                .iter()
                .map(|out| Envelope::json(out.topic.as_str(), &out.reply))
                .collect();
            replies.into_iter().chain([
                Envelope::json(self.topics.plan(resource), &allocation.plan),
                Envelope::json(self.topics.summary(resource), &allocation.summary),
                Envelope::json(self.topics.allocation(resource), &allocation.report),
            ])
        });
        collect_envelopes(envelopes)
    }
}

/// Build the actor and its handler table.
///
/// The watchdog checks for an overdue cycle every `watchdog` period.
pub fn actor(state: AggregatorActor, watchdog: Duration) -> Actor<AggregatorActor> {
    let topics = state.topics.clone();
    let resource = state.aggregator.resource();
    Actor::new(format!("aggregator:{resource}"), state)
        .route(topics.tick(), |s: &mut AggregatorActor, msg| {
            Ok(s.on_tick(&decode(msg)?))
        })
        .route(topics.request(resource), |s: &mut AggregatorActor, msg| {
            Ok(s.on_request(decode(msg)?))
        })
        .route(topics.supply(resource), |s: &mut AggregatorActor, msg| {
            Ok(s.on_supply(decode(msg)?))
        })
        .route(topics.all_kpis(), |s: &mut AggregatorActor, msg| {
            Ok(s.on_kpi(decode(msg)?))
        })
        .route(topics.adaptive_mode(), |s: &mut AggregatorActor, msg| {
            Ok(s.on_mode(&decode_text(msg)?))
        })
        .route(topics.speed_factor(), |s: &mut AggregatorActor, msg| {
            Ok(s.on_speed_factor(decode_speed_factor(msg)?))
        })
        .every(watchdog, AggregatorActor::watchdog)
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

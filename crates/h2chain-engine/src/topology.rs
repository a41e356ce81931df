//! Builds and spawns every actor of the pipeline from configuration.
//!
//! | Resource          | Suppliers       | Requesters            |
//! |-------------------|-----------------|-----------------------|
//! | `power`           | wind turbines   | every plant           |
//! | `water`           | water pipe      | filter plants         |
//! | `filtered_water`  | filter plants   | distillation plants   |
//! | `distilled_water` | distillation    | electrolyzers         |
//! | `hydrogen`        | electrolyzers   | hydrogen demand       |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use h2chain_core::aggregator::{AggregatorSettings, PeerCounts, ResourceAggregator};
use h2chain_core::config::SimulationConfig;
use h2chain_core::physics::SyntheticWeather;
use h2chain_core::plant::PlantAgent;
use h2chain_core::sources::{HydrogenDemand, WaterPipe, WindFarm};
use h2chain_core::topics::Topics;
use h2chain_types::{PlantKind, ResourceKind};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::actors::aggregator::{self, AggregatorActor};
use crate::actors::monitor::{self, Monitor};
use crate::actors::plant::{self, PlantActor};
use crate::actors::sources::{self, HydrogenDemandActor, WaterPipeActor, WindFarmActor};
use crate::bus::Bus;
use crate::error::EngineError;

const MIN_WATCHDOG_PERIOD: Duration = Duration::from_millis(5);

/// Handles to every running actor.
#[derive(Debug)]
pub struct Topology {
    handles: Vec<JoinHandle<()>>,
    aggregators: BTreeMap<ResourceKind, Arc<Mutex<AggregatorActor>>>,
    monitor: Arc<Mutex<Monitor>>,
}

impl Topology {
    /// Spawn the monitor, the aggregators, the sources and the plants.
    ///
    /// Every subscription is active when this returns, so the tick driver
    /// can start right away.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Bus`] if a subscription fails.
    pub async fn spawn(config: &SimulationConfig, bus: Arc<dyn Bus>) -> Result<Self, EngineError> {
        let topics = Topics::new(config.infrastructure.topic_prefix.clone());
        let mut seeds = SeedSequence::new(config.outage.seed);
        let mut handles = Vec::new();

        let monitor_actor = monitor::actor(Monitor::new(), &topics);
        let monitor = monitor_actor.state();
        handles.extend(monitor_actor.spawn(Arc::clone(&bus)).await?);

        let pacing = config.partial_flush_pacing();
        let timeout = config.partial_flush_timeout();
        let settings = AggregatorSettings {
            mode: config.allocation.initial_mode(),
            thresholds: config.allocation.tiers,
            partial_timeout: timeout,
            summary_window: config.summary.window,
        };
        let watchdog = watchdog_period(timeout);
        let mut aggregators = BTreeMap::new();
        for resource in ResourceKind::ALL {
            let peers = peer_counts(config, resource);
            let state = AggregatorActor::new(
                ResourceAggregator::new(resource, peers, &settings),
                topics.clone(),
            )
            .with_pacing(pacing);
            let actor = aggregator::actor(state, watchdog);
            aggregators.insert(resource, actor.state());
            handles.extend(actor.spawn(Arc::clone(&bus)).await?);
            info!(
                resource = %resource,
                requesters = peers.requesters,
                suppliers = peers.suppliers,
                "aggregator started"
            );
        }

        let weather = SyntheticWeather::new(
            config.weather.clone(),
            config.clock.tick_minutes,
            seeds.next_rng(),
        );
        let farm = WindFarmActor::new(WindFarm::new(&config.wind_turbines, weather), &topics);
        handles.extend(
            sources::wind_farm(farm, &topics)
                .spawn(Arc::clone(&bus))
                .await?,
        );

        let pipe = WaterPipeActor::new(WaterPipe::new(&config.water_pipe), &topics);
        handles.extend(
            sources::water_pipe(pipe, &topics)
                .spawn(Arc::clone(&bus))
                .await?,
        );

        let demand = HydrogenDemandActor::new(
            HydrogenDemand::new(&config.hydrogen_demand, &topics, seeds.next_rng()),
            &topics,
        );
        handles.extend(
            sources::hydrogen_demand(demand, &topics)
                .spawn(Arc::clone(&bus))
                .await?,
        );

        for (kind, specs) in config.stages() {
            for spec in specs {
                let agent = PlantAgent::new(
                    kind,
                    spec,
                    &topics,
                    config.outage.risk_step,
                    seeds.next_rng(),
                );
                let state = PlantActor::new(agent, topics.clone());
                handles.extend(plant::actor(state).spawn(Arc::clone(&bus)).await?);
            }
        }

        info!(
            plants = config.plant_count(),
            turbines = config.wind_turbines.len(),
            tasks = handles.len(),
            "topology spawned"
        );
        Ok(Self {
            handles,
            aggregators,
            monitor,
        })
    }

    /// Shared monitor state.
    pub fn monitor(&self) -> Arc<Mutex<Monitor>> {
        Arc::clone(&self.monitor)
    }

    /// Shared state of the aggregator for `resource`.
    pub fn aggregator(&self, resource: ResourceKind) -> Option<Arc<Mutex<AggregatorActor>>> {
        self.aggregators.get(&resource).map(Arc::clone)
    }

    /// Log the cumulative counters of every aggregator.
    pub async fn log_stats(&self) {
        for (resource, state) in &self.aggregators {
            let stats = state.lock().await.aggregator().stats();
            info!(
                resource = %resource,
                complete = stats.complete_flushes,
                partial = stats.partial_flushes,
                abandoned = stats.abandoned_cycles,
                stale = stats.stale_messages,
                duplicates = stats.duplicate_messages,
                granted = %stats.granted_total,
                "aggregator totals"
            );
        }
    }

    /// Stop every actor task.
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// Expected requesters and suppliers of `resource` each tick.
pub fn peer_counts(config: &SimulationConfig, resource: ResourceKind) -> PeerCounts {
    let plants = |kind| config.plants(kind).len();
    let (requesters, suppliers) = match resource {
        ResourceKind::Power => (config.plant_count(), config.wind_turbines.len()),
        ResourceKind::Water => (plants(PlantKind::Filter), 1),
        ResourceKind::FilteredWater => {
            (plants(PlantKind::Distillation), plants(PlantKind::Filter))
        }
        ResourceKind::DistilledWater => (
            plants(PlantKind::Electrolyzer),
            plants(PlantKind::Distillation),
        ),
        ResourceKind::Hydrogen => (1, plants(PlantKind::Electrolyzer)),
    };
    PeerCounts {
        requesters,
        suppliers,
    }
}

fn watchdog_period(timeout: Duration) -> Duration {
    timeout
        .checked_div(10)
        .unwrap_or(timeout)
        .max(MIN_WATCHDOG_PERIOD)
}

/// Deterministic per-agent seeds derived from one base seed.
#[derive(Debug)]
struct SeedSequence {
    next: u64,
}

impl SeedSequence {
    const fn new(base: u64) -> Self {
        Self { next: base }
    }

    fn next_rng(&mut self) -> SmallRng {
        let seed = self.next;
        self.next = self.next.wrapping_add(1);
        SmallRng::seed_from_u64(seed)
    }
}

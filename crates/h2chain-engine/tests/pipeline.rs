//! End-to-end tests of the full pipeline on the in-process bus.
//!
//! Time is paused, so the tick driver and the aggregator watchdogs advance
//! virtual time only once every actor is idle.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use h2chain_core::aggregator::{AggregatorSettings, PeerCounts, ResourceAggregator};
use h2chain_core::config::{SimulationConfig, TierThresholds};
use h2chain_core::topics::Topics;
use h2chain_engine::actors::aggregator::{self, AggregatorActor};
use h2chain_engine::bus::{Bus, LocalBus};
use h2chain_engine::handlers::{Envelope, decode};
use h2chain_engine::tick_driver::{StopReason, TickDriver};
use h2chain_engine::topology::Topology;
use h2chain_types::{
    AllocationMode, AllocationQuality, AllocationReport, PlantId, ResourceKind, ResourceReply,
    ResourceRequest, ResourceSupply, TickMessage,
};

const LAST_OF_FOUR: &str = "2018-01-01T00:45:00";

fn config(max_ticks: u64) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.clock.max_ticks = max_ticks;
    config
}

async fn publish_json<T: serde::Serialize>(bus: &dyn Bus, topic: String, value: &T) {
    let envelope = Envelope::json(topic, value).unwrap();
    bus.publish(envelope.topic, envelope.payload).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn every_stage_allocates_each_tick() {
    let config = config(4);
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let topology = Topology::spawn(&config, Arc::clone(&bus)).await.unwrap();
    let topics = Topics::default();
    let mut hydrogen_replies = bus
        .subscribe(topics.reply(ResourceKind::Hydrogen, &PlantId::from("hydrogen-demand")))
        .await
        .unwrap();

    let driver = TickDriver::new(&config.clock, topics, Arc::clone(&bus))
        .await
        .unwrap();
    let result = driver.run(std::future::pending()).await.unwrap();
    assert_eq!(result.ticks, 4);
    assert_eq!(result.reason, StopReason::MaxTicks);

    let monitor = topology.monitor();
    let monitor = monitor.lock().await;
    assert_eq!(monitor.allocation_count(), 20);
    assert_eq!(monitor.partial_allocations(), 0);
    for resource in ResourceKind::ALL {
        let summary = &monitor.summaries()[&resource];
        assert_eq!(summary.timestamp, LAST_OF_FOUR, "{resource}");
        assert!(!summary.degraded);
        let report = &monitor.allocations()[&resource];
        assert_eq!(report.quality, AllocationQuality::Complete);
        assert!(report.granted <= report.available + 1e-9, "{resource}");
    }
    assert_eq!(monitor.kpis().len(), config.plant_count());
    assert!(monitor.kpis().values().all(|k| k.timestamp == LAST_OF_FOUR));
    drop(monitor);

    // The consumer hears back once per tick, echoing each tick's timestamp.
    let mut stamps = Vec::new();
    for _ in 0..4 {
        let reply: ResourceReply = decode(&hydrogen_replies.next().await.unwrap()).unwrap();
        stamps.push(reply.timestamp);
    }
    assert_eq!(stamps.last().map(String::as_str), Some(LAST_OF_FOUR));
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));

    for resource in ResourceKind::ALL {
        let state = topology.aggregator(resource).unwrap();
        let stats = state.lock().await.aggregator().stats();
        assert_eq!(stats.complete_flushes, 4, "{resource}");
        assert_eq!(stats.abandoned_cycles, 0, "{resource}");
    }
    topology.shutdown();
}

#[tokio::test(start_paused = true)]
async fn adaptive_toggle_reaches_every_aggregator() {
    let config = config(1);
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let topology = Topology::spawn(&config, Arc::clone(&bus)).await.unwrap();
    let topics = Topics::default();

    bus.publish(topics.adaptive_mode(), b"1".to_vec())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    for resource in ResourceKind::ALL {
        let state = topology.aggregator(resource).unwrap();
        assert_eq!(state.lock().await.aggregator().mode(), AllocationMode::Adaptive);
    }

    bus.publish(topics.adaptive_mode(), b"off".to_vec())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let state = topology.aggregator(ResourceKind::Power).unwrap();
    assert_eq!(state.lock().await.aggregator().mode(), AllocationMode::Proportional);
    topology.shutdown();
}

#[tokio::test(start_paused = true)]
async fn adaptive_mode_still_delivers_hydrogen() {
    let mut config = config(4);
    config.allocation.adaptive = true;
    for plant in config
        .filter_plants
        .iter_mut()
        .chain(&mut config.distillation_plants)
        .chain(&mut config.electrolyzers)
    {
        plant.failure_probability = 0.0;
    }
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let topology = Topology::spawn(&config, Arc::clone(&bus)).await.unwrap();
    let topics = Topics::default();
    let mut hydrogen_replies = bus
        .subscribe(topics.reply(ResourceKind::Hydrogen, &PlantId::from("hydrogen-demand")))
        .await
        .unwrap();

    let driver = TickDriver::new(&config.clock, topics, Arc::clone(&bus))
        .await
        .unwrap();
    let result = driver.run(std::future::pending()).await.unwrap();
    assert_eq!(result.ticks, 4);

    // The first tick has no KPIs on file, so the plants only start
    // receiving grants from the second tick on.
    let mut delivered = 0.0;
    for _ in 0..4 {
        let reply: ResourceReply = decode(&hydrogen_replies.next().await.unwrap()).unwrap();
        delivered += reply.amount;
    }
    assert!(delivered > 0.0, "no hydrogen delivered in adaptive mode");

    let monitor = topology.monitor();
    let monitor = monitor.lock().await;
    let power = &monitor.allocations()[&ResourceKind::Power];
    assert_eq!(power.mode, AllocationMode::Adaptive);
    assert!(power.granted > 0.0);
    let hydrogen = &monitor.allocations()[&ResourceKind::Hydrogen];
    assert_eq!(hydrogen.mode, AllocationMode::Proportional);
    drop(monitor);
    topology.shutdown();
}

#[tokio::test(start_paused = true)]
async fn faster_ticks_flush_missing_peer_as_partial() {
    let config = SimulationConfig::default();
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let topics = Topics::default();
    let state = AggregatorActor::new(
        ResourceAggregator::new(
            ResourceKind::Water,
            PeerCounts {
                requesters: 2,
                suppliers: 1,
            },
            &AggregatorSettings {
                mode: AllocationMode::Proportional,
                thresholds: TierThresholds::default(),
                partial_timeout: config.partial_flush_timeout(),
                summary_window: 96,
            },
        ),
        topics.clone(),
    )
    .with_pacing(config.partial_flush_pacing());
    // The watchdog is slower than the ticks, so only the tick boundary
    // can flush a cycle.
    let actor = aggregator::actor(state, Duration::from_secs(5));
    let state = actor.state();
    let handles = actor.spawn(Arc::clone(&bus)).await.unwrap();
    let mut reports = bus.subscribe(topics.allocation(ResourceKind::Water)).await.unwrap();

    bus.publish(topics.speed_factor(), b"300".to_vec())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        state.lock().await.aggregator().partial_timeout(),
        Duration::from_millis(80)
    );

    // 30 s ticks at 300x arrive every 100 ms; filter-2 never reports.
    let stamps = [
        "2018-01-01T00:00:00",
        "2018-01-01T00:00:30",
        "2018-01-01T00:01:00",
        "2018-01-01T00:01:30",
    ];
    for (sequence, ts) in (1..).zip(stamps) {
        publish_json(
            bus.as_ref(),
            topics.tick(),
            &TickMessage {
                sequence,
                timestamp: ts.to_owned(),
            },
        )
        .await;
        publish_json(
            bus.as_ref(),
            topics.supply(ResourceKind::Water),
            &ResourceSupply {
                timestamp: ts.to_owned(),
                amount: 60.0,
                supplier_id: Some(PlantId::from("water-pipe")),
            },
        )
        .await;
        publish_json(
            bus.as_ref(),
            topics.request(ResourceKind::Water),
            &ResourceRequest {
                timestamp: ts.to_owned(),
                requester_id: PlantId::from("filter-1"),
                reply_topic: topics.reply(ResourceKind::Water, &PlantId::from("filter-1")),
                amount: 25.0,
            },
        )
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for ts in &stamps[..3] {
        let report: AllocationReport = decode(&reports.next().await.unwrap()).unwrap();
        assert_eq!(report.timestamp, *ts);
        assert_eq!(report.quality, AllocationQuality::Partial);
        assert!((report.granted - 25.0).abs() < 1e-9);
    }
    let stats = state.lock().await.aggregator().stats();
    assert_eq!(stats.partial_flushes, 3);
    assert_eq!(stats.abandoned_cycles, 0);

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test(start_paused = true)]
async fn missing_peer_triggers_partial_flush_after_timeout() {
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let topics = Topics::default();
    let state = AggregatorActor::new(
        ResourceAggregator::new(
            ResourceKind::Water,
            PeerCounts {
                requesters: 2,
                suppliers: 1,
            },
            &AggregatorSettings {
                mode: AllocationMode::Proportional,
                thresholds: TierThresholds::default(),
                partial_timeout: Duration::from_millis(500),
                summary_window: 96,
            },
        ),
        topics.clone(),
    );
    let handles = aggregator::actor(state, Duration::from_millis(50))
        .spawn(Arc::clone(&bus))
        .await
        .unwrap();
    let mut replies = bus
        .subscribe("h2.water.reply.*".to_owned())
        .await
        .unwrap();
    let mut reports = bus.subscribe(topics.allocation(ResourceKind::Water)).await.unwrap();

    let ts = "2018-01-01T00:00:00";
    publish_json(
        bus.as_ref(),
        topics.supply(ResourceKind::Water),
        &ResourceSupply {
            timestamp: ts.to_owned(),
            amount: 60.0,
            supplier_id: Some(PlantId::from("water-pipe")),
        },
    )
    .await;
    publish_json(
        bus.as_ref(),
        topics.request(ResourceKind::Water),
        &ResourceRequest {
            timestamp: ts.to_owned(),
            requester_id: PlantId::from("filter-1"),
            reply_topic: topics.reply(ResourceKind::Water, &PlantId::from("filter-1")),
            amount: 25.0,
        },
    )
    .await;

    let started = tokio::time::Instant::now();
    let reply = replies.next().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(450));
    assert_eq!(reply.topic, "h2.water.reply.filter-1");
    let reply: ResourceReply = decode(&reply).unwrap();
    assert_eq!(reply.timestamp, ts);
    assert!((reply.amount - 25.0).abs() < 1e-9);

    let report: AllocationReport = decode(&reports.next().await.unwrap()).unwrap();
    assert_eq!(report.quality, AllocationQuality::Partial);
    assert_eq!(report.requesters, 1);
    assert_eq!(report.expected_requesters, 2);

    for handle in handles {
        handle.abort();
    }
}

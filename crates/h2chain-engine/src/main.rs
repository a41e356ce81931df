//! Engine binary for the h2chain simulation.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `h2chain-config.yaml` (or `H2CHAIN_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to NATS, or fall back to the in-process bus
//! 4. Spawn every aggregator, source and plant actor
//! 5. Broadcast ticks until the tick limit or Ctrl-C
//! 6. Log aggregator totals and stop

use std::path::PathBuf;
use std::sync::Arc;

use h2chain_core::config::{LogFormat, LoggingConfig, SimulationConfig};
use h2chain_core::topics::Topics;
use h2chain_engine::bus::{Bus, LocalBus};
use h2chain_engine::error::EngineError;
use h2chain_engine::nats_bus::NatsBus;
use h2chain_engine::tick_driver::TickDriver;
use h2chain_engine::topology::Topology;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "h2chain-config.yaml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    init_logging(&config.logging);

    info!(
        speed_factor = config.clock.speed_factor,
        max_ticks = config.clock.max_ticks,
        adaptive = config.allocation.adaptive,
        plants = config.plant_count(),
        "h2chain-engine starting"
    );

    let bus: Arc<dyn Bus> = match config.infrastructure.nats_url.as_deref() {
        Some(url) => Arc::new(NatsBus::connect(url).await.map_err(EngineError::from)?),
        None => {
            info!("no NATS URL configured, using the in-process bus");
            Arc::new(LocalBus::new())
        }
    };

    let topology = Topology::spawn(&config, Arc::clone(&bus)).await?;
    let topics = Topics::new(config.infrastructure.topic_prefix.clone());
    let driver = TickDriver::new(&config.clock, topics, Arc::clone(&bus)).await?;
    let result = driver.run(shutdown_signal()).await?;

    topology.log_stats().await;
    topology.shutdown();
    info!(
        ticks = result.ticks,
        reason = ?result.reason,
        "h2chain-engine shutdown complete"
    );
    Ok(())
}

/// Load configuration from `H2CHAIN_CONFIG` or the default path. Without
/// a file, defaults plus environment overrides are used.
fn load_config() -> Result<SimulationConfig, EngineError> {
    let path = std::env::var_os("H2CHAIN_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = if path.exists() {
        SimulationConfig::from_file(&path)?
    } else {
        let config = SimulationConfig::parse("")?;
        config.validate()?;
        config
    };
    Ok(config)
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, running until the tick limit");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

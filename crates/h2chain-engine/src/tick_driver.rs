//! Tick driver: broadcasts ticks at the clock's pace.
//!
//! The driver publishes one tick, then sleeps for the real interval at the
//! current speed factor. Speed factor updates arrive as plain text on
//! their own subject and take effect from the next sleep.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt as _;
use h2chain_core::clock::TickClock;
use h2chain_core::config::ClockConfig;
use h2chain_core::topics::Topics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::error::EngineError;
use crate::handlers::{Envelope, decode_speed_factor};

/// Why the driver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured tick limit was reached.
    MaxTicks,
    /// The shutdown signal fired.
    Shutdown,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    /// Ticks broadcast.
    pub ticks: u64,
    /// Why the loop ended.
    pub reason: StopReason,
}

/// Owns the clock and publishes ticks.
#[derive(Debug)]
pub struct TickDriver {
    clock: TickClock,
    max_ticks: u64,
    bus: Arc<dyn Bus>,
    topics: Topics,
    speed: watch::Receiver<f64>,
    speed_listener: JoinHandle<()>,
}

impl TickDriver {
    /// Build the clock and subscribe to speed factor updates.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Clock`] if the clock configuration is invalid
    /// or [`EngineError::Bus`] if the subscription fails.
    pub async fn new(
        config: &ClockConfig,
        topics: Topics,
        bus: Arc<dyn Bus>,
    ) -> Result<Self, EngineError> {
        let clock = TickClock::new(config)?;
        let (sender, speed) = watch::channel(clock.speed_factor());
        let mut updates = bus.subscribe(topics.speed_factor()).await?;
        let speed_listener = tokio::spawn(async move {
            while let Some(message) = updates.next().await {
                match decode_speed_factor(&message) {
                    Ok(factor) => {
                        if sender.send(factor).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "speed factor dropped"),
                }
            }
        });
        Ok(Self {
            clock,
            max_ticks: config.max_ticks,
            bus,
            topics,
            speed,
            speed_listener,
        })
    }

    /// Ticks broadcast so far.
    pub const fn sequence(&self) -> u64 {
        self.clock.sequence()
    }

    /// Broadcast ticks until the tick limit or `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Clock`] if the clock overflows or
    /// [`EngineError::Message`] if a tick cannot be encoded.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<RunResult, EngineError> {
        tokio::pin!(shutdown);
        let reason = loop {
            if self.max_ticks > 0 && self.clock.sequence() >= self.max_ticks {
                break StopReason::MaxTicks;
            }
            self.apply_speed_update();

            let tick = self.clock.next_tick()?;
            info!(sequence = tick.sequence, timestamp = tick.timestamp, "tick");
            let envelope = Envelope::json(self.topics.tick(), &tick)?;
            if let Err(e) = self.bus.publish(envelope.topic, envelope.payload).await {
                warn!(sequence = tick.sequence, error = %e, "tick publish failed");
            }

            tokio::select! {
                () = tokio::time::sleep(self.clock.real_interval()) => {}
                () = &mut shutdown => break StopReason::Shutdown,
            }
        };
        self.speed_listener.abort();
        if let Err(e) = self.bus.flush().await {
            warn!(error = %e, "final flush failed");
        }
        Ok(RunResult {
            ticks: self.clock.sequence(),
            reason,
        })
    }

    fn apply_speed_update(&mut self) {
        if !self.speed.has_changed().unwrap_or(false) {
            return;
        }
        let requested = *self.speed.borrow_and_update();
        if self.clock.set_speed_factor(requested) {
            info!(
                speed_factor = requested,
                interval_ms = self.clock.real_interval().as_millis(),
                "speed factor changed"
            );
        } else {
            debug!(speed_factor = requested, "speed factor below minimum ignored");
        }
    }
}

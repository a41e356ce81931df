//! Tick clock for the h2chain simulation.
//!
//! The clock is the single source of truth for simulated time. Each tick
//! carries a sequence number and a timestamp label; every agent echoes the
//! label so messages from one cycle can be correlated.
//!
//! # Design Principles
//!
//! - Simulated time advances by a fixed step per tick and never depends on
//!   wall-clock time.
//! - The real interval between ticks is `interval / speed_factor` and the
//!   speed factor can change while the simulation runs.
//! - All counter arithmetic is checked.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use h2chain_types::TickMessage;

use crate::config::{ClockConfig, MIN_SPEED_FACTOR};

/// Format of every timestamp label. Labels of this shape sort
/// chronologically as plain strings.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Order two timestamp labels by the time they name.
///
/// Labels in [`TIMESTAMP_FORMAT`] are compared as times, so padding does
/// not matter; anything else falls back to plain string order.
pub fn compare_timestamps(a: &str, b: &str) -> Ordering {
    let parse = |label: &str| NaiveDateTime::parse_from_str(label, TIMESTAMP_FORMAT);
    match (parse(a), parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter or simulated time would overflow.
    #[error("tick counter overflow: cannot advance further")]
    TickOverflow,

    /// Invalid clock configuration.
    #[error("invalid clock configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

/// Produces tick messages and tracks the pacing of the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct TickClock {
    next_time: NaiveDateTime,
    sequence: u64,
    step: TimeDelta,
    interval_secs: f64,
    speed_factor: f64,
}

impl TickClock {
    /// Create a clock from configuration. The first tick is stamped with
    /// the configured start time.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if the start time does not
    /// parse, the step is zero, or the pacing values are out of range.
    pub fn new(config: &ClockConfig) -> Result<Self, ClockError> {
        let next_time = NaiveDateTime::parse_from_str(&config.start, TIMESTAMP_FORMAT).map_err(
            |e| ClockError::InvalidConfig {
                reason: format!("start {:?}: {e}", config.start),
            },
        )?;
        if config.tick_minutes == 0 {
            return Err(ClockError::InvalidConfig {
                reason: "tick_minutes must be at least 1".to_owned(),
            });
        }
        let step = TimeDelta::try_minutes(i64::from(config.tick_minutes)).ok_or_else(|| {
            ClockError::InvalidConfig {
                reason: "tick_minutes out of range".to_owned(),
            }
        })?;
        if !config.interval_secs.is_finite() || config.interval_secs <= 0.0 {
            return Err(ClockError::InvalidConfig {
                reason: "interval_secs must be positive".to_owned(),
            });
        }
        if !config.speed_factor.is_finite() || config.speed_factor < MIN_SPEED_FACTOR {
            return Err(ClockError::InvalidConfig {
                reason: format!("speed_factor must be at least {MIN_SPEED_FACTOR}"),
            });
        }
        Ok(Self {
            next_time,
            sequence: 0,
            step,
            interval_secs: config.interval_secs,
            speed_factor: config.speed_factor,
        })
    }

    /// Emit the next tick and advance simulated time by one step.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the sequence or the
    /// simulated time cannot advance.
    pub fn next_tick(&mut self) -> Result<TickMessage, ClockError> {
        let sequence = self.sequence.checked_add(1).ok_or(ClockError::TickOverflow)?;
        let following = self
            .next_time
            .checked_add_signed(self.step)
            .ok_or(ClockError::TickOverflow)?;
        let timestamp = self.next_time.format(TIMESTAMP_FORMAT).to_string();
        self.sequence = sequence;
        self.next_time = following;
        Ok(TickMessage {
            sequence,
            timestamp,
        })
    }

    /// Number of ticks emitted so far.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Current speed factor.
    pub const fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    /// Change the speed factor. Values below the minimum (or not finite)
    /// are ignored; returns whether the value was accepted.
    pub fn set_speed_factor(&mut self, factor: f64) -> bool {
        if factor.is_finite() && factor >= MIN_SPEED_FACTOR {
            self.speed_factor = factor;
            true
        } else {
            false
        }
    }

    /// Real time to wait between two ticks at the current speed.
    pub fn real_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs / self.speed_factor)
            .unwrap_or(Duration::ZERO)
    }
}

//! Agents at the edges of the chain: wind turbines and the water pipe
//! supply raw resources, and the hydrogen demand generator consumes the
//! final product.

use h2chain_types::{PlantId, ResourceKind, ResourceReply, ResourceRequest, ResourceSupply, TickMessage};
use rand::Rng;
use tracing::{debug, info};

use crate::config::{HydrogenDemandConfig, TurbineSpec, WaterPipeConfig};
use crate::physics::{SyntheticWeather, WeatherSample, rotor_area, wind_power_kw};
use crate::topics::Topics;
use crate::{round2, round4};

/// One wind turbine.
#[derive(Debug, Clone, PartialEq)]
pub struct WindTurbine {
    id: PlantId,
    area: f64,
    rated_power_kw: f64,
}

impl WindTurbine {
    /// Create a turbine from its spec.
    pub fn new(spec: &TurbineSpec) -> Self {
        Self {
            id: PlantId::new(spec.id.clone()),
            area: rotor_area(spec.rotor_diameter_m),
            rated_power_kw: spec.rated_power_kw,
        }
    }

    /// Turbine id.
    pub const fn id(&self) -> &PlantId {
        &self.id
    }

    /// Output in kW under `weather`, capped at rated power.
    pub fn output_kw(&self, weather: &WeatherSample) -> f64 {
        round2(wind_power_kw(self.area, weather.density(), weather.wind_speed_kmh))
            .min(self.rated_power_kw)
    }
}

/// All turbines sharing one weather feed.
#[derive(Debug)]
pub struct WindFarm<R> {
    turbines: Vec<WindTurbine>,
    weather: SyntheticWeather<R>,
}

impl<R: Rng> WindFarm<R> {
    /// Create a farm of `turbines` driven by `weather`.
    pub fn new(turbines: &[TurbineSpec], weather: SyntheticWeather<R>) -> Self {
        Self {
            turbines: turbines.iter().map(WindTurbine::new).collect(),
            weather,
        }
    }

    /// Number of turbines.
    pub fn len(&self) -> usize {
        self.turbines.len()
    }

    /// Whether the farm has no turbines.
    pub fn is_empty(&self) -> bool {
        self.turbines.is_empty()
    }

    /// One power supply per turbine for this tick.
    pub fn on_tick(&mut self, tick: &TickMessage) -> Vec<ResourceSupply> {
        let weather = self.weather.next_sample();
        debug!(
            timestamp = tick.timestamp,
            wind_speed_kmh = weather.wind_speed_kmh,
            density = weather.density(),
            "weather sampled"
        );
        self.turbines
            .iter()
            .map(|turbine| ResourceSupply {
                timestamp: tick.timestamp.clone(),
                amount: turbine.output_kw(&weather),
                supplier_id: Some(turbine.id.clone()),
            })
            .collect()
    }
}

/// Fixed-volume raw water source.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterPipe {
    id: PlantId,
    volume: f64,
}

impl WaterPipe {
    /// Create the pipe from configuration.
    pub fn new(config: &WaterPipeConfig) -> Self {
        Self {
            id: PlantId::new(config.id.clone()),
            volume: config.volume_per_tick.max(0.0),
        }
    }

    /// The volume on offer this tick.
    pub fn on_tick(&self, tick: &TickMessage) -> ResourceSupply {
        ResourceSupply {
            timestamp: tick.timestamp.clone(),
            amount: self.volume,
            supplier_id: Some(self.id.clone()),
        }
    }
}

/// Consumer at the end of the chain.
///
/// Once per simulated day it draws a hydrogen target uniformly between
/// `daily_max / 1.25` and `daily_max * 1.25` kilograms, then requests an
/// equal slice of it every tick.
#[derive(Debug)]
pub struct HydrogenDemand<R> {
    id: PlantId,
    reply_topic: String,
    daily_max_kg: u32,
    ticks_per_day: u32,
    tick_in_day: u32,
    daily_target: f64,
    delivered_today: f64,
    current: Option<String>,
    rng: R,
}

impl<R: Rng> HydrogenDemand<R> {
    /// Create the consumer from configuration.
    pub fn new(config: &HydrogenDemandConfig, topics: &Topics, rng: R) -> Self {
        let id = PlantId::new(config.id.clone());
        Self {
            reply_topic: topics.reply(ResourceKind::Hydrogen, &id),
            id,
            daily_max_kg: config.daily_max_kg,
            ticks_per_day: config.ticks_per_day.max(1),
            tick_in_day: 0,
            daily_target: 0.0,
            delivered_today: 0.0,
            current: None,
            rng,
        }
    }

    /// Requester id.
    pub const fn id(&self) -> &PlantId {
        &self.id
    }

    /// Subject grants arrive on.
    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }

    /// Today's target in kg.
    pub const fn daily_target(&self) -> f64 {
        self.daily_target
    }

    /// Hydrogen received so far today, kg.
    pub const fn delivered_today(&self) -> f64 {
        self.delivered_today
    }

    /// Request this tick's slice, drawing a new daily target at day start.
    pub fn on_tick(&mut self, tick: &TickMessage) -> ResourceRequest {
        if self.tick_in_day == 0 {
            if self.current.is_some() {
                info!(
                    target_kg = self.daily_target,
                    delivered_kg = round4(self.delivered_today),
                    "hydrogen day closed"
                );
            }
            self.daily_target = self.draw_target();
            self.delivered_today = 0.0;
            info!(target_kg = self.daily_target, "new daily hydrogen target");
        }
        self.tick_in_day = self
            .tick_in_day
            .saturating_add(1)
            .checked_rem(self.ticks_per_day)
            .unwrap_or(0);
        self.current = Some(tick.timestamp.clone());

        ResourceRequest {
            timestamp: tick.timestamp.clone(),
            requester_id: self.id.clone(),
            reply_topic: self.reply_topic.clone(),
            amount: round4(self.daily_target / f64::from(self.ticks_per_day)),
        }
    }

    /// Record a grant for the current tick; stale grants are ignored.
    pub fn on_reply(&mut self, reply: &ResourceReply) {
        if self.current.as_deref() == Some(reply.timestamp.as_str()) {
            self.delivered_today += reply.amount.max(0.0);
        } else {
            debug!(timestamp = reply.timestamp, "stale hydrogen grant ignored");
        }
    }

    fn draw_target(&mut self) -> f64 {
        let low = self
            .daily_max_kg
            .checked_mul(4)
            .map_or(self.daily_max_kg, |v| v / 5);
        let high = self
            .daily_max_kg
            .checked_mul(5)
            .map_or(self.daily_max_kg, |v| v / 4);
        f64::from(self.rng.random_range(low..=high.max(low)))
    }
}

//! Configuration loading and typed config structures for the h2chain simulation.
//!
//! The canonical configuration lives in `h2chain-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, applies environment overrides on top, and validates the
//! result before any agent is started.
//!
//! # Environment Overrides
//!
//! - `NATS_URL` overrides `infrastructure.nats_url`
//! - `H2_ADAPTIVE_MODE` overrides `allocation.adaptive` (`true`, `True`, `1`)
//! - `H2_SPEED_FACTOR` overrides `clock.speed_factor`
//! - `H2_MAX_TICKS` overrides `clock.max_ticks`
//! - `H2_SEED` overrides `outage.seed`
//! - `{FILTER_PLANT|DISTIL_PLANT|ELECTROLYZER}_{ID}_{FIELD}` overrides a
//!   single plant constant, where `ID` is the plant id upper-cased with
//!   dashes replaced by underscores and `FIELD` is one of
//!   `NOMINAL_INPUT_DEMAND`, `NOMINAL_POWER_DEMAND`, `NOMINAL_OUTPUT`,
//!   `PRODUCTION_LOSSES`, `FAILURE_PROBABILITY`.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use h2chain_types::{AllocationMode, PlantKind};
use serde::Deserialize;

/// Smallest speed factor the clock accepts.
pub const MIN_SPEED_FACTOR: f64 = 0.1;

/// Share of one real tick an aggregator waits for missing peers.
pub const PARTIAL_FLUSH_SHARE: f64 = 0.8;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for environment override {name}")]
    EnvOverride {
        /// Variable name.
        name: String,
        /// Raw value found in the environment.
        value: String,
    },

    /// The configuration parsed but describes an impossible setup.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
///
/// Mirrors the structure of `h2chain-config.yaml`. Every section has
/// defaults describing a small two-plants-per-stage pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Tick clock settings.
    #[serde(default)]
    pub clock: ClockConfig,

    /// Transport settings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Allocation policy settings.
    #[serde(default)]
    pub allocation: AllocationConfig,

    /// Failure model settings shared by all plants.
    #[serde(default)]
    pub outage: OutageConfig,

    /// Synthetic weather feeding the wind turbines.
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Power producers.
    #[serde(default = "default_wind_turbines")]
    pub wind_turbines: Vec<TurbineSpec>,

    /// Raw water source.
    #[serde(default)]
    pub water_pipe: WaterPipeConfig,

    /// Filtration stage.
    #[serde(default = "default_filter_plants")]
    pub filter_plants: Vec<PlantSpec>,

    /// Distillation stage.
    #[serde(default = "default_distillation_plants")]
    pub distillation_plants: Vec<PlantSpec>,

    /// Electrolysis stage.
    #[serde(default = "default_electrolyzers")]
    pub electrolyzers: Vec<PlantSpec>,

    /// Hydrogen consumer at the end of the chain.
    #[serde(default)]
    pub hydrogen_demand: HydrogenDemandConfig,

    /// Stage summary settings.
    #[serde(default)]
    pub summary: SummaryConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            infrastructure: InfrastructureConfig::default(),
            logging: LoggingConfig::default(),
            allocation: AllocationConfig::default(),
            outage: OutageConfig::default(),
            weather: WeatherConfig::default(),
            wind_turbines: default_wind_turbines(),
            water_pipe: WaterPipeConfig::default(),
            filter_plants: default_filter_plants(),
            distillation_plants: default_distillation_plants(),
            electrolyzers: default_electrolyzers(),
            hydrogen_demand: HydrogenDemandConfig::default(),
            summary: SummaryConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Load, override from the process environment, and validate
    /// configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML,
    /// [`ConfigError::EnvOverride`] if an override does not parse, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::parse(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string and apply overrides from the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::EnvOverride`] if an override does not parse.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse_with_env(yaml, &|name| std::env::var(name).ok())
    }

    /// Parse configuration from a YAML string with an explicit variable
    /// lookup for overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::EnvOverride`] if an override does not parse.
    pub fn parse_with_env(
        yaml: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides(lookup)?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvOverride`] if a numeric override does not
    /// parse.
    pub fn apply_env_overrides(
        &mut self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        self.infrastructure.apply_env_overrides(lookup);
        if let Some(raw) = lookup("H2_ADAPTIVE_MODE") {
            self.allocation.adaptive = AllocationMode::from_toggle(&raw) == AllocationMode::Adaptive;
        }
        if let Some(value) = parse_override(lookup, "H2_SPEED_FACTOR")? {
            self.clock.speed_factor = value;
        }
        if let Some(value) = parse_override(lookup, "H2_MAX_TICKS")? {
            self.clock.max_ticks = value;
        }
        if let Some(value) = parse_override(lookup, "H2_SEED")? {
            self.outage.seed = value;
        }
        for (kind, plants) in [
            (PlantKind::Filter, &mut self.filter_plants),
            (PlantKind::Distillation, &mut self.distillation_plants),
            (PlantKind::Electrolyzer, &mut self.electrolyzers),
        ] {
            for plant in plants.iter_mut() {
                plant.apply_env_overrides(kind, lookup)?;
            }
        }
        Ok(())
    }

    /// Check that the configuration describes a runnable pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock.validate()?;
        self.allocation.tiers.validate()?;

        if self.wind_turbines.is_empty() {
            return Err(invalid("at least one wind turbine must be configured"));
        }
        for (kind, plants) in self.stages() {
            if plants.is_empty() {
                return Err(invalid(format!("the {kind:?} stage has no plants")));
            }
            for plant in plants {
                plant.validate()?;
            }
        }
        for turbine in &self.wind_turbines {
            if !is_non_negative(turbine.rotor_diameter_m) || !is_non_negative(turbine.rated_power_kw)
            {
                return Err(invalid(format!(
                    "turbine {} has a negative or non-finite rating",
                    turbine.id
                )));
            }
        }
        if !is_non_negative(self.water_pipe.volume_per_tick) {
            return Err(invalid("water_pipe.volume_per_tick must be non-negative"));
        }
        if self.hydrogen_demand.ticks_per_day == 0 {
            return Err(invalid("hydrogen_demand.ticks_per_day must be at least 1"));
        }
        if self.summary.window == 0 {
            return Err(invalid("summary.window must be at least 1"));
        }
        if !is_non_negative(self.outage.risk_step) {
            return Err(invalid("outage.risk_step must be non-negative"));
        }

        let mut seen = BTreeSet::new();
        for id in self.agent_ids() {
            if id.is_empty()
                || id
                    .chars()
                    .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
            {
                return Err(invalid(format!(
                    "agent id {id:?} must be a single non-empty subject segment"
                )));
            }
            if !seen.insert(id) {
                return Err(invalid(format!("duplicate agent id {id}")));
            }
        }
        Ok(())
    }

    /// The three conversion stages with their plants, in chain order.
    pub fn stages(&self) -> [(PlantKind, &[PlantSpec]); 3] {
        [
            (PlantKind::Filter, self.filter_plants.as_slice()),
            (PlantKind::Distillation, self.distillation_plants.as_slice()),
            (PlantKind::Electrolyzer, self.electrolyzers.as_slice()),
        ]
    }

    /// The plants of one stage.
    pub fn plants(&self, kind: PlantKind) -> &[PlantSpec] {
        match kind {
            PlantKind::Filter => &self.filter_plants,
            PlantKind::Distillation => &self.distillation_plants,
            PlantKind::Electrolyzer => &self.electrolyzers,
        }
    }

    /// Total number of conversion plants across all stages.
    pub fn plant_count(&self) -> usize {
        self.stages().iter().map(|(_, plants)| plants.len()).sum()
    }

    /// How the bounded wait for missing peers follows the tick pace.
    pub fn partial_flush_pacing(&self) -> PartialFlushTimeout {
        PartialFlushTimeout {
            interval_secs: self.clock.interval_secs,
            configured: self
                .allocation
                .partial_flush_timeout_ms
                .map(Duration::from_millis),
        }
    }

    /// How long an aggregator waits for missing peers before flushing a
    /// partial allocation, at the configured speed factor.
    pub fn partial_flush_timeout(&self) -> Duration {
        self.partial_flush_pacing().at_speed(self.clock.speed_factor)
    }

    fn agent_ids(&self) -> impl Iterator<Item = &str> {
        self.wind_turbines
            .iter()
            .map(|t| t.id.as_str())
            .chain(std::iter::once(self.water_pipe.id.as_str()))
            .chain(std::iter::once(self.hydrogen_demand.id.as_str()))
            .chain(self.filter_plants.iter().map(|p| p.id.as_str()))
            .chain(self.distillation_plants.iter().map(|p| p.id.as_str()))
            .chain(self.electrolyzers.iter().map(|p| p.id.as_str()))
    }
}

/// Tick clock configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClockConfig {
    /// Simulated time of the first tick, `YYYY-MM-DDTHH:MM:SS`.
    #[serde(default = "default_start")]
    pub start: String,

    /// Simulated minutes per tick.
    #[serde(default = "default_tick_minutes")]
    pub tick_minutes: u32,

    /// Real seconds per tick before the speed factor is applied.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,

    /// Speed-up applied to the real interval.
    #[serde(default = "default_speed_factor")]
    pub speed_factor: f64,

    /// Stop after this many ticks; 0 runs until interrupted.
    #[serde(default)]
    pub max_ticks: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            tick_minutes: default_tick_minutes(),
            interval_secs: default_interval_secs(),
            speed_factor: default_speed_factor(),
            max_ticks: 0,
        }
    }
}

impl ClockConfig {
    /// Real wall-clock time between two ticks at the configured speed.
    pub fn real_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs / self.speed_factor.max(MIN_SPEED_FACTOR))
            .unwrap_or(Duration::ZERO)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_minutes == 0 {
            return Err(invalid("clock.tick_minutes must be at least 1"));
        }
        if !self.interval_secs.is_finite() || self.interval_secs <= 0.0 {
            return Err(invalid("clock.interval_secs must be positive"));
        }
        if !self.speed_factor.is_finite() || self.speed_factor < MIN_SPEED_FACTOR {
            return Err(invalid(format!(
                "clock.speed_factor must be at least {MIN_SPEED_FACTOR}"
            )));
        }
        if chrono::NaiveDateTime::parse_from_str(&self.start, crate::clock::TIMESTAMP_FORMAT)
            .is_err()
        {
            return Err(invalid(format!(
                "clock.start {:?} is not a YYYY-MM-DDTHH:MM:SS timestamp",
                self.start
            )));
        }
        Ok(())
    }
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// NATS server URL. When absent the simulation runs on the in-process bus.
    #[serde(default)]
    pub nats_url: Option<String>,

    /// Prefix of every subject.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            nats_url: None,
            topic_prefix: default_topic_prefix(),
        }
    }
}

impl InfrastructureConfig {
    /// Apply `NATS_URL` if present.
    pub fn apply_env_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("NATS_URL") {
            self.nats_url = Some(val);
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Bounded wait for missing peers as a function of the tick pace.
///
/// The wait is [`PARTIAL_FLUSH_SHARE`] of the real tick interval at the
/// current speed factor. A configured wait is used as is but never exceeds
/// that share, so it always ends before the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialFlushTimeout {
    interval_secs: f64,
    configured: Option<Duration>,
}

impl PartialFlushTimeout {
    /// The wait at `speed_factor`.
    pub fn at_speed(&self, speed_factor: f64) -> Duration {
        let pace = Duration::try_from_secs_f64(
            self.interval_secs * PARTIAL_FLUSH_SHARE / speed_factor.max(MIN_SPEED_FACTOR),
        )
        .unwrap_or(Duration::ZERO);
        self.configured
            .map_or(pace, |configured| configured.min(pace))
    }
}

/// Allocation policy configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct AllocationConfig {
    /// Start in adaptive (KPI-tiered) mode.
    #[serde(default)]
    pub adaptive: bool,

    /// Bounded wait for missing peers, in milliseconds.
    #[serde(default)]
    pub partial_flush_timeout_ms: Option<u64>,

    /// Failure-ratio thresholds of the tiered policy.
    #[serde(default)]
    pub tiers: TierThresholds,
}

impl AllocationConfig {
    /// The allocation mode aggregators start in.
    pub const fn initial_mode(&self) -> AllocationMode {
        if self.adaptive {
            AllocationMode::Adaptive
        } else {
            AllocationMode::Proportional
        }
    }
}

/// Failure-ratio thresholds of the tiered policy.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TierThresholds {
    /// Above this failure ratio a productive plant is throttled.
    #[serde(default = "default_tier_high")]
    pub high: f64,
    /// Below this failure ratio a plant may reach the 1.3x tier.
    #[serde(default = "default_tier_mid")]
    pub mid: f64,
    /// Below this failure ratio a plant may reach the 1.5x tier.
    #[serde(default = "default_tier_low")]
    pub low: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high: default_tier_high(),
            mid: default_tier_mid(),
            low: default_tier_low(),
        }
    }
}

impl TierThresholds {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("high", self.high), ("mid", self.mid), ("low", self.low)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!(
                    "allocation.tiers.{name} must lie within [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Failure model configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutageConfig {
    /// Risk added per overproducing tick and removed per normal tick.
    #[serde(default = "default_risk_step")]
    pub risk_step: f64,

    /// Seed for every random source in the simulation.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for OutageConfig {
    fn default() -> Self {
        Self {
            risk_step: default_risk_step(),
            seed: default_seed(),
        }
    }
}

/// Synthetic weather configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeatherConfig {
    /// Long-run mean wind speed in km/h.
    #[serde(default = "default_mean_wind_speed")]
    pub mean_wind_speed_kmh: f64,

    /// Largest hour-to-hour change in wind speed, km/h.
    #[serde(default = "default_wind_variability")]
    pub wind_variability_kmh: f64,

    /// Mean air temperature in degrees Celsius.
    #[serde(default = "default_mean_temperature")]
    pub mean_temperature_c: f64,

    /// Mean air pressure in hPa.
    #[serde(default = "default_mean_pressure")]
    pub mean_pressure_hpa: f64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            mean_wind_speed_kmh: default_mean_wind_speed(),
            wind_variability_kmh: default_wind_variability(),
            mean_temperature_c: default_mean_temperature(),
            mean_pressure_hpa: default_mean_pressure(),
        }
    }
}

/// One wind turbine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TurbineSpec {
    /// Supplier id on the power bus.
    pub id: String,
    /// Rotor diameter in metres.
    #[serde(default = "default_rotor_diameter")]
    pub rotor_diameter_m: f64,
    /// Rated output in kW.
    #[serde(default = "default_rated_power")]
    pub rated_power_kw: f64,
}

/// The raw water source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WaterPipeConfig {
    /// Supplier id on the water bus.
    #[serde(default = "default_water_pipe_id")]
    pub id: String,
    /// Volume offered every tick, m³.
    #[serde(default = "default_water_volume")]
    pub volume_per_tick: f64,
}

impl Default for WaterPipeConfig {
    fn default() -> Self {
        Self {
            id: default_water_pipe_id(),
            volume_per_tick: default_water_volume(),
        }
    }
}

/// Nominal constants of one conversion plant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlantSpec {
    /// Plant id, unique across the simulation.
    pub id: String,
    /// Input resource consumed per tick at nominal output.
    pub nominal_input_demand: f64,
    /// Power drawn per tick at nominal output.
    pub nominal_power_demand: f64,
    /// Output produced per tick at 100% performance.
    pub nominal_output: f64,
    /// Loss multiplier on input; 1.0 is lossless.
    #[serde(default = "default_production_losses")]
    pub production_losses: f64,
    /// Baseline probability of entering failure on any tick.
    #[serde(default = "default_failure_probability")]
    pub failure_probability: f64,
}

impl PlantSpec {
    fn apply_env_overrides(
        &mut self,
        kind: PlantKind,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let key = self.id.to_uppercase().replace('-', "_");
        let prefix = format!("{}_{key}", kind.env_prefix());
        for (field, slot) in [
            ("NOMINAL_INPUT_DEMAND", &mut self.nominal_input_demand),
            ("NOMINAL_POWER_DEMAND", &mut self.nominal_power_demand),
            ("NOMINAL_OUTPUT", &mut self.nominal_output),
            ("PRODUCTION_LOSSES", &mut self.production_losses),
            ("FAILURE_PROBABILITY", &mut self.failure_probability),
        ] {
            if let Some(value) = parse_override(lookup, &format!("{prefix}_{field}"))? {
                *slot = value;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("nominal_input_demand", self.nominal_input_demand),
            ("nominal_power_demand", self.nominal_power_demand),
            ("nominal_output", self.nominal_output),
        ] {
            if !is_non_negative(value) {
                return Err(invalid(format!(
                    "plant {} has negative or non-finite {name}",
                    self.id
                )));
            }
        }
        if !self.production_losses.is_finite() || self.production_losses < 1.0 {
            return Err(invalid(format!(
                "plant {} must have production_losses >= 1",
                self.id
            )));
        }
        if !(0.0..=1.0).contains(&self.failure_probability) {
            return Err(invalid(format!(
                "plant {} must have failure_probability within [0, 1]",
                self.id
            )));
        }
        Ok(())
    }
}

/// The hydrogen consumer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HydrogenDemandConfig {
    /// Requester id on the hydrogen bus.
    #[serde(default = "default_hydrogen_demand_id")]
    pub id: String,
    /// Centre of the daily demand draw, kg.
    #[serde(default = "default_daily_max_kg")]
    pub daily_max_kg: u32,
    /// Ticks per simulated day.
    #[serde(default = "default_ticks_per_day")]
    pub ticks_per_day: u32,
}

impl Default for HydrogenDemandConfig {
    fn default() -> Self {
        Self {
            id: default_hydrogen_demand_id(),
            daily_max_kg: default_daily_max_kg(),
            ticks_per_day: default_ticks_per_day(),
        }
    }
}

/// Stage summary configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SummaryConfig {
    /// Number of ticks in the rolling mean.
    #[serde(default = "default_summary_window")]
    pub window: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            window: default_summary_window(),
        }
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn parse_override<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|raw| {
            raw.trim().parse().map_err(|_err| ConfigError::EnvOverride {
                name: name.to_owned(),
                value: raw.clone(),
            })
        })
        .transpose()
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_start() -> String {
    "2018-01-01T00:00:00".to_owned()
}

const fn default_tick_minutes() -> u32 {
    15
}

const fn default_interval_secs() -> f64 {
    30.0
}

const fn default_speed_factor() -> f64 {
    30.0
}

fn default_topic_prefix() -> String {
    "h2".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_tier_high() -> f64 {
    0.3
}

const fn default_tier_mid() -> f64 {
    0.15
}

const fn default_tier_low() -> f64 {
    0.05
}

const fn default_risk_step() -> f64 {
    0.005
}

const fn default_seed() -> u64 {
    42
}

const fn default_mean_wind_speed() -> f64 {
    18.0
}

const fn default_wind_variability() -> f64 {
    4.0
}

const fn default_mean_temperature() -> f64 {
    9.0
}

const fn default_mean_pressure() -> f64 {
    1013.0
}

const fn default_rotor_diameter() -> f64 {
    127.0
}

const fn default_rated_power() -> f64 {
    7500.0
}

fn default_water_pipe_id() -> String {
    "water-pipe".to_owned()
}

const fn default_water_volume() -> f64 {
    60.0
}

const fn default_production_losses() -> f64 {
    1.05
}

const fn default_failure_probability() -> f64 {
    0.01
}

fn default_hydrogen_demand_id() -> String {
    "hydrogen-demand".to_owned()
}

const fn default_daily_max_kg() -> u32 {
    430
}

const fn default_ticks_per_day() -> u32 {
    96
}

const fn default_summary_window() -> usize {
    96
}

fn default_wind_turbines() -> Vec<TurbineSpec> {
    ["turbine-1", "turbine-2"]
        .into_iter()
        .map(|id| TurbineSpec {
            id: id.to_owned(),
            rotor_diameter_m: default_rotor_diameter(),
            rated_power_kw: default_rated_power(),
        })
        .collect()
}

fn plant(id: &str, input: f64, power: f64, output: f64) -> PlantSpec {
    PlantSpec {
        id: id.to_owned(),
        nominal_input_demand: input,
        nominal_power_demand: power,
        nominal_output: output,
        production_losses: default_production_losses(),
        failure_probability: default_failure_probability(),
    }
}

fn default_filter_plants() -> Vec<PlantSpec> {
    vec![
        plant("filter-1", 25.0, 6.0, 24.0),
        plant("filter-2", 25.0, 6.0, 24.0),
    ]
}

fn default_distillation_plants() -> Vec<PlantSpec> {
    vec![
        plant("distil-1", 1.2, 80.0, 1.0),
        plant("distil-2", 1.2, 80.0, 1.0),
    ]
}

fn default_electrolyzers() -> Vec<PlantSpec> {
    vec![
        plant("electrolyzer-1", 0.03, 750.0, 3.0),
        plant("electrolyzer-2", 0.03, 750.0, 3.0),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.clock.tick_minutes, 15);
        assert_eq!(config.hydrogen_demand.daily_max_kg, 430);
        assert_eq!(config.summary.window, 96);
        assert_eq!(config.plant_count(), 6);
        assert!(config.infrastructure.nats_url.is_none());
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = SimulationConfig::parse_with_env("", &env(&[])).unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r"
clock:
  speed_factor: 60
  max_ticks: 10
allocation:
  adaptive: true
  partial_flush_timeout_ms: 250
filter_plants:
  - id: f1
    nominal_input_demand: 10
    nominal_power_demand: 2
    nominal_output: 9
";
        let config = SimulationConfig::parse_with_env(yaml, &env(&[])).unwrap();
        assert_eq!(config.clock.max_ticks, 10);
        assert!(config.allocation.adaptive);
        assert_eq!(config.filter_plants.len(), 1);
        assert!((config.filter_plants[0].production_losses - 1.05).abs() < 1e-12);
        assert_eq!(config.partial_flush_timeout(), Duration::from_millis(250));
        config.validate().unwrap();
    }

    #[test]
    fn partial_timeout_defaults_to_most_of_a_tick() {
        let config = SimulationConfig::default();
        // 30 s / 30 = 1 s per tick.
        assert!((config.partial_flush_timeout().as_secs_f64() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn partial_timeout_follows_speed_factor() {
        let mut config = SimulationConfig::default();
        let pacing = config.partial_flush_pacing();
        // 30 s / 300 = 100 ms per tick.
        assert_eq!(pacing.at_speed(300.0), Duration::from_millis(80));
        assert_eq!(pacing.at_speed(0.0), pacing.at_speed(MIN_SPEED_FACTOR));

        config.allocation.partial_flush_timeout_ms = Some(250);
        let pacing = config.partial_flush_pacing();
        assert_eq!(pacing.at_speed(30.0), Duration::from_millis(250));
        assert_eq!(pacing.at_speed(300.0), Duration::from_millis(80));
    }

    #[test]
    fn env_overrides_plant_constants() {
        let lookup = env(&[
            ("FILTER_PLANT_FILTER_1_NOMINAL_OUTPUT", "30.5"),
            ("ELECTROLYZER_ELECTROLYZER_2_FAILURE_PROBABILITY", "0.2"),
            ("NATS_URL", "nats://example:4222"),
            ("H2_ADAPTIVE_MODE", "True"),
            ("H2_SPEED_FACTOR", "120"),
        ]);
        let config = SimulationConfig::parse_with_env("", &lookup).unwrap();
        assert!((config.filter_plants[0].nominal_output - 30.5).abs() < 1e-12);
        assert!((config.filter_plants[1].nominal_output - 24.0).abs() < 1e-12);
        assert!((config.electrolyzers[1].failure_probability - 0.2).abs() < 1e-12);
        assert_eq!(
            config.infrastructure.nats_url.as_deref(),
            Some("nats://example:4222")
        );
        assert!(config.allocation.adaptive);
        assert!((config.clock.speed_factor - 120.0).abs() < 1e-12);
    }

    #[test]
    fn unparsable_override_is_fatal() {
        let lookup = env(&[("DISTIL_PLANT_DISTIL_1_NOMINAL_OUTPUT", "lots")]);
        let err = SimulationConfig::parse_with_env("", &lookup).unwrap_err();
        assert!(matches!(err, ConfigError::EnvOverride { .. }));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut config = SimulationConfig::default();
        config.distillation_plants[0].id = "filter-1".to_owned();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_bad_plant_constants() {
        let mut config = SimulationConfig::default();
        config.filter_plants[0].nominal_power_demand = -1.0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.electrolyzers[0].production_losses = 0.9;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.electrolyzers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_slow_speed_factor() {
        let mut config = SimulationConfig::default();
        config.clock.speed_factor = 0.05;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sample_file_matches_defaults() {
        let sample = include_str!("../../../h2chain-config.yaml");
        let config = SimulationConfig::parse_with_env(sample, &env(&[])).unwrap();
        config.validate().unwrap();
        assert_eq!(config, SimulationConfig::default());
    }
}

//! Wind power curve and synthetic weather.
//!
//! The turbines need wind speed and air density every tick. Weather is
//! generated as hourly anchor samples that drift around configured means,
//! and each tick linearly interpolates between the two anchors around it.

use rand::Rng;

use crate::config::WeatherConfig;
use crate::round2;

/// Power coefficient applied to every turbine.
pub const POWER_COEFFICIENT: f64 = 0.5;

/// Specific gas constant of dry air, J/(kg K).
pub const DRY_AIR_GAS_CONSTANT: f64 = 287.1;

const CELSIUS_IN_KELVIN: f64 = 273.15;
const KMH_PER_MS: f64 = 3.6;

/// Swept rotor area for `diameter` metres.
pub fn rotor_area(diameter: f64) -> f64 {
    std::f64::consts::PI * (diameter / 2.0).powi(2)
}

/// Uncapped turbine output in kW.
pub fn wind_power_kw(area: f64, density: f64, wind_speed_kmh: f64) -> f64 {
    let speed_ms = wind_speed_kmh.max(0.0) / KMH_PER_MS;
    0.5 * area * density * speed_ms.powi(3) * POWER_COEFFICIENT / 1000.0
}

/// Air density in kg/m³ from pressure in hPa and temperature in °C.
pub fn air_density(pressure_hpa: f64, temperature_c: f64) -> f64 {
    round2(crate::ratio_or_zero(
        pressure_hpa * 100.0,
        DRY_AIR_GAS_CONSTANT * (temperature_c + CELSIUS_IN_KELVIN),
    ))
}

/// Weather conditions at one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherSample {
    /// Wind speed in km/h.
    pub wind_speed_kmh: f64,
    /// Air temperature in °C.
    pub temperature_c: f64,
    /// Air pressure in hPa.
    pub pressure_hpa: f64,
}

impl WeatherSample {
    /// Air density for this sample.
    pub fn density(&self) -> f64 {
        air_density(self.pressure_hpa, self.temperature_c)
    }

    fn lerp(&self, other: &Self, alpha: f64) -> Self {
        let mix = |a: f64, b: f64| round2(a.mul_add(1.0 - alpha, b * alpha));
        Self {
            wind_speed_kmh: mix(self.wind_speed_kmh, other.wind_speed_kmh),
            temperature_c: mix(self.temperature_c, other.temperature_c),
            pressure_hpa: mix(self.pressure_hpa, other.pressure_hpa),
        }
    }
}

/// Seeded weather generator with hourly anchors.
#[derive(Debug)]
pub struct SyntheticWeather<R> {
    config: WeatherConfig,
    ticks_per_hour: u32,
    step: u32,
    previous: WeatherSample,
    next: WeatherSample,
    rng: R,
}

impl<R: Rng> SyntheticWeather<R> {
    /// Create a generator starting at the configured means.
    pub fn new(config: WeatherConfig, tick_minutes: u32, mut rng: R) -> Self {
        let previous = WeatherSample {
            wind_speed_kmh: config.mean_wind_speed_kmh.max(0.0),
            temperature_c: config.mean_temperature_c,
            pressure_hpa: config.mean_pressure_hpa,
        };
        let next = drift(&config, &previous, &mut rng);
        let ticks_per_hour = 60_u32.checked_div(tick_minutes).unwrap_or(1).max(1);
        Self {
            config,
            ticks_per_hour,
            step: 0,
            previous,
            next,
            rng,
        }
    }

    /// Weather for the next tick.
    pub fn next_sample(&mut self) -> WeatherSample {
        let alpha = f64::from(self.step) / f64::from(self.ticks_per_hour);
        let sample = self.previous.lerp(&self.next, alpha);
        self.step = self.step.saturating_add(1);
        if self.step >= self.ticks_per_hour {
            self.step = 0;
            self.previous = self.next;
            self.next = drift(&self.config, &self.previous, &mut self.rng);
        }
        sample
    }
}

/// Next hourly anchor: mean-reverting random walk on wind speed, small
/// jitter on temperature and pressure.
fn drift(config: &WeatherConfig, from: &WeatherSample, rng: &mut impl Rng) -> WeatherSample {
    let reversion = 0.2 * (config.mean_wind_speed_kmh - from.wind_speed_kmh);
    let gust = jitter(rng, config.wind_variability_kmh.abs());
    WeatherSample {
        wind_speed_kmh: round2((from.wind_speed_kmh + reversion + gust).max(0.0)),
        temperature_c: round2(config.mean_temperature_c + jitter(rng, 3.0)),
        pressure_hpa: round2(config.mean_pressure_hpa + jitter(rng, 10.0)),
    }
}

fn jitter(rng: &mut impl Rng, span: f64) -> f64 {
    if span > 0.0 {
        rng.random_range(-span..=span)
    } else {
        0.0
    }
}

//! Catalog of queryable metrics.

use crate::error::{PipelineError, Result};
use crate::structs::Observation;
use serde::Serialize;
use std::str::FromStr;

/// Registry key and display label of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    pub key: &'static str,
    pub label: &'static str,
}

/// A numeric column of an [`Observation`] that queries may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    TemperatureCelsius,
    Humidity,
    PrecipMm,
    WindKph,
    HeatIndex,
    WindChill,
}

impl Metric {
    /// Every registered metric, in display order.
    pub const ALL: [Metric; 6] = [
        Metric::TemperatureCelsius,
        Metric::Humidity,
        Metric::PrecipMm,
        Metric::WindKph,
        Metric::HeatIndex,
        Metric::WindChill,
    ];

    pub fn descriptor(self) -> MetricDescriptor {
        let (key, label) = match self {
            Metric::TemperatureCelsius => ("temperature_celsius", "Temperature (°C)"),
            Metric::Humidity => ("humidity", "Humidity (%)"),
            Metric::PrecipMm => ("precip_mm", "Precipitation (mm)"),
            Metric::WindKph => ("wind_kph", "Wind Speed (kph)"),
            Metric::HeatIndex => ("heat_index", "Heat Index"),
            Metric::WindChill => ("wind_chill", "Wind Chill"),
        };
        MetricDescriptor { key, label }
    }

    pub fn key(self) -> &'static str {
        self.descriptor().key
    }

    pub fn label(self) -> &'static str {
        self.descriptor().label
    }

    /// Reads this metric from an observation. `None` marks a missing value.
    pub fn value(self, obs: &Observation) -> Option<f64> {
        match self {
            Metric::TemperatureCelsius => obs.temperature_celsius,
            Metric::Humidity => obs.humidity,
            Metric::PrecipMm => obs.precip_mm,
            Metric::WindKph => obs.wind_kph,
            Metric::HeatIndex => obs.heat_index,
            Metric::WindChill => obs.wind_chill,
        }
    }
}

impl FromStr for Metric {
    type Err = PipelineError;

    fn from_str(key: &str) -> Result<Self> {
        Metric::ALL
            .into_iter()
            .find(|m| m.key() == key)
            .ok_or_else(|| PipelineError::InvalidMetric(key.to_string()))
    }
}

/// Lists the registry as (key, label) descriptors.
pub fn registry() -> Vec<MetricDescriptor> {
    Metric::ALL.iter().map(|m| m.descriptor()).collect()
}

/// Looks up a metric descriptor by key.
///
/// # Errors
/// Returns `PipelineError::InvalidMetric` for keys outside the registry.
pub fn lookup(key: &str) -> Result<MetricDescriptor> {
    key.parse::<Metric>().map(Metric::descriptor)
}

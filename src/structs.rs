use crate::metrics::MetricDescriptor;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{Log, Metadata, Record as LogRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Simple logger implementation
pub struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &LogRecord) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// One cleaned weather reading with its derived comfort metrics.
///
/// Numeric fields are `None` when the source cell was empty or unparseable,
/// or (for the derived fields) when the formula is undefined for the inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub country: String,
    pub last_updated: NaiveDateTime,
    pub temperature_celsius: Option<f64>,
    pub humidity: Option<f64>,
    pub precip_mm: Option<f64>,
    pub wind_kph: Option<f64>,
    pub heat_index: Option<f64>,
    pub wind_chill: Option<f64>,
    /// Passthrough columns keyed by normalized column name. Keys are shared
    /// across every row loaded from the same source.
    #[serde(flatten)]
    pub extra: BTreeMap<Arc<str>, String>,
}

/// Time aggregation applied to a query result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
pub enum Aggregation {
    #[default]
    Daily,
    Monthly,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Daily => write!(f, "Daily"),
            Aggregation::Monthly => write!(f, "Monthly"),
        }
    }
}

/// Filter and aggregation parameters for a single query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    /// Countries to keep. Empty means all countries.
    pub countries: BTreeSet<String>,
    /// Inclusive lower timestamp bound.
    pub start: NaiveDateTime,
    /// Inclusive upper timestamp bound.
    pub end: NaiveDateTime,
    /// Metric registry key.
    pub metric: String,
    pub aggregation: Aggregation,
}

impl QuerySpec {
    /// Builds a query over whole calendar days: `start` begins at midnight and
    /// `end` covers every instant of its day.
    pub fn for_dates(
        countries: impl IntoIterator<Item = String>,
        start: NaiveDate,
        end: NaiveDate,
        metric: impl Into<String>,
        aggregation: Aggregation,
    ) -> Self {
        let end = end
            .and_time(NaiveTime::MIN)
            .checked_add_signed(Duration::days(1) - Duration::nanoseconds(1))
            .unwrap_or(NaiveDateTime::MAX);
        Self {
            countries: countries.into_iter().collect(),
            start: start.and_time(NaiveTime::MIN),
            end,
            metric: metric.into(),
            aggregation,
        }
    }
}

/// One row of a query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub country: String,
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
}

/// Ordered output of one query execution, sorted by (country, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultView {
    pub metric: MetricDescriptor,
    pub aggregation: Aggregation,
    pub rows: Vec<ResultRow>,
}

impl ResultView {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Descriptive statistics of one metric for one country
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryStats {
    pub country: String,
    pub count: u32,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub median: f64,
    pub percentile_25: f64,
    pub percentile_75: f64,
}

/// Pairwise Pearson correlation between registry metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub metrics: Vec<&'static str>,
    /// `values[i][j]` correlates `metrics[i]` with `metrics[j]`; `None` when undefined.
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.metrics.iter().position(|m| *m == a)?;
        let j = self.metrics.iter().position(|m| *m == b)?;
        self.values[i][j]
    }
}

/// Configuration for the load and detection pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Percentile (0-100) at which extreme-event thresholds are placed.
    pub percentile: f64,
}

impl PipelineConfig {
    /// Builds a config, clamping `percentile` into [0, 100].
    pub fn with_percentile(percentile: f64) -> Self {
        Self {
            percentile: percentile.clamp(0.0, 100.0),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { percentile: 99.0 }
    }
}

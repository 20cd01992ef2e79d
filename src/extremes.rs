//! Extreme-event detection over the whole observation history.
//!
//! Thresholds are placed once, at a high percentile of the full dataset, and
//! never react to query filters.

use crate::extract::Dataset;
use crate::structs::{Observation, PipelineConfig};
use crate::transform::calculate_percentile;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;

/// Cutoffs above which a reading counts as extreme.
///
/// A threshold is `None` when its column has no present values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub percentile: f64,
    pub temperature_celsius: Option<f64>,
    pub wind_kph: Option<f64>,
}

impl Thresholds {
    /// Computes both thresholds over every observation in `dataset`.
    ///
    /// `percentile` is clamped into [0, 100] and stored as used.
    pub fn compute(dataset: &Dataset, percentile: f64) -> Self {
        let percentile = percentile.clamp(0.0, 100.0);
        let temps: Vec<f64> = dataset
            .observations()
            .iter()
            .filter_map(|o| o.temperature_celsius)
            .collect();
        let winds: Vec<f64> = dataset
            .observations()
            .iter()
            .filter_map(|o| o.wind_kph)
            .collect();

        Self {
            percentile,
            temperature_celsius: calculate_percentile(&temps, percentile),
            wind_kph: calculate_percentile(&winds, percentile),
        }
    }

    /// `temperature >= temp threshold OR wind >= wind threshold`.
    pub fn is_extreme(&self, obs: &Observation) -> bool {
        let exceeds = |value: Option<f64>, threshold: Option<f64>| {
            matches!((value, threshold), (Some(v), Some(t)) if v >= t)
        };
        exceeds(obs.temperature_celsius, self.temperature_celsius)
            || exceeds(obs.wind_kph, self.wind_kph)
    }
}

/// The observations at or above either threshold.
#[derive(Debug, Clone)]
pub struct ExtremeSet<'a> {
    thresholds: Thresholds,
    rows: Vec<&'a Observation>,
}

impl<'a> ExtremeSet<'a> {
    /// Computes thresholds from `dataset` and collects the matching rows.
    pub fn detect(dataset: &'a Dataset, config: &PipelineConfig) -> Self {
        let thresholds = Thresholds::compute(dataset, config.percentile);
        let rows: Vec<&Observation> = dataset
            .observations()
            .iter()
            .filter(|o| thresholds.is_extreme(o))
            .collect();

        debug!(
            "Extreme thresholds at p{}: temperature={:?}, wind={:?} | {} of {} rows flagged",
            thresholds.percentile,
            thresholds.temperature_celsius,
            thresholds.wind_kph,
            rows.len(),
            dataset.len()
        );
        Self { thresholds, rows }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Full augmented rows, in dataset order.
    pub fn rows(&self) -> &[&'a Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of extreme rows per country, sorted by country.
    pub fn frequency_by_country(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for obs in &self.rows {
            *counts.entry(obs.country.clone()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn obs(country: &str, temp: Option<f64>, wind: Option<f64>) -> Observation {
        Observation {
            country: country.to_string(),
            last_updated: NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            temperature_celsius: temp,
            humidity: Some(50.0),
            precip_mm: Some(0.0),
            wind_kph: wind,
            heat_index: None,
            wind_chill: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_threshold_at_99th_percentile() {
        let rows = (1..=200)
            .map(|i| obs("Peru", Some(f64::from(i)), Some(10.0)))
            .collect();
        let dataset = Dataset::new(rows);
        let thresholds = Thresholds::compute(&dataset, 99.0);

        let temp = thresholds.temperature_celsius.unwrap();
        let above = dataset
            .observations()
            .iter()
            .filter(|o| o.temperature_celsius.unwrap() > temp)
            .count();
        assert!(above as f64 <= 0.01 * dataset.len() as f64);
        // constant wind puts its threshold on the constant, flagging every row
        assert_eq!(thresholds.wind_kph, Some(10.0));
    }

    #[test]
    fn test_extreme_set_uses_either_threshold() {
        let mut rows: Vec<Observation> = (0..100)
            .map(|i| obs("Peru", Some(20.0), Some(f64::from(i))))
            .collect();
        rows.extend((0..100).map(|i| obs("Chile", Some(f64::from(i)), Some(0.0))));
        let dataset = Dataset::new(rows);
        let extremes = ExtremeSet::detect(&dataset, &PipelineConfig::default());

        assert!(!extremes.is_empty());
        let freq = extremes.frequency_by_country();
        // temperature flags Chile's 98 and 99, wind flags Peru's 98 and 99
        assert_eq!(freq.get("Peru"), Some(&2));
        assert_eq!(freq.get("Chile"), Some(&2));
        assert_eq!(extremes.len(), 4);
    }

    #[test]
    fn test_single_row_is_extreme() {
        let dataset = Dataset::new(vec![obs("Peru", Some(12.0), None)]);
        let extremes = ExtremeSet::detect(&dataset, &PipelineConfig::default());
        assert_eq!(extremes.len(), 1);
        assert_eq!(extremes.thresholds().wind_kph, None);
    }

    #[test]
    fn test_reported_percentile_is_the_one_applied() {
        let rows = (1..=10)
            .map(|i| obs("Peru", Some(f64::from(i)), Some(1.0)))
            .collect();
        let dataset = Dataset::new(rows);
        let thresholds = Thresholds::compute(&dataset, 150.0);
        assert_eq!(thresholds.percentile, 100.0);
        assert_eq!(thresholds.temperature_celsius, Some(10.0));

        let extremes = ExtremeSet::detect(&dataset, &PipelineConfig::with_percentile(150.0));
        assert_eq!(extremes.thresholds().percentile, 100.0);
    }

    #[test]
    fn test_empty_dataset_has_no_extremes() {
        let dataset = Dataset::new(Vec::new());
        let extremes = ExtremeSet::detect(&dataset, &PipelineConfig::default());
        assert!(extremes.is_empty());
        assert_eq!(extremes.thresholds().temperature_celsius, None);
    }
}

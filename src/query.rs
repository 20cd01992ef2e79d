use crate::error::Result;
use crate::extract::Dataset;
use crate::metrics::Metric;
use crate::structs::{
    Aggregation, CorrelationMatrix, CountryStats, Observation, QuerySpec, ResultRow, ResultView,
};
use crate::transform::{analyze_values, pearson};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use log::debug;
use rayon::prelude::*;
use std::collections::HashMap;

/// Answers filter and aggregate queries against a shared, read-only [`Dataset`].
///
/// Every call is independent and returns a freshly built view, so one engine
/// may serve any number of threads at once.
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'a> {
    dataset: &'a Dataset,
}

impl<'a> QueryEngine<'a> {
    pub fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// Sorted distinct countries, for seeding a country picker.
    pub fn countries(&self) -> &'a [String] {
        self.dataset.countries()
    }

    /// Earliest and latest observation time, for seeding a date range.
    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        self.dataset.time_range()
    }

    /// Executes one query.
    ///
    /// Rows are kept when their country is selected (an empty selection keeps
    /// every country) and their timestamp lies in `[start, end]`. Daily
    /// aggregation projects each row; Monthly averages present values per
    /// (country, month). Output is sorted by (country, timestamp).
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidMetric` if `spec.metric` is not registered.
    /// An empty match, including `start > end`, is an empty view, not an error.
    pub fn execute(&self, spec: &QuerySpec) -> Result<ResultView> {
        let metric: Metric = spec.metric.parse()?;
        let matched = self.filter(spec);

        let mut rows: Vec<ResultRow> = match spec.aggregation {
            Aggregation::Daily => matched
                .par_iter()
                .map(|obs| ResultRow {
                    country: obs.country.clone(),
                    timestamp: obs.last_updated,
                    value: metric.value(obs),
                })
                .collect(),
            Aggregation::Monthly => monthly_means(&matched, metric),
        };

        rows.par_sort_by(|a, b| {
            a.country
                .cmp(&b.country)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });

        debug!(
            "Query {} {} | {} rows matched, {} rows returned",
            spec.aggregation,
            metric.key(),
            matched.len(),
            rows.len()
        );
        Ok(ResultView {
            metric: metric.descriptor(),
            aggregation: spec.aggregation,
            rows,
        })
    }

    /// Per-country descriptive statistics over the rows `execute` would return.
    ///
    /// Missing values are skipped; countries without any present value are omitted.
    pub fn statistics(&self, spec: &QuerySpec) -> Result<Vec<CountryStats>> {
        let view = self.execute(spec)?;

        // view is sorted by country, so each country is one contiguous run
        let mut stats = Vec::new();
        for run in view.rows.chunk_by(|a, b| a.country == b.country) {
            let values: Vec<f64> = run.iter().filter_map(|r| r.value).collect();
            if let Some(s) = analyze_values(run[0].country.clone(), &values) {
                stats.push(s);
            }
        }
        Ok(stats)
    }

    /// Pearson correlation between every pair of registered metrics over the
    /// filtered rows, ignoring the aggregation mode.
    ///
    /// A row contributes to a pair only when both of its values are present.
    pub fn correlation(&self, spec: &QuerySpec) -> Result<CorrelationMatrix> {
        spec.metric.parse::<Metric>()?;
        let matched = self.filter(spec);

        let values = Metric::ALL
            .iter()
            .map(|&a| {
                Metric::ALL
                    .iter()
                    .map(|&b| {
                        let pairs: Vec<(f64, f64)> = matched
                            .iter()
                            .filter_map(|obs| Some((a.value(obs)?, b.value(obs)?)))
                            .collect();
                        pearson(&pairs)
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(CorrelationMatrix {
            metrics: Metric::ALL.iter().map(|m| m.key()).collect(),
            values,
        })
    }

    fn filter(&self, spec: &QuerySpec) -> Vec<&'a Observation> {
        if spec.start > spec.end {
            return Vec::new();
        }
        self.dataset
            .observations()
            .par_iter()
            .filter(|obs| {
                (spec.countries.is_empty() || spec.countries.contains(&obs.country))
                    && obs.last_updated >= spec.start
                    && obs.last_updated <= spec.end
            })
            .collect()
    }
}

/// Averages present values per (country, calendar month).
///
/// A group whose values are all missing yields a missing mean.
fn monthly_means(rows: &[&Observation], metric: Metric) -> Vec<ResultRow> {
    let mut groups: HashMap<(&str, i32, u32), (f64, u32)> = HashMap::new();
    for obs in rows {
        let key = (
            obs.country.as_str(),
            obs.last_updated.year(),
            obs.last_updated.month(),
        );
        let (sum, count) = groups.entry(key).or_insert((0.0, 0));
        if let Some(v) = metric.value(obs) {
            *sum += v;
            *count += 1;
        }
    }

    groups
        .into_par_iter()
        .filter_map(|((country, year, month), (sum, count))| {
            let timestamp = NaiveDate::from_ymd_opt(year, month, 1)?.and_time(NaiveTime::MIN);
            Some(ResultRow {
                country: country.to_string(),
                timestamp,
                value: (count > 0).then(|| sum / f64::from(count)),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::collections::BTreeMap;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn obs(country: &str, ts: NaiveDateTime, temp: Option<f64>) -> Observation {
        Observation {
            country: country.to_string(),
            last_updated: ts,
            temperature_celsius: temp,
            humidity: Some(50.0),
            precip_mm: Some(0.0),
            wind_kph: Some(10.0),
            heat_index: None,
            wind_chill: None,
            extra: BTreeMap::new(),
        }
    }

    fn sample() -> Dataset {
        Dataset::new(vec![
            obs("Peru", at(2024, 5, 16, 13), Some(10.0)),
            obs("Peru", at(2024, 5, 20, 9), Some(20.0)),
            obs("Peru", at(2024, 6, 2, 9), None),
            obs("Chile", at(2024, 5, 16, 8), Some(5.0)),
            obs("Chile", at(2024, 5, 16, 23), None),
            obs("Chile", at(2024, 5, 17, 1), Some(7.0)),
        ])
    }

    fn spec(countries: &[&str], aggregation: Aggregation) -> QuerySpec {
        QuerySpec {
            countries: countries.iter().map(|c| c.to_string()).collect(),
            start: at(2024, 1, 1, 0),
            end: at(2024, 12, 31, 23),
            metric: "temperature_celsius".to_string(),
            aggregation,
        }
    }

    #[test]
    fn test_daily_is_sorted_projection() {
        let dataset = sample();
        let view = QueryEngine::new(&dataset)
            .execute(&spec(&[], Aggregation::Daily))
            .unwrap();

        assert_eq!(view.len(), 6);
        assert_eq!(view.metric.key, "temperature_celsius");
        let order: Vec<_> = view.rows.iter().map(|r| (r.country.as_str(), r.timestamp)).collect();
        assert_eq!(order[0], ("Chile", at(2024, 5, 16, 8)));
        assert_eq!(order[2], ("Chile", at(2024, 5, 17, 1)));
        assert_eq!(order[5], ("Peru", at(2024, 6, 2, 9)));
        assert_eq!(view.rows[5].value, None);
    }

    #[test]
    fn test_monthly_mean_skips_missing() {
        let dataset = sample();
        let view = QueryEngine::new(&dataset)
            .execute(&spec(&["Peru"], Aggregation::Monthly))
            .unwrap();

        assert_eq!(view.len(), 2);
        assert_eq!(view.rows[0].timestamp, at(2024, 5, 1, 0));
        assert_eq!(view.rows[0].value, Some(15.0));
        // June only has a missing reading
        assert_eq!(view.rows[1].timestamp, at(2024, 6, 1, 0));
        assert_eq!(view.rows[1].value, None);

        let chile = QueryEngine::new(&dataset)
            .execute(&spec(&["Chile"], Aggregation::Monthly))
            .unwrap();
        assert_eq!(chile.len(), 1);
        assert_eq!(chile.rows[0].value, Some(6.0));
    }

    #[test]
    fn test_empty_countries_means_all() {
        let dataset = sample();
        let engine = QueryEngine::new(&dataset);
        let all: Vec<&str> = engine.countries().iter().map(String::as_str).collect();
        for aggregation in [Aggregation::Daily, Aggregation::Monthly] {
            let implicit = engine.execute(&spec(&[], aggregation)).unwrap();
            let explicit = engine.execute(&spec(&all, aggregation)).unwrap();
            assert_eq!(implicit, explicit);
        }
    }

    #[test]
    fn test_single_day_and_inclusive_bounds() {
        let dataset = sample();
        let engine = QueryEngine::new(&dataset);
        let day = NaiveDate::from_ymd_opt(2024, 5, 16).unwrap();
        let q = QuerySpec::for_dates(
            Vec::new(),
            day,
            day,
            "temperature_celsius",
            Aggregation::Daily,
        );
        let view = engine.execute(&q).unwrap();
        assert_eq!(view.len(), 3);
        assert!(view.rows.iter().all(|r| r.timestamp.date() == day));

        let mut exact = spec(&[], Aggregation::Daily);
        exact.start = at(2024, 5, 16, 13);
        exact.end = at(2024, 5, 16, 13);
        assert_eq!(engine.execute(&exact).unwrap().len(), 1);
    }

    #[test]
    fn test_start_after_end_is_empty() {
        let dataset = sample();
        let mut q = spec(&[], Aggregation::Monthly);
        std::mem::swap(&mut q.start, &mut q.end);
        let view = QueryEngine::new(&dataset).execute(&q).unwrap();
        assert!(view.is_empty());
    }

    #[test]
    fn test_unknown_country_is_empty_not_error() {
        let dataset = sample();
        let view = QueryEngine::new(&dataset)
            .execute(&spec(&["Atlantis"], Aggregation::Daily))
            .unwrap();
        assert!(view.is_empty());
    }

    #[test]
    fn test_invalid_metric() {
        let dataset = sample();
        let mut q = spec(&[], Aggregation::Daily);
        q.metric = "pressure_mb".to_string();
        let engine = QueryEngine::new(&dataset);
        assert!(matches!(
            engine.execute(&q),
            Err(PipelineError::InvalidMetric(m)) if m == "pressure_mb"
        ));
        assert!(engine.statistics(&q).is_err());
        assert!(engine.correlation(&q).is_err());
    }

    #[test]
    fn test_statistics_per_country() {
        let dataset = sample();
        let stats = QueryEngine::new(&dataset)
            .statistics(&spec(&[], Aggregation::Daily))
            .unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].country, "Chile");
        assert_eq!(stats[0].count, 2);
        assert_eq!(stats[0].mean, 6.0);
        assert_eq!(stats[1].country, "Peru");
        assert_eq!(stats[1].max, 20.0);
    }

    #[test]
    fn test_correlation_matrix() {
        let dataset = sample();
        let matrix = QueryEngine::new(&dataset)
            .correlation(&spec(&[], Aggregation::Daily))
            .unwrap();
        assert_eq!(matrix.metrics.len(), 6);
        // heat index is an affine function of temperature at constant humidity
        let r = matrix.get("temperature_celsius", "heat_index").unwrap();
        assert!((r - 1.0).abs() < 1e-9);
        // constant humidity has no variance
        assert_eq!(matrix.get("humidity", "temperature_celsius"), None);
    }

    #[test]
    fn test_concurrent_queries_share_dataset() {
        let dataset = sample();
        let engine = QueryEngine::new(&dataset);
        let expected = engine.execute(&spec(&["Peru"], Aggregation::Monthly)).unwrap();
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| engine.execute(&spec(&["Peru"], Aggregation::Monthly))))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap().unwrap(), expected);
            }
        });
    }
}

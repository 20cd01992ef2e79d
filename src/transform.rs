use crate::structs::{CountryStats, Observation};
use log::debug;
use rayon::prelude::*;

/// Heat index from temperature (°C) and relative humidity (%).
///
/// Linear approximation `T + 0.33 * RH - 0.7`, evaluated left to right.
pub fn heat_index(temperature_celsius: f64, humidity: f64) -> f64 {
    temperature_celsius + 0.33 * humidity - 0.7
}

/// Wind chill from temperature (°C) and wind speed (kph).
///
/// Returns `None` when `wind_kph` is negative, since the fractional power
/// term has no real value there, and for any other non-finite result.
pub fn wind_chill(temperature_celsius: f64, wind_kph: f64) -> Option<f64> {
    if wind_kph < 0.0 {
        return None;
    }
    let value = 13.12 + 0.6215 * temperature_celsius - 11.37 * wind_kph.powf(0.16);
    value.is_finite().then_some(value)
}

/// Derives `heat_index` and `wind_chill` for every observation in place.
///
/// Missing inputs yield missing outputs.
pub fn engineer_features(observations: &mut [Observation]) {
    observations.par_iter_mut().for_each(|obs| {
        obs.heat_index = match (obs.temperature_celsius, obs.humidity) {
            (Some(t), Some(h)) => Some(heat_index(t, h)).filter(|v| v.is_finite()),
            _ => None,
        };
        obs.wind_chill = match (obs.temperature_celsius, obs.wind_kph) {
            (Some(t), Some(w)) => wind_chill(t, w),
            _ => None,
        };
    });

    let missing_chill = observations.iter().filter(|o| o.wind_chill.is_none()).count();
    debug!(
        "Derived comfort metrics for {} rows ({} without wind chill)",
        observations.len(),
        missing_chill
    );
}

/// Calculates descriptive statistics of a metric for one country.
///
/// Returns `None` for an empty slice.
///
/// # Statistical Methods
///
/// - **Mean**: Arithmetic average of all values
/// - **Standard Deviation**: Sample standard deviation (N-1 denominator)
/// - **Percentiles**: Linear interpolation between closest ranks
pub fn analyze_values(country: String, values: &[f64]) -> Option<CountryStats> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let count = sorted.len() as u32;
    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let std_dev = if sorted.len() > 1 {
        let variance =
            sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (sorted.len() - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    Some(CountryStats {
        country,
        count,
        mean,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        std_dev,
        median: percentile_of_sorted(&sorted, 50.0),
        percentile_25: percentile_of_sorted(&sorted, 25.0),
        percentile_75: percentile_of_sorted(&sorted, 75.0),
    })
}

/// Calculates a percentile using linear interpolation between closest ranks.
///
/// # Arguments
///
/// * `data` - Values to analyze, in any order
/// * `percentile` - Desired percentile as a percentage (0.0 to 100.0)
///
/// # Returns
///
/// Returns `None` for an empty slice.
pub fn calculate_percentile(data: &[f64], percentile: f64) -> Option<f64> {
    if data.is_empty() {
        return None;
    }

    let mut sorted_data = data.to_vec();
    sorted_data.par_sort_unstable_by(f64::total_cmp);
    Some(percentile_of_sorted(&sorted_data, percentile))
}

fn percentile_of_sorted(sorted_data: &[f64], percentile: f64) -> f64 {
    let index = (percentile.clamp(0.0, 100.0) / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_data[lower]
    } else {
        let weight = index - lower as f64;
        sorted_data[lower] + (sorted_data[upper] - sorted_data[lower]) * weight
    }
}

/// Pearson correlation over paired samples, `None` when undefined.
pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn obs(temp: Option<f64>, humidity: Option<f64>, wind: Option<f64>) -> Observation {
        Observation {
            country: "Peru".to_string(),
            last_updated: NaiveDate::from_ymd_opt(2024, 5, 16)
                .unwrap()
                .and_hms_opt(13, 15, 0)
                .unwrap(),
            temperature_celsius: temp,
            humidity,
            precip_mm: Some(0.0),
            wind_kph: wind,
            heat_index: None,
            wind_chill: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_heat_index_exact() {
        assert_eq!(heat_index(30.0, 50.0), 45.8);
    }

    #[test]
    fn test_wind_chill_formula() {
        let expected = 13.12 + 0.6215 * 10.0 - 11.37 * 20f64.powf(0.16);
        let actual = wind_chill(10.0, 20.0).unwrap();
        assert!((actual - expected).abs() < f64::EPSILON);
        assert!((actual - 0.9727767202190698).abs() < 1e-12);
    }

    #[test]
    fn test_wind_chill_negative_wind_is_missing() {
        assert_eq!(wind_chill(10.0, -1.0), None);
        assert_eq!(wind_chill(10.0, 0.0), Some(13.12 + 0.6215 * 10.0 - 0.0));
    }

    #[test]
    fn test_engineer_features_marks_missing() {
        let mut rows = vec![
            obs(Some(30.0), Some(50.0), Some(20.0)),
            obs(Some(10.0), None, Some(-3.0)),
            obs(None, Some(40.0), Some(5.0)),
        ];
        engineer_features(&mut rows);

        assert_eq!(rows[0].heat_index, Some(45.8));
        assert!(rows[0].wind_chill.is_some());
        assert_eq!(rows[1].heat_index, None);
        assert_eq!(rows[1].wind_chill, None);
        assert_eq!(rows[2].heat_index, None);
        assert_eq!(rows[2].wind_chill, None);
    }

    #[test]
    fn test_percentile_interpolates() {
        let data: Vec<f64> = (1..=100).rev().map(f64::from).collect();
        let p99 = calculate_percentile(&data, 99.0).unwrap();
        assert!((p99 - 99.01).abs() < 1e-9);
        assert_eq!(calculate_percentile(&data, 0.0), Some(1.0));
        assert_eq!(calculate_percentile(&data, 100.0), Some(100.0));
        assert_eq!(calculate_percentile(&[], 50.0), None);
    }

    #[test]
    fn test_analyze_values() {
        let stats = analyze_values("Chile".to_string(), &[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.percentile_25, 1.75);
        assert_eq!(stats.percentile_75, 3.25);
        assert!(analyze_values("Chile".to_string(), &[]).is_none());
    }

    #[test]
    fn test_pearson() {
        let perfect = [(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)];
        assert!((pearson(&perfect).unwrap() - 1.0).abs() < 1e-12);
        let inverse = [(1.0, 3.0), (2.0, 2.0), (3.0, 1.0)];
        assert!((pearson(&inverse).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&[(1.0, 1.0), (1.0, 2.0)]), None);
        assert_eq!(pearson(&[(1.0, 1.0)]), None);
    }
}

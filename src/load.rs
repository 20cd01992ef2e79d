use crate::error::Result;
use crate::extract::Dataset;
use crate::extremes::{ExtremeSet, Thresholds};
use crate::structs::{CorrelationMatrix, CountryStats, Observation, ResultView};
use arrow_array::{Float64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use csv::Writer;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::collections::BTreeMap;
use std::{fs::File, path::Path, sync::Arc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_value(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// Full-precision cell for row dumps, empty when missing.
fn raw_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes a query result to CSV. Missing values are written as empty cells.
///
/// # Errors
/// Returns error if file cannot be created or written to.
pub fn write_csv(view: &ResultView, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);

    writer.write_record(["country", "last_updated", view.metric.key])?;
    for row in &view.rows {
        writer.write_record(&[
            row.country.clone(),
            row.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            format_value(row.value),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes a query result to a pretty-formatted JSON file.
///
/// # Errors
/// Returns error if file cannot be created or serialization fails.
pub fn write_json(view: &ResultView, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    serde_json::to_writer_pretty(file, view)?;
    Ok(())
}

/// Writes a query result to a columnar Parquet file using Arrow format.
///
/// The value column is nullable; timestamps are stored as milliseconds.
///
/// # Errors
/// Returns error if file cannot be created, schema is invalid, or Arrow operations fail.
pub fn write_parquet(view: &ResultView, output_path: &Path) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("country", DataType::Utf8, false),
        Field::new(
            "last_updated",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new(view.metric.key, DataType::Float64, true),
    ]));

    let countries = StringArray::from_iter_values(view.rows.iter().map(|r| r.country.as_str()));
    let timestamps = TimestampMillisecondArray::from_iter_values(
        view.rows.iter().map(|r| r.timestamp.and_utc().timestamp_millis()),
    );
    let values: Float64Array = view.rows.iter().map(|r| r.value).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(countries), Arc::new(timestamps), Arc::new(values)],
    )?;

    let file = File::create(output_path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

/// Writes the full augmented extreme rows to CSV.
///
/// Core columns come first, followed by every passthrough column of the dataset.
/// Numbers are written at full precision.
pub fn write_extremes_csv(
    extremes: &ExtremeSet<'_>,
    dataset: &Dataset,
    output_path: &Path,
) -> Result<()> {
    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);

    let mut header: Vec<&str> = vec![
        "country",
        "last_updated",
        "temperature_celsius",
        "humidity",
        "precip_mm",
        "wind_kph",
        "heat_index",
        "wind_chill",
    ];
    header.extend(dataset.extra_columns().iter().map(String::as_str));
    writer.write_record(&header)?;

    for obs in extremes.rows() {
        writer.write_record(observation_cells(obs, dataset.extra_columns()))?;
    }

    writer.flush()?;
    Ok(())
}

fn observation_cells(obs: &Observation, extra_columns: &[String]) -> Vec<String> {
    let mut cells = vec![
        obs.country.clone(),
        obs.last_updated.format(TIMESTAMP_FORMAT).to_string(),
        raw_value(obs.temperature_celsius),
        raw_value(obs.humidity),
        raw_value(obs.precip_mm),
        raw_value(obs.wind_kph),
        raw_value(obs.heat_index),
        raw_value(obs.wind_chill),
    ];
    cells.extend(
        extra_columns
            .iter()
            .map(|c| obs.extra.get(c.as_str()).cloned().unwrap_or_default()),
    );
    cells
}

/// Writes the full augmented extreme rows to a JSON array.
pub fn write_extremes_json(extremes: &ExtremeSet<'_>, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    serde_json::to_writer_pretty(file, extremes.rows())?;
    Ok(())
}

/// Run summary written alongside the query outputs.
#[derive(Debug, Serialize)]
pub struct Summary<'a> {
    pub rows: usize,
    pub countries: usize,
    pub thresholds: &'a Thresholds,
    pub extreme_events: usize,
    pub extreme_frequency: BTreeMap<String, usize>,
    pub statistics: &'a [CountryStats],
    pub correlation: &'a CorrelationMatrix,
}

pub fn write_summary(summary: &Summary<'_>, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}

use crate::error::{PipelineError, Result};
use crate::structs::Observation;
use crate::transform::engineer_features;
use arrow_array::cast::AsArray;
use arrow_array::types::Float64Type;
use arrow_array::{Array, ArrayRef, new_null_array};
use arrow_cast::cast::cast;
use arrow_schema::DataType;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::Arc;
use std::{fs::File, path::Path};

/// Columns every source must provide, by normalized name.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "country",
    "last_updated",
    "temperature_celsius",
    "humidity",
    "precip_mm",
    "wind_kph",
];

/// Columns recomputed by feature engineering; source values are discarded.
const DERIVED_COLUMNS: [&str; 2] = ["heat_index", "wind_chill"];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// The cleaned, feature-engineered observation set.
///
/// Built once by [`load_dataset`] (or [`Dataset::new`]) and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Dataset {
    observations: Vec<Observation>,
    countries: Vec<String>,
    time_range: Option<(NaiveDateTime, NaiveDateTime)>,
    extra_columns: Vec<String>,
}

impl Dataset {
    /// Derives comfort metrics for `observations` and freezes them.
    pub fn new(mut observations: Vec<Observation>) -> Self {
        engineer_features(&mut observations);

        let countries: BTreeSet<&str> = observations.iter().map(|o| o.country.as_str()).collect();
        let countries = countries.into_iter().map(str::to_string).collect();

        let time_range = observations
            .iter()
            .map(|o| o.last_updated)
            .fold(None, |acc: Option<(NaiveDateTime, NaiveDateTime)>, ts| {
                Some(match acc {
                    Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
                    None => (ts, ts),
                })
            });

        let extra_columns: BTreeSet<&str> = observations
            .iter()
            .flat_map(|o| o.extra.keys().map(|k| &**k))
            .collect();
        let extra_columns = extra_columns.into_iter().map(str::to_string).collect();

        Self {
            observations,
            countries,
            time_range,
            extra_columns,
        }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Sorted distinct country names.
    pub fn countries(&self) -> &[String] {
        &self.countries
    }

    /// Earliest and latest timestamp, `None` for an empty dataset.
    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        self.time_range
    }

    /// Sorted names of the passthrough columns.
    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Lowercases and trims a column name. Idempotent.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Parses a `last_updated` cell, returning `None` for anything unrecognized.
///
/// Accepts `YYYY-MM-DD HH:MM[:SS[.f]]`, the `T`-separated equivalents,
/// RFC 3339 (converted to UTC) and bare `YYYY-MM-DD` dates (midnight).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(ts) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_number(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Maps source columns onto the typed [`Observation`] schema.
///
/// Validates the header once, then cleans rows as they are pushed.
struct ObservationBuilder {
    headers: Vec<Arc<str>>,
    required: [usize; 6],
    observations: Vec<Observation>,
    dropped: usize,
}

impl ObservationBuilder {
    fn new<S: AsRef<str>>(raw_headers: &[S]) -> Result<Self> {
        let headers: Vec<Arc<str>> = raw_headers
            .iter()
            .map(|h| Arc::from(normalize_column_name(h.as_ref())))
            .collect();

        let mut seen = BTreeSet::new();
        for h in &headers {
            if !seen.insert(&**h) {
                return Err(PipelineError::DataLoad(format!(
                    "Duplicate column after normalization: {}",
                    h
                )));
            }
        }

        let mut required = [0usize; 6];
        for (slot, name) in required.iter_mut().zip(REQUIRED_COLUMNS) {
            *slot = headers.iter().position(|h| &**h == name).ok_or_else(|| {
                PipelineError::DataLoad(format!("Required column not found: {}", name))
            })?;
        }

        Ok(Self {
            headers,
            required,
            observations: Vec::new(),
            dropped: 0,
        })
    }

    /// Adds one row of cells, aligned with the header. Rows with an
    /// unparseable timestamp are dropped.
    fn push(&mut self, cells: &[Option<String>]) {
        let cell = |idx: usize| cells.get(idx).and_then(|c| c.as_deref());
        let [country, ts, temp, humidity, precip, wind] = self.required;

        let Some(last_updated) = cell(ts).and_then(parse_timestamp) else {
            self.dropped += 1;
            return;
        };

        let extra = self
            .headers
            .iter()
            .enumerate()
            .filter(|(i, name)| {
                !self.required.contains(i) && !DERIVED_COLUMNS.contains(&&***name)
            })
            .filter_map(|(i, name)| cell(i).map(|v| (Arc::clone(name), v.to_string())))
            .collect::<BTreeMap<_, _>>();

        self.observations.push(Observation {
            country: cell(country).unwrap_or_default().trim().to_string(),
            last_updated,
            temperature_celsius: parse_number(cell(temp)),
            humidity: parse_number(cell(humidity)),
            precip_mm: parse_number(cell(precip)),
            wind_kph: parse_number(cell(wind)),
            heat_index: None,
            wind_chill: None,
            extra,
        });
    }

    /// Arrow type a source column is read as: `Float64` for the numeric
    /// required columns, `Utf8` for everything else. Text numeric columns stay
    /// text so cells are trimmed before parsing, as in CSV.
    fn read_type(&self, idx: usize, source: &DataType) -> DataType {
        let numeric = self.required[2..].contains(&idx);
        if numeric && !matches!(source, DataType::Utf8 | DataType::LargeUtf8) {
            DataType::Float64
        } else {
            DataType::Utf8
        }
    }

    /// Casts one Parquet column to its [`read_type`](Self::read_type).
    ///
    /// A required column that cannot be cast fails the load; a passthrough
    /// column that cannot be cast reads as missing.
    fn cast_column(&self, idx: usize, col: &ArrayRef) -> Result<ArrayRef> {
        let target = self.read_type(idx, col.data_type());
        if col.data_type() == &target {
            return Ok(Arc::clone(col));
        }
        let name = self.headers.get(idx).map(|h| &**h).unwrap_or("?");
        match cast(col, &target) {
            Ok(array) => Ok(array),
            Err(e) if self.required.contains(&idx) => Err(PipelineError::DataLoad(format!(
                "Column {} of type {} cannot be read: {}",
                name,
                col.data_type(),
                e
            ))),
            Err(e) => {
                debug!("Passthrough column {} read as missing: {}", name, e);
                Ok(new_null_array(&target, col.len()))
            }
        }
    }

    fn finish(self) -> Dataset {
        debug!(
            "Cleaned {} rows, dropped {} with unparseable timestamps",
            self.observations.len(),
            self.dropped
        );
        Dataset::new(self.observations)
    }
}

/// Loads, cleans and feature-engineers a weather dataset from disk.
///
/// `.parquet`/`.pq` files are read through Arrow; anything else is read as CSV.
///
/// # Errors
///
/// Returns `PipelineError` if:
/// - File cannot be opened or read as tabular data
/// - A required column is missing or two columns normalize to the same name
pub fn load_dataset(path: &Path) -> Result<Dataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    debug!("Loading dataset from {}", path.display());
    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        _ => load_csv(File::open(path)?),
    }
}

/// Reads a CSV source with a header row.
pub fn load_csv<R: Read>(source: R) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(source);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut builder = ObservationBuilder::new(&headers)?;

    for record in reader.records() {
        let record = record?;
        let cells: Vec<Option<String>> = record
            .iter()
            .map(|v| (!v.is_empty()).then(|| v.to_string()))
            .collect();
        builder.push(&cells);
    }

    Ok(builder.finish())
}

/// Reads a Parquet file batch by batch.
pub fn load_parquet(path: &Path) -> Result<Dataset> {
    let file = File::open(path)?;
    let reader_builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let headers: Vec<String> = reader_builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let mut builder = ObservationBuilder::new(&headers)?;
    let reader = reader_builder.build()?;

    for batch_result in reader {
        let batch = batch_result?;
        let columns = batch
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| builder.cast_column(idx, col))
            .collect::<Result<Vec<_>>>()?;
        for row in 0..batch.num_rows() {
            let cells: Vec<Option<String>> =
                columns.iter().map(|col| cell_to_string(col, row)).collect();
            builder.push(&cells);
        }
    }

    Ok(builder.finish())
}

/// Renders one cell of a column already cast by [`ObservationBuilder::cast_column`].
fn cell_to_string(col: &ArrayRef, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    match col.data_type() {
        DataType::Utf8 => Some(col.as_string::<i32>().value(row).to_string()),
        DataType::Float64 => Some(col.as_primitive::<Float64Type>().value(row).to_string()),
        _ => None,
    }
}

pub mod error;
pub mod extract;
pub mod extremes;
pub mod load;
pub mod metrics;
pub mod query;
pub mod structs;
pub mod transform;

// Re-export public API
pub use error::{PipelineError, Result};
pub use extract::{Dataset, load_csv, load_dataset, load_parquet};
pub use extremes::{ExtremeSet, Thresholds};
pub use load::{
    Summary, write_csv, write_extremes_csv, write_extremes_json, write_json, write_parquet,
    write_summary,
};
pub use metrics::{Metric, MetricDescriptor};
pub use query::QueryEngine;
pub use structs::{
    Aggregation, CorrelationMatrix, CountryStats, Observation, PipelineConfig, QuerySpec,
    ResultRow, ResultView, SimpleLogger,
};
pub use transform::{heat_index, wind_chill};

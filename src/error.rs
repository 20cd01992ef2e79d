use arrow_schema::ArrowError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parquet Error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Arrow Error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    /// The source is readable but structurally unusable (e.g. a required column is absent).
    #[error("Data Load Error: {0}")]
    DataLoad(String),
    /// A query named a metric key that is not in the registry.
    #[error("Invalid Metric: '{0}' is not a known metric key")]
    InvalidMetric(String),
}

impl PipelineError {
    /// Whether this error aborts startup, as opposed to failing a single query.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::InvalidMetric(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

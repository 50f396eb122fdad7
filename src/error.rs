use arrow_schema::ArrowError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Column '{0}' has no valid numeric values.")]
    NoValidValues(String),
    #[error("Dataset is empty after cleaning.")]
    EmptyAfterCleaning,
    #[error("Invalid feature vector: {0}")]
    InvalidFeatureVector(String),
    #[error("No active dataset in session")]
    NoActiveDataset,
    #[error("No data available in selected year range {0}-{1}")]
    EmptyYearRange(i32, i32),
    #[error("No trained model for the active dataset")]
    ModelNotTrained,
    #[error("Dataset not found: {0}")]
    DatasetNotFound(i64),
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parquet Error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Arrow Error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Data Error: {0}")]
    Data(String),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// True for errors caused by the uploaded table itself rather than by I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingColumns(_)
                | PipelineError::NoValidValues(_)
                | PipelineError::EmptyAfterCleaning
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

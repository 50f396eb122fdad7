pub mod anomaly;
pub mod clean;
pub mod error;
pub mod load;
pub mod model;
pub mod session;
pub mod store;
pub mod structs;
pub mod transform;
pub mod trend;

// Re-export public API
pub use anomaly::{
    AnomalyRecord, AnomalyReport, DisasterReport, anomaly_report, detect_anomalies, disaster_risks,
};
pub use clean::{ImputationStrategy, MeanImputation, MedianImputation, RawTable, clean, clean_with};
pub use error::{PipelineError, Result};
pub use load::{
    dataset_to_csv, report_to_csv, write_csv, write_dataset_csv, write_json, write_parquet,
    write_summary,
};
pub use model::{Feature, Features, ModelManager, ModelMetrics, ModelStatus, TrainedModel, train_model};
pub use session::{ActiveDataset, Dashboard, Session};
pub use store::{DatasetStore, MemoryPerformanceLog, MemoryStore, PerformanceLog, timed};
pub use structs::{
    CleanedDataset, ClimateRecord, DisasterThresholds, Fingerprint, Granularity, Imputation, Metric,
    PipelineConfig, SimpleLogger, Thresholds,
};
pub use transform::{AggregateRow, BucketKey, Report, Summary, aggregate, build_report, summarize};
pub use trend::YearlyTrend;

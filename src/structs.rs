use crate::clean::{ImputationStrategy, MeanImputation, MedianImputation};
use log::{Log, Metadata, Record as LogRecord};
use serde::{Deserialize, Serialize};
use std::hash::{DefaultHasher, Hash, Hasher};

/// Columns every upload must carry (exact, case-sensitive).
pub const REQUIRED_COLUMNS: [&str; 5] = ["Year", "Month", "Temperature", "Rainfall", "CO2"];

/// Extended columns kept when present.
pub const OPTIONAL_COLUMNS: [&str; 2] = ["Humidity", "WindSpeed"];

/// Simple logger implementation
pub struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &LogRecord) {
        if self.enabled(record.metadata()) {
            println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// One validated row of climate data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateRecord {
    pub year: i32,
    pub month: u32,
    pub temperature: f64,
    pub rainfall: f64,
    pub co2: f64,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

impl ClimateRecord {
    fn hash_into<H: Hasher>(&self, state: &mut H) {
        self.year.hash(state);
        self.month.hash(state);
        self.temperature.to_bits().hash(state);
        self.rainfall.to_bits().hash(state);
        self.co2.to_bits().hash(state);
        self.humidity.map(f64::to_bits).hash(state);
        self.wind_speed.map(f64::to_bits).hash(state);
    }

    /// Bitwise row identity, used for full-row deduplication.
    pub(crate) fn row_key(&self) -> (i32, u32, [u64; 3], [Option<u64>; 2]) {
        (
            self.year,
            self.month,
            [
                self.temperature.to_bits(),
                self.rainfall.to_bits(),
                self.co2.to_bits(),
            ],
            [
                self.humidity.map(f64::to_bits),
                self.wind_speed.map(f64::to_bits),
            ],
        )
    }
}

/// Numeric metric columns of a climate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Temperature,
    Rainfall,
    Co2,
    Humidity,
    WindSpeed,
}

impl Metric {
    pub const REQUIRED: [Metric; 3] = [Metric::Temperature, Metric::Rainfall, Metric::Co2];

    /// Column name as it appears in CSV headers.
    pub fn column(&self) -> &'static str {
        match self {
            Metric::Temperature => "Temperature",
            Metric::Rainfall => "Rainfall",
            Metric::Co2 => "CO2",
            Metric::Humidity => "Humidity",
            Metric::WindSpeed => "WindSpeed",
        }
    }

    pub fn value(&self, record: &ClimateRecord) -> Option<f64> {
        match self {
            Metric::Temperature => Some(record.temperature),
            Metric::Rainfall => Some(record.rainfall),
            Metric::Co2 => Some(record.co2),
            Metric::Humidity => record.humidity,
            Metric::WindSpeed => record.wind_speed,
        }
    }
}

/// Shape and content summary used to decide whether a cached model is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub row_count: usize,
    pub column_count: usize,
    pub min_year: i32,
    pub max_year: i32,
    pub digest: u64,
}

/// Validated, deduplicated climate records. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedDataset {
    records: Vec<ClimateRecord>,
    has_humidity: bool,
    has_wind_speed: bool,
    fingerprint: Fingerprint,
}

impl CleanedDataset {
    /// Callers guarantee `records` is non-empty and that every record carries
    /// the optional fields flagged as present.
    pub(crate) fn from_records(
        records: Vec<ClimateRecord>,
        has_humidity: bool,
        has_wind_speed: bool,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        for record in &records {
            record.hash_into(&mut hasher);
        }
        let min_year = records.iter().map(|r| r.year).min().unwrap_or_default();
        let max_year = records.iter().map(|r| r.year).max().unwrap_or_default();
        let fingerprint = Fingerprint {
            row_count: records.len(),
            column_count: REQUIRED_COLUMNS.len()
                + usize::from(has_humidity)
                + usize::from(has_wind_speed),
            min_year,
            max_year,
            digest: hasher.finish(),
        };
        Self {
            records,
            has_humidity,
            has_wind_speed,
            fingerprint,
        }
    }

    pub fn records(&self) -> &[ClimateRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_humidity(&self) -> bool {
        self.has_humidity
    }

    pub fn has_wind_speed(&self) -> bool {
        self.has_wind_speed
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Metrics carried by every row, required ones first.
    pub fn metrics(&self) -> Vec<Metric> {
        let mut metrics = Metric::REQUIRED.to_vec();
        if self.has_humidity {
            metrics.push(Metric::Humidity);
        }
        if self.has_wind_speed {
            metrics.push(Metric::WindSpeed);
        }
        metrics
    }

    /// Header names in output order.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["Year", "Month"];
        columns.extend(self.metrics().iter().map(Metric::column));
        columns
    }

    /// Restricts the dataset to an inclusive year range.
    ///
    /// Returns `None` when no row falls inside the range.
    pub fn filter_years(&self, start_year: i32, end_year: i32) -> Option<CleanedDataset> {
        let records: Vec<ClimateRecord> = self
            .records
            .iter()
            .filter(|r| r.year >= start_year && r.year <= end_year)
            .cloned()
            .collect();
        if records.is_empty() {
            return None;
        }
        Some(Self::from_records(
            records,
            self.has_humidity,
            self.has_wind_speed,
        ))
    }
}

/// Per-metric z-score thresholds for anomaly detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub temperature: f64,
    pub rainfall: f64,
    pub co2: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temperature: 2.0,
            rainfall: 2.0,
            co2: 2.0,
        }
    }
}

/// Fixed value limits for the disaster-risk predicates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisasterThresholds {
    pub heatwave: f64,
    pub flood: f64,
}

impl Default for DisasterThresholds {
    fn default() -> Self {
        Self {
            heatwave: 36.0,
            flood: 30.0,
        }
    }
}

/// Time bucket used for aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Granularity {
    Year,
    YearMonth,
}

/// Missing-value fill policy applied by the cleaner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Imputation {
    Mean,
    Median,
}

impl Imputation {
    pub fn strategy(&self) -> &'static dyn ImputationStrategy {
        match self {
            Imputation::Mean => &MeanImputation,
            Imputation::Median => &MedianImputation,
        }
    }
}

/// Configuration for the cleaning, detection and training stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub thresholds: Thresholds,
    pub disaster: DisasterThresholds,
    pub granularity: Granularity,
    pub imputation: Imputation,
    /// Seed for the train/test shuffle.
    pub seed: u64,
    /// Share of valid rows held out for evaluation.
    pub test_fraction: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            disaster: DisasterThresholds::default(),
            granularity: Granularity::YearMonth,
            imputation: Imputation::Mean,
            seed: 42,
            test_fraction: 0.2,
        }
    }
}

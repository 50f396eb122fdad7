use crate::error::{PipelineError, Result};
use crate::structs::{CleanedDataset, ClimateRecord, Metric, OPTIONAL_COLUMNS, REQUIRED_COLUMNS};
use crate::transform::{calculate_mean, calculate_median};
use log::{debug, warn};
use std::collections::HashSet;
use std::io::Read;
use std::{fs::File, path::Path};

/// Untyped table as decoded from an upload: a header row plus string cells.
///
/// Empty cells stand for missing values. Rows shorter than the header are
/// padded with empty cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Decodes comma-delimited CSV text with a header row.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Csv` if the text is not valid CSV.
    pub fn from_csv_str(text: &str) -> Result<Self> {
        Self::from_reader(text.as_bytes())
    }

    /// Reads a CSV file from disk. See [`RawTable::from_reader`].
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Io` if the file cannot be opened, otherwise as
    /// [`RawTable::from_reader`].
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!("Reading CSV file: {}", path.display());
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Reads CSV from any byte source into a header row plus string cells.
    ///
    /// Records may have differing lengths; short rows are padded with empty
    /// cells and cells are kept verbatim, so typing happens in [`clean_with`].
    ///
    /// # Arguments
    ///
    /// * `reader` - Byte source holding comma-delimited text whose first record is the header
    ///
    /// # Returns
    ///
    /// Returns a `Result<RawTable>` with one string row per CSV record.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Csv` if the source cannot be read or is not valid
    /// UTF-8 CSV.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(String::from).collect());
        }
        Ok(Self::new(headers, rows))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Policy for filling missing metric cells during cleaning.
pub trait ImputationStrategy {
    fn name(&self) -> &'static str;

    /// Fill value for a column given its observed values (never empty).
    fn fill_value(&self, observed: &[f64]) -> f64;
}

/// Fills gaps with the column mean of the surviving values.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanImputation;

impl ImputationStrategy for MeanImputation {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn fill_value(&self, observed: &[f64]) -> f64 {
        calculate_mean(observed)
    }
}

/// Fills gaps with the column median of the surviving values.
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianImputation;

impl ImputationStrategy for MedianImputation {
    fn name(&self) -> &'static str {
        "median"
    }

    fn fill_value(&self, observed: &[f64]) -> f64 {
        calculate_median(observed)
    }
}

/// Cleans a raw table with [`MeanImputation`].
pub fn clean(raw: &RawTable) -> Result<CleanedDataset> {
    clean_with(raw, &MeanImputation)
}

/// Validates and normalizes an uploaded table into a [`CleanedDataset`].
///
/// Rows without a usable Year or with a Month outside 1..=12 are dropped,
/// duplicates are removed and missing metric cells are filled by `strategy`.
///
/// # Arguments
///
/// * `raw` - Table as decoded from the uploaded CSV
/// * `strategy` - Fill policy for missing metric values
///
/// # Returns
///
/// Returns a `Result<CleanedDataset>` whose rows are unique and fully populated.
///
/// # Errors
///
/// - `MissingColumns` if any of `Year, Month, Temperature, Rainfall, CO2` is absent
/// - `EmptyAfterCleaning` if no row has a usable Year and an in-range Month
/// - `NoValidValues` if a required metric column has no numeric value left
pub fn clean_with(raw: &RawTable, strategy: &dyn ImputationStrategy) -> Result<CleanedDataset> {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| raw.column_index(c).is_none())
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns(missing));
    }

    let mut metrics: Vec<Metric> = Metric::REQUIRED.to_vec();
    for (name, metric) in OPTIONAL_COLUMNS
        .iter()
        .zip([Metric::Humidity, Metric::WindSpeed])
    {
        if raw.column_index(name).is_some() {
            metrics.push(metric);
        }
    }
    let mut projection = Vec::with_capacity(metrics.len() + 2);
    for name in ["Year", "Month"]
        .into_iter()
        .chain(metrics.iter().map(Metric::column))
    {
        if let Some(idx) = raw.column_index(name) {
            projection.push(idx);
        }
    }

    // Project and drop exact duplicates, keeping first occurrences.
    let mut seen: HashSet<Vec<&str>> = HashSet::new();
    let projected: Vec<Vec<&str>> = raw
        .rows()
        .iter()
        .map(|row| projection.iter().map(|&i| row[i].as_str()).collect())
        .filter(|row: &Vec<&str>| seen.insert(row.clone()))
        .collect();
    debug!(
        "Projected {} rows onto {} columns, {} duplicates dropped",
        projected.len(),
        projection.len(),
        raw.rows().len() - projected.len()
    );

    let mut years = Vec::with_capacity(projected.len());
    let mut months = Vec::with_capacity(projected.len());
    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(projected.len()); metrics.len()];
    let mut rejected = 0usize;
    for row in &projected {
        let year = parse_numeric(row[0]).and_then(to_year);
        let month = parse_numeric(row[1]).filter(|m| (1.0..=12.0).contains(m));
        let (Some(year), Some(month)) = (year, month) else {
            rejected += 1;
            continue;
        };
        years.push(year);
        months.push(month.trunc() as u32);
        for (column, cell) in columns.iter_mut().zip(&row[2..]) {
            column.push(parse_numeric(cell));
        }
    }
    if rejected > 0 {
        debug!("Dropped {} rows with missing Year or invalid Month", rejected);
    }
    if years.is_empty() {
        return Err(PipelineError::EmptyAfterCleaning);
    }

    let mut filled: Vec<Option<Vec<f64>>> = Vec::with_capacity(metrics.len());
    for (metric, column) in metrics.iter().zip(&columns) {
        let observed: Vec<f64> = column.iter().flatten().copied().collect();
        if observed.is_empty() {
            if Metric::REQUIRED.contains(metric) {
                return Err(PipelineError::NoValidValues(metric.column().to_string()));
            }
            warn!(
                "Optional column '{}' has no numeric values, dropping it",
                metric.column()
            );
            filled.push(None);
            continue;
        }
        let fill = strategy.fill_value(&observed);
        let gaps = column.len() - observed.len();
        if gaps > 0 {
            debug!(
                "Imputed {} missing {} values with {} {:.4}",
                gaps,
                metric.column(),
                strategy.name(),
                fill
            );
        }
        filled.push(Some(column.iter().map(|v| v.unwrap_or(fill)).collect()));
    }

    let value_of = |metric: Metric, i: usize| -> Option<f64> {
        metrics
            .iter()
            .position(|m| *m == metric)
            .and_then(|idx| filled[idx].as_ref())
            .map(|values| values[i])
    };
    let has_humidity = value_of(Metric::Humidity, 0).is_some();
    let has_wind_speed = value_of(Metric::WindSpeed, 0).is_some();

    let mut keys = HashSet::new();
    let mut records = Vec::with_capacity(years.len());
    for i in 0..years.len() {
        let record = ClimateRecord {
            year: years[i],
            month: months[i],
            temperature: value_of(Metric::Temperature, i).unwrap_or_default(),
            rainfall: value_of(Metric::Rainfall, i).unwrap_or_default(),
            co2: value_of(Metric::Co2, i).unwrap_or_default(),
            humidity: value_of(Metric::Humidity, i),
            wind_speed: value_of(Metric::WindSpeed, i),
        };
        // Coercion and imputation can make distinct raw rows identical.
        if keys.insert(record.row_key()) {
            records.push(record);
        }
    }

    debug!("Cleaning produced {} records", records.len());
    Ok(CleanedDataset::from_records(
        records,
        has_humidity,
        has_wind_speed,
    ))
}

/// Numeric coercion: blanks, text and non-finite values become missing.
fn parse_numeric(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn to_year(value: f64) -> Option<i32> {
    let year = value.trunc();
    if year >= i32::MIN as f64 && year <= i32::MAX as f64 {
        Some(year as i32)
    } else {
        None
    }
}

use crate::anomaly::detect_anomalies;
use crate::structs::{CleanedDataset, ClimateRecord, Granularity, Metric, Thresholds};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Grouping key for aggregation: a year, or a year and month.
///
/// Ordering is by year, then month, which is the report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub year: i32,
    pub month: Option<u32>,
}

impl BucketKey {
    fn for_record(record: &ClimateRecord, granularity: Granularity) -> Self {
        match granularity {
            Granularity::Year => Self {
                year: record.year,
                month: None,
            },
            Granularity::YearMonth => Self {
                year: record.year,
                month: Some(record.month),
            },
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            Some(month) => write!(f, "{}-{:02}", self.year, month),
            None => write!(f, "{}", self.year),
        }
    }
}

/// Mean of every tracked metric within one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub bucket: BucketKey,
    pub count: u32,
    pub temperature: f64,
    pub rainfall: f64,
    pub co2: f64,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

/// Mean and maximum of one metric over a whole dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric: Metric,
    pub mean: f64,
    pub max: f64,
}

/// Whole-dataset statistics for textual reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub rows: usize,
    pub year_min: i32,
    pub year_max: i32,
    pub metrics: Vec<MetricSummary>,
    pub anomaly_count: usize,
}

impl Summary {
    pub fn metric(&self, metric: Metric) -> Option<&MetricSummary> {
        self.metrics.iter().find(|m| m.metric == metric)
    }

    /// Renders the plain-text summary report.
    pub fn to_text(&self, dataset_name: &str) -> String {
        let mut lines = vec![
            format!("Dataset: {}", dataset_name),
            format!("Total rows: {}", self.rows),
            format!("Year range: {} - {}", self.year_min, self.year_max),
        ];
        for m in &self.metrics {
            lines.push(format!("Avg {}: {:.2}", m.metric.column(), m.mean));
            lines.push(format!("Max {}: {:.2}", m.metric.column(), m.max));
        }
        lines.push(format!("Anomalies detected: {}", self.anomaly_count));
        lines.join("\n")
    }
}

/// Summary plus bucketed means, ready for display or export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub dataset_name: String,
    pub granularity: Granularity,
    pub summary: Summary,
    pub rows: Vec<AggregateRow>,
}

impl Report {
    pub fn summary_text(&self) -> String {
        self.summary.to_text(&self.dataset_name)
    }
}

/// Groups records into time buckets and averages each metric.
///
/// Optional metrics are averaged only when the dataset carries them. The
/// result is sorted ascending by bucket (year, then month).
pub fn aggregate(cleaned: &CleanedDataset, granularity: Granularity) -> Vec<AggregateRow> {
    let mut buckets: HashMap<BucketKey, Vec<&ClimateRecord>> = HashMap::new();
    for record in cleaned.records() {
        buckets
            .entry(BucketKey::for_record(record, granularity))
            .or_default()
            .push(record);
    }
    debug!(
        "Aggregating {} records into {} buckets",
        cleaned.len(),
        buckets.len()
    );

    let has_humidity = cleaned.has_humidity();
    let has_wind_speed = cleaned.has_wind_speed();
    let entries: Vec<_> = buckets.into_iter().collect();
    let mut rows: Vec<AggregateRow> = entries
        .into_par_iter()
        .map(|(bucket, records)| {
            let mean_of = |metric: Metric| {
                let values: Vec<f64> = records.iter().filter_map(|r| metric.value(r)).collect();
                calculate_mean(&values)
            };
            AggregateRow {
                bucket,
                count: records.len() as u32,
                temperature: mean_of(Metric::Temperature),
                rainfall: mean_of(Metric::Rainfall),
                co2: mean_of(Metric::Co2),
                humidity: has_humidity.then(|| mean_of(Metric::Humidity)),
                wind_speed: has_wind_speed.then(|| mean_of(Metric::WindSpeed)),
            }
        })
        .collect();

    rows.sort_by_key(|row| row.bucket);
    rows
}

/// Computes whole-dataset statistics, including the anomaly count at the
/// default 2.0 z-score thresholds.
pub fn summarize(cleaned: &CleanedDataset) -> Summary {
    let fingerprint = cleaned.fingerprint();
    let metrics = cleaned
        .metrics()
        .into_iter()
        .map(|metric| {
            let values: Vec<f64> = cleaned
                .records()
                .iter()
                .filter_map(|r| metric.value(r))
                .collect();
            MetricSummary {
                metric,
                mean: calculate_mean(&values),
                max: values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
            }
        })
        .collect();
    let anomaly_count = detect_anomalies(cleaned, &Thresholds::default()).len();

    Summary {
        rows: cleaned.len(),
        year_min: fingerprint.min_year,
        year_max: fingerprint.max_year,
        metrics,
        anomaly_count,
    }
}

/// Builds the summary and the bucketed aggregate from the same dataset.
pub fn build_report(dataset_name: &str, cleaned: &CleanedDataset, granularity: Granularity) -> Report {
    Report {
        dataset_name: dataset_name.to_string(),
        granularity,
        summary: summarize(cleaned),
        rows: aggregate(cleaned, granularity),
    }
}

/// Arithmetic mean. Returns 0.0 for empty input.
pub(crate) fn calculate_mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Standard deviation with denominator N.
pub(crate) fn population_std_dev(data: &[f64], mean: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
}

/// Calculates the median (50th percentile).
///
/// Returns 0.0 for empty datasets.
pub(crate) fn calculate_median(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut sorted_data = data.to_vec();
    sorted_data.sort_by(|a, b| a.total_cmp(b));

    let len = sorted_data.len();
    if len.is_multiple_of(2) {
        (sorted_data[len / 2 - 1] + sorted_data[len / 2]) / 2.0
    } else {
        sorted_data[len / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(year: i32, month: u32, temperature: f64, rainfall: f64) -> ClimateRecord {
        ClimateRecord {
            year,
            month,
            temperature,
            rainfall,
            co2: 400.0 + year as f64 - 2019.0,
            humidity: None,
            wind_speed: None,
        }
    }

    fn dataset() -> CleanedDataset {
        CleanedDataset::from_records(
            vec![
                record(2021, 2, 14.0, 3.0),
                record(2019, 1, 10.0, 1.0),
                record(2020, 5, 12.0, 2.0),
                record(2019, 2, 12.0, 3.0),
                record(2021, 2, 16.0, 5.0),
            ],
            false,
            false,
        )
    }

    #[test]
    fn yearly_buckets_are_sorted_with_means() {
        let rows = aggregate(&dataset(), Granularity::Year);
        let years: Vec<i32> = rows.iter().map(|r| r.bucket.year).collect();
        assert_eq!(years, vec![2019, 2020, 2021]);
        assert_relative_eq!(rows[0].temperature, 11.0);
        assert_relative_eq!(rows[0].rainfall, 2.0);
        assert_eq!(rows[0].count, 2);
        assert_relative_eq!(rows[2].temperature, 15.0);
        assert_relative_eq!(rows[2].co2, 402.0);
        assert_eq!(rows[1].humidity, None);
    }

    #[test]
    fn year_month_buckets_order_by_month_within_year() {
        let rows = aggregate(&dataset(), Granularity::YearMonth);
        let keys: Vec<String> = rows.iter().map(|r| r.bucket.to_string()).collect();
        assert_eq!(keys, vec!["2019-01", "2019-02", "2020-05", "2021-02"]);
        assert_eq!(rows[3].count, 2);
    }

    #[test]
    fn summary_covers_whole_dataset() {
        let summary = summarize(&dataset());
        assert_eq!(summary.rows, 5);
        assert_eq!((summary.year_min, summary.year_max), (2019, 2021));
        let temp = summary.metric(Metric::Temperature).unwrap();
        assert_relative_eq!(temp.mean, 12.8);
        assert_relative_eq!(temp.max, 16.0);
        assert!(summary.metric(Metric::Humidity).is_none());
        assert_eq!(summary.anomaly_count, 0);
    }

    #[test]
    fn summary_text_lists_metrics() {
        let report = build_report("coast.csv", &dataset(), Granularity::Year);
        let text = report.summary_text();
        assert!(text.starts_with("Dataset: coast.csv\nTotal rows: 5\nYear range: 2019 - 2021"));
        assert!(text.contains("Avg Temperature: 12.80"));
        assert!(text.contains("Max Rainfall: 5.00"));
        assert!(text.ends_with("Anomalies detected: 0"));
    }

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(calculate_median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(calculate_median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(calculate_median(&[]), 0.0);
    }
}

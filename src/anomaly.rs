use crate::structs::{CleanedDataset, ClimateRecord, DisasterThresholds, Metric, Thresholds};
use crate::transform::{calculate_mean, population_std_dev};
use log::debug;
use serde::{Deserialize, Serialize};

/// A record flagged as a statistical outlier, with its z-scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub record: ClimateRecord,
    pub temperature_z: f64,
    pub rainfall_z: f64,
    pub co2_z: f64,
}

/// Anomalies plus how many of them exceed each individual threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub thresholds: Thresholds,
    pub anomalies: Vec<AnomalyRecord>,
    pub temperature_alerts: usize,
    pub rainfall_alerts: usize,
    pub co2_alerts: usize,
}

/// Rows matching the fixed-value heatwave and flood predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterReport {
    pub thresholds: DisasterThresholds,
    pub heatwave: Vec<ClimateRecord>,
    pub flood: Vec<ClimateRecord>,
}

impl DisasterReport {
    pub fn heatwave_count(&self) -> usize {
        self.heatwave.len()
    }

    pub fn flood_count(&self) -> usize {
        self.flood.len()
    }

    pub fn is_clear(&self) -> bool {
        self.heatwave.is_empty() && self.flood.is_empty()
    }
}

/// Z-scores of one metric against the whole dataset.
///
/// Uses the population standard deviation. A constant column scores 0.0 on
/// every row; constancy is read from the values, since the computed mean of
/// a fractional column need not equal its elements.
pub fn z_scores(cleaned: &CleanedDataset, metric: Metric) -> Vec<f64> {
    let values: Vec<f64> = cleaned
        .records()
        .iter()
        .map(|r| metric.value(r).unwrap_or_default())
        .collect();
    let constant = values.first().is_none_or(|first| values.iter().all(|v| v == first));
    let mean = calculate_mean(&values);
    let std_dev = population_std_dev(&values, mean);
    if constant || std_dev == 0.0 {
        debug!("{} has zero variance, z-scores fixed at 0", metric.column());
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std_dev).collect()
}

/// Flags rows where any of Temperature, Rainfall or CO2 deviates from its
/// mean by more than the matching threshold (in standard deviations).
///
/// Input order is preserved.
pub fn detect_anomalies(cleaned: &CleanedDataset, thresholds: &Thresholds) -> Vec<AnomalyRecord> {
    let temperature = z_scores(cleaned, Metric::Temperature);
    let rainfall = z_scores(cleaned, Metric::Rainfall);
    let co2 = z_scores(cleaned, Metric::Co2);

    let anomalies: Vec<AnomalyRecord> = cleaned
        .records()
        .iter()
        .enumerate()
        .filter(|&(i, _)| {
            temperature[i].abs() > thresholds.temperature
                || rainfall[i].abs() > thresholds.rainfall
                || co2[i].abs() > thresholds.co2
        })
        .map(|(i, record)| AnomalyRecord {
            record: record.clone(),
            temperature_z: temperature[i],
            rainfall_z: rainfall[i],
            co2_z: co2[i],
        })
        .collect();

    debug!(
        "Detected {} anomalies in {} rows (thresholds T={} R={} C={})",
        anomalies.len(),
        cleaned.len(),
        thresholds.temperature,
        thresholds.rainfall,
        thresholds.co2
    );
    anomalies
}

/// Runs [`detect_anomalies`] and counts alerts per metric.
pub fn anomaly_report(cleaned: &CleanedDataset, thresholds: &Thresholds) -> AnomalyReport {
    let anomalies = detect_anomalies(cleaned, thresholds);
    let temperature_alerts = anomalies
        .iter()
        .filter(|a| a.temperature_z.abs() > thresholds.temperature)
        .count();
    let rainfall_alerts = anomalies
        .iter()
        .filter(|a| a.rainfall_z.abs() > thresholds.rainfall)
        .count();
    let co2_alerts = anomalies
        .iter()
        .filter(|a| a.co2_z.abs() > thresholds.co2)
        .count();
    AnomalyReport {
        thresholds: *thresholds,
        anomalies,
        temperature_alerts,
        rainfall_alerts,
        co2_alerts,
    }
}

/// Applies the heatwave (`temperature > heatwave`) and flood
/// (`rainfall > flood`) predicates to every row.
pub fn disaster_risks(cleaned: &CleanedDataset, thresholds: &DisasterThresholds) -> DisasterReport {
    let heatwave: Vec<ClimateRecord> = cleaned
        .records()
        .iter()
        .filter(|r| r.temperature > thresholds.heatwave)
        .cloned()
        .collect();
    let flood: Vec<ClimateRecord> = cleaned
        .records()
        .iter()
        .filter(|r| r.rainfall > thresholds.flood)
        .cloned()
        .collect();
    debug!(
        "Disaster risks: {} heatwave, {} flood",
        heatwave.len(),
        flood.len()
    );
    DisasterReport {
        thresholds: *thresholds,
        heatwave,
        flood,
    }
}

//! Multivariate temperature model and its fingerprint-keyed cache.
//!
//! The model is an ordinary least-squares fit of `Temperature` on
//! `Year, Month, Rainfall, CO2, Humidity, WindSpeed`. Training holds out a
//! seeded, reproducible share of rows for evaluation, so the same dataset and
//! seed always produce the same coefficients and metrics.

use crate::error::{PipelineError, Result};
use crate::structs::{CleanedDataset, ClimateRecord, Fingerprint};
use crate::transform::calculate_median;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Input variables of the temperature model, in coefficient order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    Year,
    Month,
    Rainfall,
    Co2,
    Humidity,
    WindSpeed,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::Year,
        Feature::Month,
        Feature::Rainfall,
        Feature::Co2,
        Feature::Humidity,
        Feature::WindSpeed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::Year => "Year",
            Feature::Month => "Month",
            Feature::Rainfall => "Rainfall",
            Feature::Co2 => "CO2",
            Feature::Humidity => "Humidity",
            Feature::WindSpeed => "WindSpeed",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "");
        Feature::ALL
            .into_iter()
            .find(|f| f.name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| PipelineError::InvalidFeatureVector(format!("unknown feature '{}'", s)))
    }
}

/// One value per [`Feature`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub year: f64,
    pub month: f64,
    pub rainfall: f64,
    pub co2: f64,
    pub humidity: f64,
    pub wind_speed: f64,
}

impl Features {
    pub fn from_array(values: [f64; 6]) -> Self {
        let [year, month, rainfall, co2, humidity, wind_speed] = values;
        Self {
            year,
            month,
            rainfall,
            co2,
            humidity,
            wind_speed,
        }
    }

    pub fn to_array(&self) -> [f64; 6] {
        [
            self.year,
            self.month,
            self.rainfall,
            self.co2,
            self.humidity,
            self.wind_speed,
        ]
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.to_array()[feature.index()]
    }

    pub fn set(&mut self, feature: Feature, value: f64) {
        let mut values = self.to_array();
        values[feature.index()] = value;
        *self = Self::from_array(values);
    }

    /// Features of a training-eligible record: every feature present and
    /// Month in 1..=12.
    fn from_record(record: &ClimateRecord) -> Option<Self> {
        if !(1..=12).contains(&record.month) {
            return None;
        }
        Some(Self {
            year: record.year as f64,
            month: record.month as f64,
            rainfall: record.rainfall,
            co2: record.co2,
            humidity: record.humidity?,
            wind_speed: record.wind_speed?,
        })
    }
}

/// Held-out evaluation of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// `None` when fewer than two rows were held out.
    pub r2: Option<f64>,
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Fitted linear model, valid for the dataset whose fingerprint it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    fingerprint: Fingerprint,
    coefficients: Features,
    intercept: f64,
    metrics: ModelMetrics,
    feature_defaults: Features,
}

impl TrainedModel {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn coefficients(&self) -> &Features {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn metrics(&self) -> &ModelMetrics {
        &self.metrics
    }

    /// Per-feature medians of the training-eligible rows, used to pre-fill
    /// prediction inputs.
    pub fn feature_defaults(&self) -> &Features {
        &self.feature_defaults
    }

    /// Applies the fitted linear map.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFeatureVector` if any input is NaN or infinite.
    pub fn predict(&self, features: &Features) -> Result<f64> {
        for feature in Feature::ALL {
            let value = features.get(feature);
            if !value.is_finite() {
                return Err(PipelineError::InvalidFeatureVector(format!(
                    "{} is not a finite number ({})",
                    feature, value
                )));
            }
        }
        let prediction = self.intercept
            + self
                .coefficients
                .to_array()
                .iter()
                .zip(features.to_array())
                .map(|(c, x)| c * x)
                .sum::<f64>();
        if !prediction.is_finite() {
            return Err(PipelineError::InvalidFeatureVector(
                "prediction overflowed".to_string(),
            ));
        }
        Ok(prediction)
    }
}

/// Outcome of [`ModelManager::ensure_trained`].
#[derive(Debug, Clone)]
pub enum ModelStatus {
    Trained(Arc<TrainedModel>),
    /// Fewer than two training-eligible rows.
    Unavailable { valid_rows: usize },
}

impl ModelStatus {
    pub fn model(&self) -> Option<&Arc<TrainedModel>> {
        match self {
            ModelStatus::Trained(model) => Some(model),
            ModelStatus::Unavailable { .. } => None,
        }
    }
}

/// Trains models on demand and caches the last one by dataset fingerprint.
#[derive(Debug)]
pub struct ModelManager {
    seed: u64,
    test_fraction: f64,
    cached: Option<Arc<TrainedModel>>,
    training_runs: usize,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new(42, 0.2)
    }
}

impl ModelManager {
    /// Creates an empty cache.
    ///
    /// # Arguments
    ///
    /// * `seed` - Seed for the train/test shuffle, so retraining the same data is reproducible
    /// * `test_fraction` - Share of eligible rows held out for evaluation (rounded up, at least one row)
    ///
    /// # Returns
    ///
    /// Returns a `ModelManager` with no cached model and a zero training counter.
    pub fn new(seed: u64, test_fraction: f64) -> Self {
        Self {
            seed,
            test_fraction,
            cached: None,
            training_runs: 0,
        }
    }

    /// Returns the cached model when it was trained on a dataset with the same
    /// fingerprint, otherwise (or when `force` is set) trains a new one.
    ///
    /// An `Unavailable` outcome clears the cache.
    ///
    /// # Returns
    ///
    /// Returns `ModelStatus::Trained` with a shared handle to the model, or
    /// `ModelStatus::Unavailable` when fewer than two rows carry every feature.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Data` if the least-squares solve fails.
    pub fn ensure_trained(&mut self, cleaned: &CleanedDataset, force: bool) -> Result<ModelStatus> {
        let fingerprint = cleaned.fingerprint();
        if let Some(model) = &self.cached {
            if !force && model.fingerprint == fingerprint {
                debug!("Reusing cached model for {:?}", fingerprint);
                return Ok(ModelStatus::Trained(Arc::clone(model)));
            }
        }

        self.training_runs += 1;
        match train_model(cleaned, self.seed, self.test_fraction)? {
            Some(model) => {
                let model = Arc::new(model);
                self.cached = Some(Arc::clone(&model));
                Ok(ModelStatus::Trained(model))
            }
            None => {
                self.cached = None;
                let valid_rows = cleaned
                    .records()
                    .iter()
                    .filter_map(Features::from_record)
                    .count();
                warn!(
                    "Not enough data to train model: {} valid rows, need at least 2",
                    valid_rows
                );
                Ok(ModelStatus::Unavailable { valid_rows })
            }
        }
    }

    pub fn cached(&self) -> Option<&Arc<TrainedModel>> {
        self.cached.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Number of times a fit was attempted.
    pub fn training_runs(&self) -> usize {
        self.training_runs
    }
}

/// Fits the temperature model on a seeded train/test split.
///
/// Returns `Ok(None)` when fewer than two rows are training-eligible.
pub fn train_model(cleaned: &CleanedDataset, seed: u64, test_fraction: f64) -> Result<Option<TrainedModel>> {
    let (features, targets): (Vec<Features>, Vec<f64>) = cleaned
        .records()
        .iter()
        .filter_map(|r| Features::from_record(r).map(|f| (f, r.temperature)))
        .unzip();
    let rows = features.len();
    if rows < 2 {
        return Ok(None);
    }

    let (train_idx, test_idx) = split_indices(rows, seed, test_fraction);
    debug!(
        "Training on {} rows, evaluating on {} (seed {})",
        train_idx.len(),
        test_idx.len(),
        seed
    );

    let (coefficients, intercept) = fit_least_squares(&features, &targets, &train_idx)?;
    let model_fn = |x: &Features| {
        intercept
            + coefficients
                .iter()
                .zip(x.to_array())
                .map(|(c, v)| c * v)
                .sum::<f64>()
    };

    let actual: Vec<f64> = test_idx.iter().map(|&i| targets[i]).collect();
    let predicted: Vec<f64> = test_idx.iter().map(|&i| model_fn(&features[i])).collect();
    let metrics = evaluate(&actual, &predicted, rows, train_idx.len());

    let mut defaults = [0.0; 6];
    for feature in Feature::ALL {
        let column: Vec<f64> = features.iter().map(|f| f.get(feature)).collect();
        defaults[feature.index()] = calculate_median(&column);
    }

    info!(
        "Model trained: MAE={:.3} RMSE={:.3} R2={} ({} train / {} test rows)",
        metrics.mae,
        metrics.rmse,
        metrics
            .r2
            .map(|r2| format!("{:.3}", r2))
            .unwrap_or_else(|| "n/a".to_string()),
        metrics.train_rows,
        metrics.test_rows
    );

    let mut coef = [0.0; 6];
    coef.copy_from_slice(&coefficients);
    Ok(Some(TrainedModel {
        fingerprint: cleaned.fingerprint(),
        coefficients: Features::from_array(coef),
        intercept,
        metrics,
        feature_defaults: Features::from_array(defaults),
    }))
}

/// Shuffles `0..rows` with a seeded RNG and holds out `ceil(rows * test_fraction)`
/// indices (at least one, leaving at least one for training).
fn split_indices(rows: usize, seed: u64, test_fraction: f64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..rows).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_rows = ((rows as f64) * test_fraction).ceil() as usize;
    let test_rows = test_rows.clamp(1, rows - 1);
    let train = indices.split_off(test_rows);
    (train, indices)
}

/// Least-squares fit with intercept over the selected rows.
///
/// Columns are centered before solving, and the SVD solve zeroes singular
/// directions, giving the minimum-norm solution when the design is rank
/// deficient.
fn fit_least_squares(features: &[Features], targets: &[f64], rows: &[usize]) -> Result<(Vec<f64>, f64)> {
    let n = rows.len() as f64;
    let p = Feature::ALL.len();

    let mut x_mean = vec![0.0; p];
    for &i in rows {
        for (mean, v) in x_mean.iter_mut().zip(features[i].to_array()) {
            *mean += v / n;
        }
    }
    let y_mean = rows.iter().map(|&i| targets[i]).sum::<f64>() / n;

    let x = DMatrix::from_fn(rows.len(), p, |r, c| features[rows[r]].to_array()[c] - x_mean[c]);
    let y = DVector::from_iterator(rows.len(), rows.iter().map(|&i| targets[i] - y_mean));

    let svd = x.svd(true, true);
    let max_sv = svd.singular_values.iter().fold(0.0_f64, |a, &b| a.max(b));
    let tolerance = max_sv * f64::EPSILON * rows.len().max(p) as f64;
    let beta = svd
        .solve(&y, tolerance)
        .map_err(|e| PipelineError::Data(format!("least squares solve failed: {}", e)))?;

    let coefficients: Vec<f64> = beta.iter().copied().collect();
    let intercept = y_mean
        - coefficients
            .iter()
            .zip(&x_mean)
            .map(|(c, m)| c * m)
            .sum::<f64>();
    Ok((coefficients, intercept))
}

fn evaluate(actual: &[f64], predicted: &[f64], rows: usize, train_rows: usize) -> ModelMetrics {
    let n = actual.len() as f64;
    let residuals: Vec<f64> = actual.iter().zip(predicted).map(|(a, p)| a - p).collect();
    let mae = residuals.iter().map(|r| r.abs()).sum::<f64>() / n;
    let ss_res = residuals.iter().map(|r| r * r).sum::<f64>();
    let rmse = (ss_res / n).sqrt();

    let r2 = if actual.len() < 2 {
        None
    } else {
        let mean = actual.iter().sum::<f64>() / n;
        let ss_tot = actual.iter().map(|a| (a - mean).powi(2)).sum::<f64>();
        if ss_tot == 0.0 {
            Some(if ss_res == 0.0 { 1.0 } else { 0.0 })
        } else {
            Some(1.0 - ss_res / ss_tot)
        }
    };

    ModelMetrics {
        mae,
        rmse,
        r2,
        rows,
        train_rows,
        test_rows: actual.len(),
    }
}

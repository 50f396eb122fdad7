use crate::error::{PipelineError, Result};
use crate::structs::{CleanedDataset, Granularity};
use crate::transform::aggregate;
use log::debug;
use serde::{Deserialize, Serialize};

/// Linear trend of yearly mean temperature.
///
/// Fits `temperature = intercept + slope * year` on one point per year. Unlike
/// the multivariate model this needs only the required columns, but at least
/// two distinct years. Metrics are in-sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyTrend {
    intercept: f64,
    slope: f64,
    /// (year, mean temperature) points the line was fitted on
    points: Vec<(i32, f64)>,
    mae: f64,
    rmse: f64,
    r_squared: f64,
}

impl YearlyTrend {
    /// Returns `None` when the dataset spans fewer than two years.
    pub fn fit(cleaned: &CleanedDataset) -> Option<Self> {
        let points: Vec<(i32, f64)> = aggregate(cleaned, Granularity::Year)
            .into_iter()
            .map(|row| (row.bucket.year, row.temperature))
            .collect();
        if points.len() < 2 {
            return None;
        }

        let n = points.len() as f64;
        let sum_t: f64 = points.iter().map(|&(y, _)| y as f64).sum();
        let sum_y: f64 = points.iter().map(|&(_, t)| t).sum();
        let mean_t = sum_t / n;
        let mean_y = sum_y / n;
        let s_tt: f64 = points.iter().map(|&(y, _)| (y as f64 - mean_t).powi(2)).sum();
        let s_ty: f64 = points
            .iter()
            .map(|&(y, t)| (y as f64 - mean_t) * (t - mean_y))
            .sum();

        // Distinct years guarantee s_tt > 0.
        let slope = s_ty / s_tt;
        let intercept = mean_y - slope * mean_t;

        let residuals: Vec<f64> = points
            .iter()
            .map(|&(y, t)| t - (intercept + slope * y as f64))
            .collect();
        let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
        let ss_tot: f64 = points.iter().map(|&(_, t)| (t - mean_y).powi(2)).sum();
        let r_squared = if ss_tot > 1e-10 { 1.0 - ss_res / ss_tot } else { 1.0 };

        debug!(
            "Yearly trend over {} years: slope={:.4}/yr R2={:.3}",
            points.len(),
            slope,
            r_squared
        );
        Some(Self {
            intercept,
            slope,
            mae: residuals.iter().map(|r| r.abs()).sum::<f64>() / n,
            rmse: (ss_res / n).sqrt(),
            r_squared,
            points,
        })
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn points(&self) -> &[(i32, f64)] {
        &self.points
    }

    pub fn mae(&self) -> f64 {
        self.mae
    }

    pub fn rmse(&self) -> f64 {
        self.rmse
    }

    pub fn r_squared(&self) -> f64 {
        self.r_squared
    }

    /// First year after the fitted range, the natural default to forecast.
    pub fn next_year(&self) -> i32 {
        self.points.last().map(|&(y, _)| y + 1).unwrap_or_default()
    }

    /// Predicted yearly mean temperature.
    pub fn predict_year(&self, year: i32) -> Result<f64> {
        let prediction = self.intercept + self.slope * year as f64;
        if !prediction.is_finite() {
            return Err(PipelineError::InvalidFeatureVector(format!(
                "year {} gives a non-finite prediction",
                year
            )));
        }
        Ok(prediction)
    }
}

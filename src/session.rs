//! Per-session pipeline context.
//!
//! A [`Session`] owns the active dataset and the model cache for one user, so
//! nothing is shared between sessions except the stores passed in by the
//! caller. Every stage is timed through the session's [`PerformanceLog`].

use crate::anomaly::{AnomalyReport, DisasterReport, anomaly_report, disaster_risks};
use crate::clean::{RawTable, clean_with};
use crate::error::{PipelineError, Result};
use crate::load::{dataset_to_csv, report_to_csv};
use crate::model::{Features, ModelManager, ModelStatus};
use crate::store::{DatasetStore, MemoryPerformanceLog, PerformanceLog, timed};
use crate::structs::{CleanedDataset, Granularity, PipelineConfig};
use crate::transform::{AggregateRow, Report, Summary, aggregate, build_report, summarize};
use log::info;
use serde::Serialize;

/// Dataset currently open in a session.
#[derive(Debug, Clone)]
pub struct ActiveDataset {
    /// Store id, `None` until an upload is saved.
    pub id: Option<i64>,
    pub name: String,
    pub data: CleanedDataset,
}

/// Everything the dashboard view shows for one year range.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub start_year: i32,
    pub end_year: i32,
    pub summary: Summary,
    pub yearly: Vec<AggregateRow>,
    pub monthly: Vec<AggregateRow>,
    pub anomalies: AnomalyReport,
    pub disasters: DisasterReport,
}

/// Pipeline state for one user.
///
/// Holds at most one active dataset and a [`ModelManager`] keyed on that
/// dataset's fingerprint. `L` receives one timing entry per stage; pass an
/// `Arc<Mutex<_>>` or `&mut` log to share it between sessions.
///
/// # Examples
///
/// ```
/// use lib::{PipelineConfig, Session};
///
/// let mut session = Session::new(1, PipelineConfig::default());
/// let data = session
///     .upload("station.csv", "Year,Month,Temperature,Rainfall,CO2\n2020,1,10,5,400\n")
///     .unwrap();
/// assert_eq!(data.len(), 1);
/// assert_eq!(session.log().entries().len(), 1);
/// ```
pub struct Session<L: PerformanceLog = MemoryPerformanceLog> {
    user_id: i64,
    config: PipelineConfig,
    active: Option<ActiveDataset>,
    models: ModelManager,
    log: L,
}

impl Session<MemoryPerformanceLog> {
    /// Opens a session that records timings in its own [`MemoryPerformanceLog`].
    ///
    /// # Arguments
    ///
    /// * `user_id` - Id stamped on every performance entry and on saved datasets
    /// * `config` - Thresholds, granularity, imputation and split settings for every stage
    pub fn new(user_id: i64, config: PipelineConfig) -> Self {
        Self::with_log(user_id, config, MemoryPerformanceLog::new())
    }
}

impl<L: PerformanceLog> Session<L> {
    /// Opens a session that records timings in `log`.
    pub fn with_log(user_id: i64, config: PipelineConfig, log: L) -> Self {
        let models = ModelManager::new(config.seed, config.test_fraction);
        Self {
            user_id,
            config,
            active: None,
            models,
            log,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn models(&self) -> &ModelManager {
        &self.models
    }

    pub fn active(&self) -> Option<&ActiveDataset> {
        self.active.as_ref()
    }

    fn active_data(&self) -> Result<&CleanedDataset> {
        self.active
            .as_ref()
            .map(|a| &a.data)
            .ok_or(PipelineError::NoActiveDataset)
    }

    /// Cleans uploaded CSV text and makes it the active dataset.
    ///
    /// On failure the previously active dataset stays open. Timed as
    /// `upload_dataset`, failures included.
    ///
    /// # Arguments
    ///
    /// * `name` - Display name of the upload, usually its file name
    /// * `csv_text` - Raw CSV text with at least `Year, Month, Temperature, Rainfall, CO2`
    ///
    /// # Returns
    ///
    /// Returns a `Result<&CleanedDataset>` borrowing the newly active dataset.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Csv` for undecodable text, otherwise the
    /// validation errors of [`clean_with`](crate::clean::clean_with):
    /// `MissingColumns`, `EmptyAfterCleaning` or `NoValidValues`.
    pub fn upload(&mut self, name: &str, csv_text: &str) -> Result<&CleanedDataset> {
        let strategy = self.config.imputation.strategy();
        let data = timed(&mut self.log, Some(self.user_id), "upload_dataset", || {
            clean_with(&RawTable::from_csv_str(csv_text)?, strategy)
        })?;
        info!("Uploaded '{}': {} clean rows", name, data.len());
        let active = self.active.insert(ActiveDataset {
            id: None,
            name: name.to_string(),
            data,
        });
        Ok(&active.data)
    }

    /// Persists the active dataset's cleaned CSV and records the new id.
    ///
    /// # Arguments
    ///
    /// * `store` - Destination store; the session's user id becomes the owner
    /// * `name` - Name to save under, which also renames the active dataset
    ///
    /// # Returns
    ///
    /// Returns the id assigned by the store.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::NoActiveDataset` if nothing is open, or any
    /// error raised while encoding the CSV or inserting it.
    pub fn save_active(&mut self, store: &mut dyn DatasetStore, name: &str) -> Result<i64> {
        let active = self.active.as_mut().ok_or(PipelineError::NoActiveDataset)?;
        let csv_text = dataset_to_csv(&active.data)?;
        let id = store.insert_dataset(name, self.user_id, &csv_text)?;
        active.id = Some(id);
        active.name = name.to_string();
        Ok(id)
    }

    /// Loads a stored dataset, cleans it and makes it active.
    ///
    /// Timed as `load_dataset_from_db`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::DatasetNotFound` for an unknown id, otherwise
    /// the store's error or the cleaning errors of [`Session::upload`]. The
    /// previously active dataset stays open on failure.
    pub fn open_dataset(&mut self, store: &dyn DatasetStore, id: i64) -> Result<&CleanedDataset> {
        let strategy = self.config.imputation.strategy();
        let (name, data) = timed(&mut self.log, Some(self.user_id), "load_dataset_from_db", || {
            let stored = store
                .get_dataset_by_id(id)?
                .ok_or(PipelineError::DatasetNotFound(id))?;
            let data = clean_with(&RawTable::from_csv_str(&stored.csv_text)?, strategy)?;
            Ok::<_, PipelineError>((stored.name, data))
        })?;
        info!("Loaded dataset {} '{}': {} rows", id, name, data.len());
        let active = self.active.insert(ActiveDataset {
            id: Some(id),
            name,
            data,
        });
        Ok(&active.data)
    }

    pub fn close(&mut self) {
        self.active = None;
        self.models.invalidate();
    }

    /// Summary, aggregates, anomalies and disaster alerts for a year range of
    /// the active dataset (the whole dataset when `year_range` is `None`).
    ///
    /// # Arguments
    ///
    /// * `year_range` - Inclusive `(start, end)` years to include
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::NoActiveDataset` if nothing is open and
    /// `PipelineError::EmptyYearRange` if no row falls inside the range.
    pub fn dashboard(&mut self, year_range: Option<(i32, i32)>) -> Result<Dashboard> {
        let data = self
            .active
            .as_ref()
            .map(|a| &a.data)
            .ok_or(PipelineError::NoActiveDataset)?;
        let config = &self.config;
        timed(&mut self.log, Some(self.user_id), "generate_dashboard", || {
            let fingerprint = data.fingerprint();
            let (start_year, end_year) =
                year_range.unwrap_or((fingerprint.min_year, fingerprint.max_year));
            let filtered = data
                .filter_years(start_year, end_year)
                .ok_or(PipelineError::EmptyYearRange(start_year, end_year))?;
            Ok(Dashboard {
                start_year,
                end_year,
                summary: summarize(&filtered),
                yearly: aggregate(&filtered, Granularity::Year),
                monthly: aggregate(&filtered, Granularity::YearMonth),
                anomalies: anomaly_report(&filtered, &config.thresholds),
                disasters: disaster_risks(&filtered, &config.disaster),
            })
        })
    }

    /// Trains (or reuses) the model for the active dataset.
    ///
    /// Timed as `generate_prediction`. With `force` set the cache is bypassed.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::NoActiveDataset` if nothing is open. Too few
    /// eligible rows is not an error: it yields `ModelStatus::Unavailable`.
    pub fn train(&mut self, force: bool) -> Result<ModelStatus> {
        let data = self
            .active
            .as_ref()
            .map(|a| &a.data)
            .ok_or(PipelineError::NoActiveDataset)?;
        let models = &mut self.models;
        timed(&mut self.log, Some(self.user_id), "generate_prediction", || {
            models.ensure_trained(data, force)
        })
    }

    /// Predicts with the model trained on the active dataset. Never trains.
    ///
    /// # Errors
    ///
    /// - `NoActiveDataset` if nothing is open
    /// - `ModelNotTrained` if no cached model matches the active fingerprint
    /// - `InvalidFeatureVector` if any feature is not finite
    pub fn predict(&self, features: &Features) -> Result<f64> {
        let data = self.active_data()?;
        let model = self
            .models
            .cached()
            .filter(|m| m.fingerprint() == data.fingerprint())
            .ok_or(PipelineError::ModelNotTrained)?;
        model.predict(features)
    }

    /// Builds the report for the active dataset at the configured granularity.
    pub fn report(&self) -> Result<Report> {
        let active = self.active.as_ref().ok_or(PipelineError::NoActiveDataset)?;
        Ok(build_report(
            &active.name,
            &active.data,
            self.config.granularity,
        ))
    }

    /// Aggregate report as CSV text.
    pub fn export_report_csv(&mut self) -> Result<String> {
        let data = self
            .active
            .as_ref()
            .map(|a| &a.data)
            .ok_or(PipelineError::NoActiveDataset)?;
        let granularity = self.config.granularity;
        timed(&mut self.log, Some(self.user_id), "export_report", || {
            report_to_csv(&aggregate(data, granularity))
        })
    }

    /// Plain-text summary report.
    pub fn export_summary(&mut self) -> Result<String> {
        let active = self.active.as_ref().ok_or(PipelineError::NoActiveDataset)?;
        timed(&mut self.log, Some(self.user_id), "export_report", || {
            Ok(summarize(&active.data).to_text(&active.name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::{Arc, Mutex};

    const CSV: &str = "Year,Month,Temperature,Rainfall,CO2,Humidity,WindSpeed\n\
                       2019,1,10,35,400,60,3\n\
                       2019,7,37,5,401,40,4\n\
                       2020,1,11,12,402,65,2\n\
                       2020,7,30,8,404,45,5\n\
                       2021,1,12,9,405,70,3\n\
                       2021,7,31,40,407,50,6\n";

    #[test]
    fn failed_upload_keeps_previous_dataset() {
        let mut session = Session::new(1, PipelineConfig::default());
        session.upload("good.csv", CSV).unwrap();
        let err = session.upload("bad.csv", "Year,Month\n2020,1\n").unwrap_err();
        assert!(err.is_validation());
        assert_eq!(session.active().unwrap().name, "good.csv");
        assert_eq!(session.log().entries().len(), 2);
    }

    #[test]
    fn save_then_open_round_trips() {
        let mut store = MemoryStore::new();
        let mut admin = Session::new(1, PipelineConfig::default());
        admin.upload("upload.csv", CSV).unwrap();
        let id = admin.save_active(&mut store, "coast").unwrap();
        assert_eq!(admin.active().unwrap().id, Some(id));

        let mut analyst = Session::new(2, PipelineConfig::default());
        let opened = analyst.open_dataset(&store, id).unwrap().clone();
        assert_eq!(&opened, &admin.active().unwrap().data);
        assert_eq!(analyst.active().unwrap().name, "coast");
        assert!(matches!(
            analyst.open_dataset(&store, id + 1),
            Err(PipelineError::DatasetNotFound(_))
        ));
        let actions: Vec<&str> = analyst
            .log()
            .entries()
            .iter()
            .map(|e| e.action_name.as_str())
            .collect();
        assert_eq!(actions, vec!["load_dataset_from_db", "load_dataset_from_db"]);
    }

    #[test]
    fn dashboard_filters_by_year_range() {
        let mut session = Session::new(1, PipelineConfig::default());
        session.upload("coast.csv", CSV).unwrap();
        let dash = session.dashboard(Some((2020, 2021))).unwrap();
        assert_eq!(dash.summary.rows, 4);
        assert_eq!(dash.yearly.len(), 2);
        assert_eq!(dash.monthly.len(), 4);
        assert_eq!(dash.disasters.flood_count(), 1);
        assert_eq!(dash.disasters.heatwave_count(), 0);

        let full = session.dashboard(None).unwrap();
        assert_eq!(full.disasters.heatwave_count(), 1);
        assert_eq!(full.disasters.flood_count(), 2);
        assert!(matches!(
            session.dashboard(Some((1990, 1991))),
            Err(PipelineError::EmptyYearRange(1990, 1991))
        ));
    }

    #[test]
    fn predict_needs_a_model_for_the_active_dataset() {
        let mut session = Session::new(1, PipelineConfig::default());
        session.upload("coast.csv", CSV).unwrap();
        let defaults = Features::from_array([2020.0, 6.0, 10.0, 403.0, 55.0, 4.0]);
        assert!(matches!(
            session.predict(&defaults),
            Err(PipelineError::ModelNotTrained)
        ));
        let status = session.train(false).unwrap();
        let model = status.model().unwrap();
        let prediction = session.predict(model.feature_defaults()).unwrap();
        assert!(prediction.is_finite());
        assert_eq!(session.models().training_runs(), 1);
    }

    #[test]
    fn no_active_dataset_is_reported() {
        let mut session = Session::new(1, PipelineConfig::default());
        assert!(matches!(session.train(false), Err(PipelineError::NoActiveDataset)));
        assert!(matches!(session.report(), Err(PipelineError::NoActiveDataset)));
    }

    #[test]
    fn exports_are_logged() {
        let mut session = Session::new(7, PipelineConfig::default());
        session.upload("coast.csv", CSV).unwrap();
        let csv = session.export_report_csv().unwrap();
        assert!(csv.starts_with("Year,Month,Count"));
        let summary = session.export_summary().unwrap();
        assert!(summary.contains("Total rows: 6"));
        let exports = session
            .log()
            .for_user(7)
            .into_iter()
            .filter(|e| e.action_name == "export_report")
            .count();
        assert_eq!(exports, 2);
    }

    #[test]
    fn sessions_can_share_one_log() {
        let shared = Arc::new(Mutex::new(MemoryPerformanceLog::new()));
        let mut admin = Session::with_log(1, PipelineConfig::default(), Arc::clone(&shared));
        let mut analyst = Session::with_log(2, PipelineConfig::default(), Arc::clone(&shared));
        admin.upload("coast.csv", CSV).unwrap();
        analyst.upload("coast.csv", CSV).unwrap();
        analyst.dashboard(None).unwrap();

        let log = shared.lock().unwrap();
        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.for_user(1).len(), 1);
        assert_eq!(log.for_user(2).len(), 2);
    }

    #[test]
    fn borrowed_log_outlives_the_session() {
        let mut log = MemoryPerformanceLog::new();
        {
            let mut session = Session::with_log(3, PipelineConfig::default(), &mut log);
            session.upload("coast.csv", CSV).unwrap();
        }
        assert_eq!(log.for_user(3)[0].action_name, "upload_dataset");
    }
}

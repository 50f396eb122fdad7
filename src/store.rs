//! Collaborator interfaces for dataset persistence and performance logging.
//!
//! The in-memory implementations back the CLI and the tests; a relational
//! store only has to implement the same traits.

use crate::error::Result;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// A dataset as persisted: metadata plus its cleaned CSV text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDataset {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub uploaded_at: DateTime<Utc>,
    pub csv_text: String,
}

pub trait DatasetStore {
    fn insert_dataset(&mut self, name: &str, owner_id: i64, csv_text: &str) -> Result<i64>;

    fn get_dataset_by_id(&self, id: i64) -> Result<Option<StoredDataset>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    datasets: BTreeMap<i64, StoredDataset>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

impl DatasetStore for MemoryStore {
    fn insert_dataset(&mut self, name: &str, owner_id: i64, csv_text: &str) -> Result<i64> {
        self.next_id += 1;
        let id = self.next_id;
        self.datasets.insert(
            id,
            StoredDataset {
                id,
                name: name.to_string(),
                owner_id,
                uploaded_at: Utc::now(),
                csv_text: csv_text.to_string(),
            },
        );
        debug!("Stored dataset '{}' as id {}", name, id);
        Ok(id)
    }

    fn get_dataset_by_id(&self, id: i64) -> Result<Option<StoredDataset>> {
        Ok(self.datasets.get(&id).cloned())
    }
}

/// Sink for per-stage wall-clock timings.
pub trait PerformanceLog {
    fn log_performance(&mut self, user_id: Option<i64>, action_name: &str, elapsed_ms: f64);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEntry {
    pub user_id: Option<i64>,
    pub action_name: String,
    pub timestamp: DateTime<Utc>,
    pub execution_time_ms: f64,
}

/// Average execution time of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub action_name: String,
    pub count: usize,
    pub avg_execution_time_ms: f64,
}

#[derive(Debug, Default)]
pub struct MemoryPerformanceLog {
    entries: Vec<PerformanceEntry>,
}

impl MemoryPerformanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[PerformanceEntry] {
        &self.entries
    }

    /// Entries recorded for one user.
    pub fn for_user(&self, user_id: i64) -> Vec<&PerformanceEntry> {
        self.entries
            .iter()
            .filter(|e| e.user_id == Some(user_id))
            .collect()
    }

    /// Average time per action, slowest first.
    pub fn summary(&self) -> Vec<ActionSummary> {
        let mut by_action: HashMap<&str, Vec<f64>> = HashMap::new();
        for entry in &self.entries {
            by_action
                .entry(entry.action_name.as_str())
                .or_default()
                .push(entry.execution_time_ms);
        }
        let mut summary: Vec<ActionSummary> = by_action
            .into_iter()
            .map(|(action, times)| ActionSummary {
                action_name: action.to_string(),
                count: times.len(),
                avg_execution_time_ms: times.iter().sum::<f64>() / times.len() as f64,
            })
            .collect();
        summary.sort_by(|a, b| {
            b.avg_execution_time_ms
                .total_cmp(&a.avg_execution_time_ms)
                .then_with(|| a.action_name.cmp(&b.action_name))
        });
        summary
    }
}

impl PerformanceLog for MemoryPerformanceLog {
    fn log_performance(&mut self, user_id: Option<i64>, action_name: &str, elapsed_ms: f64) {
        self.entries.push(PerformanceEntry {
            user_id,
            action_name: action_name.to_string(),
            timestamp: Utc::now(),
            execution_time_ms: elapsed_ms,
        });
    }
}

impl<T: PerformanceLog + ?Sized> PerformanceLog for &mut T {
    fn log_performance(&mut self, user_id: Option<i64>, action_name: &str, elapsed_ms: f64) {
        (**self).log_performance(user_id, action_name, elapsed_ms);
    }
}

/// A log shared between sessions. Recording continues past a poisoned lock.
impl<T: PerformanceLog + ?Sized> PerformanceLog for Arc<Mutex<T>> {
    fn log_performance(&mut self, user_id: Option<i64>, action_name: &str, elapsed_ms: f64) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .log_performance(user_id, action_name, elapsed_ms);
    }
}

/// Runs `stage`, records its duration and hands back its result untouched,
/// failures included.
pub fn timed<T, E>(
    log: &mut dyn PerformanceLog,
    user_id: Option<i64>,
    action_name: &str,
    stage: impl FnOnce() -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    let start = Instant::now();
    let result = stage();
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    debug!("{} took {:.3} ms", action_name, elapsed_ms);
    log.log_performance(user_id, action_name, elapsed_ms);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[test]
    fn stores_and_fetches_datasets() {
        let mut store = MemoryStore::new();
        let a = store.insert_dataset("a.csv", 1, "Year\n").unwrap();
        let b = store.insert_dataset("b.csv", 1, "Month\n").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
        let fetched = store.get_dataset_by_id(b).unwrap().unwrap();
        assert_eq!(fetched.name, "b.csv");
        assert_eq!(fetched.csv_text, "Month\n");
        assert!(store.get_dataset_by_id(99).unwrap().is_none());
    }

    #[test]
    fn timing_never_masks_failures() {
        let mut log = MemoryPerformanceLog::new();
        let result: std::result::Result<(), PipelineError> =
            timed(&mut log, Some(3), "train", || Err(PipelineError::EmptyAfterCleaning));
        assert!(matches!(result, Err(PipelineError::EmptyAfterCleaning)));
        assert_eq!(log.entries().len(), 1);
        assert_eq!(log.for_user(3)[0].action_name, "train");
    }

    #[test]
    fn summary_orders_slowest_first() {
        let mut log = MemoryPerformanceLog::new();
        log.log_performance(None, "clean", 2.0);
        log.log_performance(Some(1), "train", 10.0);
        log.log_performance(Some(1), "clean", 4.0);
        let summary = log.summary();
        assert_eq!(summary[0].action_name, "train");
        assert_eq!(summary[1].count, 2);
        assert_eq!(summary[1].avg_execution_time_ms, 3.0);
    }

    #[test]
    fn borrowed_log_records_through_the_reference() {
        let mut log = MemoryPerformanceLog::new();
        {
            let mut borrowed = &mut log;
            let _: std::result::Result<u8, PipelineError> =
                timed(&mut borrowed, Some(4), "clean", || Ok(1));
        }
        assert_eq!(log.for_user(4).len(), 1);
    }

    #[test]
    fn shared_log_collects_every_writer() {
        let shared = Arc::new(Mutex::new(MemoryPerformanceLog::new()));
        let mut first = Arc::clone(&shared);
        let mut second = Arc::clone(&shared);
        first.log_performance(Some(1), "upload_dataset", 3.0);
        second.log_performance(Some(2), "upload_dataset", 5.0);
        second.log_performance(Some(2), "train", 1.0);

        let log = shared.lock().unwrap();
        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.for_user(2).len(), 2);
        assert_eq!(log.summary()[0].avg_execution_time_ms, 4.0);
    }
}

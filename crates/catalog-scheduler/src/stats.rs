//! Per-job execution statistics.
//!
//! The `StatsTracker` keeps running counters and a running mean of execution
//! duration for every job id. It is written only by the dispatch loop after
//! each execution attempt completes; every update happens under a single
//! lock so concurrent completions never lose an increment.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution statistics for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    /// Total number of completed execution attempts
    pub total_executions: u64,
    /// Attempts that returned success
    pub successful_executions: u64,
    /// Attempts that returned an error or panicked
    pub failed_executions: u64,
    /// When the most recent attempt completed
    pub last_execution_time: Option<DateTime<Utc>>,
    /// Running mean of wall-clock duration in seconds
    pub average_execution_time: f64,
}

impl JobStats {
    fn record(&mut self, succeeded: bool, duration_secs: f64, at: DateTime<Utc>) {
        self.total_executions += 1;
        if succeeded {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        self.last_execution_time = Some(at);

        let duration = if duration_secs.is_finite() {
            duration_secs.max(0.0)
        } else {
            0.0
        };
        self.average_execution_time +=
            (duration - self.average_execution_time) / self.total_executions as f64;
    }
}

/// Thread-safe statistics store keyed by job id.
///
/// # Example
///
/// ```
/// use catalog_scheduler::StatsTracker;
///
/// let tracker = StatsTracker::new();
/// tracker.record("health_check", true, 0.5);
/// tracker.record("health_check", false, 1.5);
///
/// let stats = tracker.get("health_check").unwrap();
/// assert_eq!(stats.total_executions, 2);
/// assert_eq!(stats.failed_executions, 1);
/// assert!((stats.average_execution_time - 1.0).abs() < 1e-9);
///
/// assert!(tracker.get("unknown").is_none());
/// ```
#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: Mutex<HashMap<String, JobStats>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobStats>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one completed execution attempt.
    ///
    /// Creates the entry on first use.
    pub fn record(&self, job_id: &str, succeeded: bool, duration_secs: f64) {
        let now = Utc::now();
        self.lock()
            .entry(job_id.to_string())
            .or_default()
            .record(succeeded, duration_secs, now);
    }

    /// Statistics for one job, or `None` if it has never executed.
    pub fn get(&self, job_id: &str) -> Option<JobStats> {
        self.lock().get(job_id).cloned()
    }

    /// Statistics for every job that has executed, ordered by job id.
    pub fn get_all(&self) -> BTreeMap<String, JobStats> {
        self.lock()
            .iter()
            .map(|(id, stats)| (id.clone(), stats.clone()))
            .collect()
    }

    /// Reset statistics for one job. Returns whether an entry existed.
    pub fn clear(&self, job_id: &str) -> bool {
        self.lock().remove(job_id).is_some()
    }

    /// Reset statistics for every job.
    pub fn clear_all(&self) {
        self.lock().clear();
    }
}

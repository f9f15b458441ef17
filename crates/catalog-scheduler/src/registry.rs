//! Job registry holding triggers, bodies and next fire times.
//!
//! The `JobRegistry` is the single source of truth for what is scheduled.
//! Registration, removal, pause and resume all go through it, and every
//! change wakes the dispatch loop so a new earliest fire time is honored
//! immediately.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::overlap::InstanceGuard;
use crate::runnable::Runnable;
use crate::trigger::{Trigger, TriggerSpec};
use crate::SchedulerError;

/// Upper bound on missed slots replayed in one dispatch for a
/// non-coalescing job.
const MAX_REPLAYED_SLOTS: usize = 64;

/// Lifecycle state of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible for dispatch
    Active,
    /// Dispatch suspended until resumed
    Paused,
    /// A date trigger that has already fired
    Exhausted,
}

/// Per-job registration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Display name; defaults to the job id
    #[serde(default)]
    pub name: Option<String>,

    /// Collapse a backlog of missed slots into a single firing
    #[serde(default = "default_coalesce")]
    pub coalesce: bool,

    /// Maximum concurrent executions of this job
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    /// Replace an existing job with the same id instead of failing
    #[serde(default)]
    pub replace_existing: bool,

    /// Drop firings dispatched more than this many seconds after their
    /// scheduled time. `None` never drops a late firing.
    #[serde(default)]
    pub misfire_grace_secs: Option<u64>,
}

fn default_coalesce() -> bool {
    true
}

fn default_max_instances() -> usize {
    1
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            name: None,
            coalesce: default_coalesce(),
            max_instances: default_max_instances(),
            replace_existing: false,
            misfire_grace_secs: None,
        }
    }
}

impl JobOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn replacing(mut self) -> Self {
        self.replace_existing = true;
        self
    }

    pub fn with_misfire_grace_secs(mut self, secs: u64) -> Self {
        self.misfire_grace_secs = Some(secs);
        self
    }
}

/// Snapshot of a registered job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    /// Trigger description, e.g. `interval[0:05:00]`
    pub trigger: String,
    /// `None` while paused or once exhausted
    pub next_run_time: Option<DateTime<Utc>>,
    pub state: JobState,
    pub coalesce: bool,
    pub max_instances: usize,
    /// Executions in flight at the time of the snapshot
    pub running_instances: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misfire_grace_secs: Option<u64>,
}

struct JobEntry {
    id: String,
    name: String,
    trigger: Trigger,
    description: String,
    coalesce: bool,
    misfire_grace: Option<Duration>,
    runnable: Arc<dyn Runnable>,
    guard: InstanceGuard,
    next_fire: Option<DateTime<Utc>>,
    state: JobState,
}

impl JobEntry {
    fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            trigger: self.description.clone(),
            next_run_time: self.next_fire,
            state: self.state,
            coalesce: self.coalesce,
            max_instances: self.guard.max_instances(),
            running_instances: self.guard.running(),
            misfire_grace_secs: self
                .misfire_grace
                .and_then(|grace| u64::try_from(grace.num_seconds()).ok()),
        }
    }
}

/// A job whose fire time has arrived, handed to the dispatch loop.
pub(crate) struct DueJob {
    pub id: String,
    pub runnable: Arc<dyn Runnable>,
    pub guard: InstanceGuard,
    /// Firings owed: 1 for coalescing jobs, one per missed slot otherwise
    pub runs: usize,
    pub scheduled: DateTime<Utc>,
}

/// Thread-safe registry of scheduled jobs.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use catalog_scheduler::{IntervalSpec, JobOptions, JobRegistry, JobState, TriggerSpec};
///
/// let registry = JobRegistry::new(chrono_tz::Asia::Seoul);
/// let info = registry
///     .register(
///         "health_check",
///         TriggerSpec::interval(IntervalSpec::minutes(5)),
///         Arc::new(|| async { Ok::<(), String>(()) }),
///         JobOptions::named("System health check"),
///     )
///     .unwrap();
/// assert_eq!(info.trigger, "interval[0:05:00]");
///
/// registry.pause("health_check").unwrap();
/// assert_eq!(registry.get("health_check").unwrap().state, JobState::Paused);
///
/// assert!(registry.unregister("health_check"));
/// assert!(!registry.unregister("health_check"));
/// ```
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobEntry>>,
    timezone: Tz,
    changed: Arc<Notify>,
}

impl JobRegistry {
    /// Create an empty registry evaluating triggers in `timezone`.
    pub fn new(timezone: Tz) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            timezone,
            changed: Arc::new(Notify::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Register a job.
    ///
    /// The trigger is validated before anything is stored, so a failed
    /// registration never leaves a partial entry behind.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidJob` for an empty id, `max_instances == 0`
    ///   or a `misfire_grace_secs` of zero or out of range
    /// - `SchedulerError::InvalidTrigger` for a malformed trigger
    /// - `SchedulerError::DuplicateId` if the id exists and
    ///   `replace_existing` is false
    pub fn register(
        &self,
        job_id: &str,
        trigger: TriggerSpec,
        runnable: Arc<dyn Runnable>,
        options: JobOptions,
    ) -> Result<JobInfo, SchedulerError> {
        if job_id.trim().is_empty() {
            return Err(SchedulerError::InvalidJob(
                "job id must not be empty".to_string(),
            ));
        }
        if options.max_instances == 0 {
            return Err(SchedulerError::InvalidJob(format!(
                "{}: max_instances must be at least 1",
                job_id
            )));
        }

        let misfire_grace = options
            .misfire_grace_secs
            .map(|secs| {
                i64::try_from(secs)
                    .ok()
                    .filter(|secs| *secs > 0)
                    .and_then(Duration::try_seconds)
                    .ok_or_else(|| {
                        SchedulerError::InvalidJob(format!(
                            "{}: misfire_grace_secs {} is out of range",
                            job_id, secs
                        ))
                    })
            })
            .transpose()?;

        let trigger = Trigger::from_spec(&trigger)?;
        let description = trigger.describe(self.timezone);
        let next_fire = trigger.first_fire(Utc::now(), self.timezone);

        let info = {
            let mut jobs = self.write();
            // A replaced job keeps counting its in-flight runs against the
            // new ceiling.
            let guard = match jobs.get(job_id) {
                Some(_) if !options.replace_existing => {
                    return Err(SchedulerError::DuplicateId(job_id.to_string()));
                }
                Some(old) => old.guard.resized(options.max_instances),
                None => InstanceGuard::new(options.max_instances),
            };

            let entry = JobEntry {
                id: job_id.to_string(),
                name: options.name.unwrap_or_else(|| job_id.to_string()),
                trigger,
                description,
                coalesce: options.coalesce,
                misfire_grace,
                runnable,
                guard,
                next_fire,
                state: JobState::Active,
            };
            let info = entry.info();
            jobs.insert(job_id.to_string(), entry);
            info
        };

        info!(
            job = %info.id,
            name = %info.name,
            trigger = %info.trigger,
            next_run = ?info.next_run_time,
            "Job registered"
        );
        self.changed.notify_one();

        Ok(info)
    }

    /// Remove a job. Returns whether it was present.
    pub fn unregister(&self, job_id: &str) -> bool {
        let removed = self.write().remove(job_id).is_some();
        if removed {
            info!(job = %job_id, "Job removed");
            self.changed.notify_one();
        }
        removed
    }

    /// Snapshot of one job.
    pub fn get(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
        self.read()
            .get(job_id)
            .map(JobEntry::info)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }

    /// Snapshot of every job, soonest next fire first.
    ///
    /// Jobs without a next fire time come last; ties are broken by id.
    pub fn list(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self.read().values().map(JobEntry::info).collect();
        jobs.sort_by(|a, b| {
            (a.next_run_time.is_none(), a.next_run_time, &a.id).cmp(&(
                b.next_run_time.is_none(),
                b.next_run_time,
                &b.id,
            ))
        });
        jobs
    }

    /// Suspend dispatch of a job. Pausing a paused job is a no-op.
    pub fn pause(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
        let info = {
            let mut jobs = self.write();
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            match entry.state {
                JobState::Exhausted => {
                    return Err(SchedulerError::JobExhausted(job_id.to_string()))
                }
                JobState::Paused => return Ok(entry.info()),
                JobState::Active => {
                    entry.state = JobState::Paused;
                    entry.next_fire = None;
                }
            }
            entry.info()
        };

        info!(job = %job_id, "Job paused");
        self.changed.notify_one();
        Ok(info)
    }

    /// Reactivate a paused job. Resuming an active job is a no-op.
    ///
    /// The next fire time is computed from now; slots that fell inside the
    /// pause are dropped. A date trigger whose instant passed during the
    /// pause fires on the next dispatch.
    pub fn resume(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
        let info = {
            let mut jobs = self.write();
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            match entry.state {
                JobState::Exhausted => {
                    return Err(SchedulerError::JobExhausted(job_id.to_string()))
                }
                JobState::Active => return Ok(entry.info()),
                JobState::Paused => {
                    let now = Utc::now();
                    entry.state = JobState::Active;
                    entry.next_fire = entry
                        .trigger
                        .first_fire(now, self.timezone)
                        .map(|next| next.max(now));
                }
            }
            entry.info()
        };

        info!(job = %job_id, next_run = ?info.next_run_time, "Job resumed");
        self.changed.notify_one();
        Ok(info)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.read().contains_key(job_id)
    }

    /// Handle the dispatch loop waits on for registry changes.
    pub(crate) fn changed(&self) -> Arc<Notify> {
        self.changed.clone()
    }

    /// Earliest next fire time across active jobs.
    pub(crate) fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.read()
            .values()
            .filter(|entry| entry.state == JobState::Active)
            .filter_map(|entry| entry.next_fire)
            .min()
    }

    /// Claim every active job due at `now` and advance its next fire time.
    ///
    /// Slots older than a job's misfire grace window are not owed; a job
    /// with no slot inside the window is advanced without being returned.
    /// Returned jobs are ordered by scheduled time, then id.
    pub(crate) fn take_due(&self, now: DateTime<Utc>) -> Vec<DueJob> {
        let tz = self.timezone;
        let mut due = Vec::new();

        let mut jobs = self.write();
        for entry in jobs.values_mut() {
            if entry.state != JobState::Active {
                continue;
            }
            let scheduled = match entry.next_fire {
                Some(at) if at <= now => at,
                _ => continue,
            };

            let cutoff = entry
                .misfire_grace
                .and_then(|grace| now.checked_sub_signed(grace));
            let runs = match cutoff {
                None if entry.coalesce => 1,
                _ => {
                    let limit = if entry.coalesce { 1 } else { MAX_REPLAYED_SLOTS };
                    entry.trigger.slots_until(scheduled, now, cutoff, tz, limit)
                }
            };

            entry.next_fire = entry.trigger.next_fire(now, tz);
            if entry.trigger.is_one_shot() {
                entry.state = JobState::Exhausted;
                entry.next_fire = None;
            }
            if runs == 0 {
                warn!(
                    job = %entry.id,
                    scheduled = %scheduled,
                    late_ms = (now - scheduled).num_milliseconds(),
                    next_run = ?entry.next_fire,
                    "Run time missed, skipping"
                );
                continue;
            }
            debug!(
                job = %entry.id,
                scheduled = %scheduled,
                runs,
                next_run = ?entry.next_fire,
                "Job due"
            );

            due.push(DueJob {
                id: entry.id.clone(),
                runnable: entry.runnable.clone(),
                guard: entry.guard.clone(),
                runs,
                scheduled,
            });
        }
        drop(jobs);

        due.sort_by(|a, b| (a.scheduled, &a.id).cmp(&(b.scheduled, &b.id)));
        due
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(chrono_tz::UTC)
    }
}

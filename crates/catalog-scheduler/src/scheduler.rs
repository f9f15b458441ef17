//! Scheduler service owning the dispatch loop.
//!
//! Provides lifecycle management for scheduled jobs: a single dispatch task
//! wakes at the soonest next fire time, launches every due job body on its
//! own task and records the outcome in the statistics tracker. Job failures
//! are contained here and never stop the loop.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cron::CronSpec;
use crate::error::JobExecutionError;
use crate::overlap::InstanceSlot;
use crate::registry::{DueJob, JobInfo, JobOptions, JobRegistry};
use crate::runnable::Runnable;
use crate::stats::{JobStats, StatsTracker};
use crate::trigger::{IntervalSpec, TriggerSpec};
use crate::{SchedulerConfig, SchedulerError};

/// Next fire time of one job, as reported by [`SchedulerService::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextRunTime {
    pub job_id: String,
    pub next_run_time: Option<DateTime<Utc>>,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub job_count: usize,
    /// Ordered like [`JobRegistry::list`]
    pub next_run_times: Vec<NextRunTime>,
}

struct DispatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Explicitly owned scheduler instance.
///
/// Create one at process start, hand it (or an `Arc` of it) to whatever
/// needs it and call `stop` at process shutdown. Jobs can be registered
/// before or after `start`.
///
/// # Example
///
/// ```
/// use catalog_scheduler::{IntervalSpec, JobOptions, SchedulerConfig, SchedulerService};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), catalog_scheduler::SchedulerError> {
/// let scheduler = SchedulerService::new(SchedulerConfig::with_timezone("Asia/Seoul"))?;
/// scheduler.add_interval_job(
///     "health_check",
///     IntervalSpec::minutes(5),
///     || async { Ok::<(), String>(()) },
///     JobOptions::named("System health check"),
/// )?;
///
/// scheduler.start().await;
/// assert!(scheduler.status().is_running);
/// scheduler.stop(true).await;
/// # Ok(())
/// # }
/// ```
pub struct SchedulerService {
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    stats: Arc<StatsTracker>,
    tracker: TaskTracker,
    dispatch: Mutex<Option<DispatchHandle>>,
}

impl SchedulerService {
    /// Create a stopped scheduler.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` if the configured timezone
    /// is not a valid IANA identifier.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let timezone = config.parse_timezone()?;

        Ok(Self {
            config,
            registry: Arc::new(JobRegistry::new(timezone)),
            stats: Arc::new(StatsTracker::new()),
            tracker: TaskTracker::new(),
            dispatch: Mutex::new(None),
        })
    }

    fn dispatch(&self) -> MutexGuard<'_, Option<DispatchHandle>> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start dispatching. Starting a running scheduler is a no-op.
    pub async fn start(&self) {
        let mut dispatch = self.dispatch();
        if dispatch.is_some() {
            warn!("Scheduler already running");
            return;
        }

        self.tracker.reopen();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatch_loop(
            self.registry.clone(),
            self.stats.clone(),
            self.tracker.clone(),
            cancel.clone(),
            self.config.idle_poll(),
        ));
        *dispatch = Some(DispatchHandle { cancel, task });

        info!(
            timezone = %self.registry.timezone().name(),
            jobs = self.registry.len(),
            "Scheduler started"
        );
    }

    /// Stop dispatching. Stopping a stopped scheduler is a no-op.
    ///
    /// No new firings are launched once this returns. In-flight executions
    /// are never cancelled: with `wait_for_running_jobs` they are awaited
    /// for at most `shutdown_timeout_secs`, otherwise they finish on their
    /// own.
    pub async fn stop(&self, wait_for_running_jobs: bool) {
        let handle = self.dispatch().take();
        let Some(handle) = handle else {
            warn!("Scheduler not running");
            return;
        };

        info!(wait = wait_for_running_jobs, "Initiating scheduler shutdown");
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!(error = %e, "Dispatch loop ended abnormally");
        }

        if wait_for_running_jobs {
            self.tracker.close();
            let timeout = self.config.shutdown_timeout();
            if tokio::time::timeout(timeout, self.tracker.wait())
                .await
                .is_err()
            {
                warn!(
                    in_flight = self.tracker.len(),
                    timeout_secs = timeout.as_secs(),
                    "Timed out waiting for running jobs"
                );
            }
        }

        info!("Scheduler shutdown complete");
    }

    pub fn is_running(&self) -> bool {
        self.dispatch().is_some()
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs = self.registry.list();
        SchedulerStatus {
            is_running: self.is_running(),
            job_count: jobs.len(),
            next_run_times: jobs
                .into_iter()
                .map(|job| NextRunTime {
                    job_id: job.id,
                    next_run_time: job.next_run_time,
                })
                .collect(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn timezone(&self) -> Tz {
        self.registry.timezone()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    /// Register a job with any trigger.
    ///
    /// # Errors
    ///
    /// See [`JobRegistry::register`].
    pub fn register_job<R>(
        &self,
        job_id: &str,
        trigger: TriggerSpec,
        job: R,
        options: JobOptions,
    ) -> Result<JobInfo, SchedulerError>
    where
        R: Runnable + 'static,
    {
        self.register_shared(job_id, trigger, Arc::new(job), options)
    }

    /// Register a job whose body is already shared.
    pub fn register_shared(
        &self,
        job_id: &str,
        trigger: TriggerSpec,
        job: Arc<dyn Runnable>,
        options: JobOptions,
    ) -> Result<JobInfo, SchedulerError> {
        self.registry.register(job_id, trigger, job, options)
    }

    pub fn add_interval_job<R>(
        &self,
        job_id: &str,
        interval: IntervalSpec,
        job: R,
        options: JobOptions,
    ) -> Result<JobInfo, SchedulerError>
    where
        R: Runnable + 'static,
    {
        self.register_job(job_id, TriggerSpec::interval(interval), job, options)
    }

    pub fn add_cron_job<R>(
        &self,
        job_id: &str,
        cron: CronSpec,
        job: R,
        options: JobOptions,
    ) -> Result<JobInfo, SchedulerError>
    where
        R: Runnable + 'static,
    {
        self.register_job(job_id, TriggerSpec::cron(cron), job, options)
    }

    pub fn add_date_job<R>(
        &self,
        job_id: &str,
        run_date: DateTime<Utc>,
        job: R,
        options: JobOptions,
    ) -> Result<JobInfo, SchedulerError>
    where
        R: Runnable + 'static,
    {
        self.register_job(job_id, TriggerSpec::date(run_date), job, options)
    }

    /// Remove a job; its statistics are kept until cleared.
    pub fn remove_job(&self, job_id: &str) -> bool {
        self.registry.unregister(job_id)
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
        self.registry.get(job_id)
    }

    pub fn get_jobs(&self) -> Vec<JobInfo> {
        self.registry.list()
    }

    pub fn pause_job(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
        self.registry.pause(job_id)
    }

    pub fn resume_job(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
        self.registry.resume(job_id)
    }

    pub fn get_stats(&self, job_id: &str) -> Option<JobStats> {
        self.stats.get(job_id)
    }

    pub fn get_all_stats(&self) -> BTreeMap<String, JobStats> {
        self.stats.get_all()
    }

    /// Reset statistics for one job, or for every job when `job_id` is `None`.
    /// Returns whether anything was cleared.
    pub fn clear_stats(&self, job_id: Option<&str>) -> bool {
        match job_id {
            Some(id) => self.stats.clear(id),
            None => {
                let had_any = !self.stats.get_all().is_empty();
                self.stats.clear_all();
                had_any
            }
        }
    }
}

impl Drop for SchedulerService {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatch().take() {
            handle.cancel.cancel();
        }
    }
}

async fn dispatch_loop(
    registry: Arc<JobRegistry>,
    stats: Arc<StatsTracker>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    idle_poll: Duration,
) {
    let changed = registry.changed();
    debug!(idle_poll_ms = idle_poll.as_millis() as u64, "Dispatch loop started");

    loop {
        for job in registry.take_due(Utc::now()) {
            launch(job, &stats, &tracker);
        }

        let sleep_for = registry
            .next_wake()
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            .map_or(idle_poll, |until| until.min(idle_poll));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = changed.notified() => {}
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    debug!("Dispatch loop exited");
}

fn launch(job: DueJob, stats: &Arc<StatsTracker>, tracker: &TaskTracker) {
    for run in 0..job.runs {
        let Some(slot) = job.guard.try_acquire() else {
            warn!(
                job = %job.id,
                running = job.guard.running(),
                max_instances = job.guard.max_instances(),
                skipped = job.runs - run,
                "Max instances reached, skipping firing"
            );
            break;
        };
        tracker.spawn(execute(
            job.id.clone(),
            job.runnable.clone(),
            stats.clone(),
            slot,
        ));
    }
}

async fn execute(
    job_id: String,
    runnable: Arc<dyn Runnable>,
    stats: Arc<StatsTracker>,
    slot: InstanceSlot,
) {
    let run_id = Uuid::new_v4();
    debug!(job = %job_id, run_id = %run_id, "Job started");
    let start = Instant::now();

    // Inner task so a panicking body surfaces as a JoinError
    let outcome = match tokio::spawn(async move { runnable.run().await }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(JobExecutionError::Failed(e)),
        Err(e) => Err(JobExecutionError::Aborted(e.to_string())),
    };

    let elapsed = start.elapsed();
    stats.record(&job_id, outcome.is_ok(), elapsed.as_secs_f64());
    drop(slot);

    match outcome {
        Ok(()) => info!(
            job = %job_id,
            run_id = %run_id,
            duration_ms = elapsed.as_millis() as u64,
            "Job completed"
        ),
        Err(e) => error!(
            job = %job_id,
            run_id = %run_id,
            duration_ms = elapsed.as_millis() as u64,
            error = %e,
            "Job failed"
        ),
    }
}

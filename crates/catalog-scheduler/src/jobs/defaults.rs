//! Built-in job set registered at daemon startup.
//!
//! Each default job has a fixed id, display name and trigger. The bodies
//! are opaque to the scheduler: they default to logging stand-ins, and the
//! catalog ad pipeline runs an external command when one is configured.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cron::CronSpec;
use crate::jobs::command::{CommandJob, CommandJobConfig};
use crate::registry::{JobInfo, JobOptions};
use crate::runnable::{JobOutcome, Runnable};
use crate::trigger::{IntervalSpec, TriggerSpec};
use crate::{SchedulerError, SchedulerService};

/// Seconds a default job may be dispatched late before the firing is dropped.
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 15;

/// The built-in jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultJob {
    HealthCheck,
    DataCleanup,
    Backup,
    ApiSync,
    Notification,
    MetaCatalogAd,
}

impl DefaultJob {
    pub const ALL: [DefaultJob; 6] = [
        DefaultJob::HealthCheck,
        DefaultJob::DataCleanup,
        DefaultJob::Backup,
        DefaultJob::ApiSync,
        DefaultJob::Notification,
        DefaultJob::MetaCatalogAd,
    ];

    pub fn id(self) -> &'static str {
        match self {
            DefaultJob::HealthCheck => "health_check",
            DefaultJob::DataCleanup => "data_cleanup",
            DefaultJob::Backup => "backup",
            DefaultJob::ApiSync => "api_sync",
            DefaultJob::Notification => "notification",
            DefaultJob::MetaCatalogAd => "meta_catalog_ad",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            DefaultJob::HealthCheck => "System health check",
            DefaultJob::DataCleanup => "Data cleanup",
            DefaultJob::Backup => "System backup",
            DefaultJob::ApiSync => "API sync",
            DefaultJob::Notification => "Daily notification",
            DefaultJob::MetaCatalogAd => "Meta catalog ad image generation",
        }
    }

    /// Trigger used when the configuration does not override it.
    pub fn default_trigger(self) -> TriggerSpec {
        match self {
            DefaultJob::HealthCheck => TriggerSpec::interval(IntervalSpec::minutes(5)),
            DefaultJob::DataCleanup => TriggerSpec::cron(CronSpec::new().hour(2).minute(0)),
            DefaultJob::Backup => {
                TriggerSpec::cron(CronSpec::new().day_of_week("sun").hour(3).minute(0))
            }
            DefaultJob::ApiSync => TriggerSpec::interval(IntervalSpec::minutes(30)),
            DefaultJob::Notification => TriggerSpec::cron(CronSpec::new().hour(9).minute(0)),
            DefaultJob::MetaCatalogAd => TriggerSpec::cron(CronSpec::new().hour(3).minute(0)),
        }
    }

    /// Only the health check and the catalog pipeline run out of the box.
    pub fn enabled_by_default(self) -> bool {
        matches!(self, DefaultJob::HealthCheck | DefaultJob::MetaCatalogAd)
    }
}

/// Per-job override. Unset fields fall back to the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobToggle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerSpec>,
}

/// Configuration for the default job set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultJobsConfig {
    pub health_check: JobToggle,
    pub data_cleanup: JobToggle,
    pub backup: JobToggle,
    pub api_sync: JobToggle,
    pub notification: JobToggle,
    pub meta_catalog_ad: JobToggle,

    /// Command that runs the catalog ad pipeline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_command: Option<CommandJobConfig>,
}

impl DefaultJobsConfig {
    fn toggle(&self, job: DefaultJob) -> &JobToggle {
        match job {
            DefaultJob::HealthCheck => &self.health_check,
            DefaultJob::DataCleanup => &self.data_cleanup,
            DefaultJob::Backup => &self.backup,
            DefaultJob::ApiSync => &self.api_sync,
            DefaultJob::Notification => &self.notification,
            DefaultJob::MetaCatalogAd => &self.meta_catalog_ad,
        }
    }

    pub fn is_enabled(&self, job: DefaultJob) -> bool {
        self.toggle(job)
            .enabled
            .unwrap_or_else(|| job.enabled_by_default())
    }

    pub fn trigger(&self, job: DefaultJob) -> TriggerSpec {
        self.toggle(job)
            .trigger
            .clone()
            .unwrap_or_else(|| job.default_trigger())
    }

    /// Enabled jobs in declaration order.
    pub fn enabled_jobs(&self) -> Vec<DefaultJob> {
        DefaultJob::ALL
            .into_iter()
            .filter(|job| self.is_enabled(*job))
            .collect()
    }
}

/// Stand-in body that only logs. Used for jobs whose real work lives in
/// an external service.
struct LogOnlyJob {
    job: DefaultJob,
}

#[async_trait]
impl Runnable for LogOnlyJob {
    async fn run(&self) -> JobOutcome {
        info!(job = %self.job.id(), name = %self.job.display_name(), "Default job executed");
        Ok(())
    }
}

/// Bodies wired into the default jobs. Fields can be swapped before
/// registration to inject real collaborators.
#[derive(Clone)]
pub struct DefaultJobBodies {
    pub health_check: Arc<dyn Runnable>,
    pub data_cleanup: Arc<dyn Runnable>,
    pub backup: Arc<dyn Runnable>,
    pub api_sync: Arc<dyn Runnable>,
    pub notification: Arc<dyn Runnable>,
    pub meta_catalog_ad: Arc<dyn Runnable>,
}

impl DefaultJobBodies {
    /// Logging bodies everywhere, except the catalog pipeline which runs
    /// `catalog_command` when given.
    pub fn builtin(catalog_command: Option<&CommandJobConfig>) -> Self {
        let log = |job| -> Arc<dyn Runnable> { Arc::new(LogOnlyJob { job }) };
        let meta_catalog_ad: Arc<dyn Runnable> = match catalog_command {
            Some(config) => Arc::new(CommandJob::new(config.clone())),
            None => log(DefaultJob::MetaCatalogAd),
        };

        Self {
            health_check: log(DefaultJob::HealthCheck),
            data_cleanup: log(DefaultJob::DataCleanup),
            backup: log(DefaultJob::Backup),
            api_sync: log(DefaultJob::ApiSync),
            notification: log(DefaultJob::Notification),
            meta_catalog_ad,
        }
    }

    pub fn body(&self, job: DefaultJob) -> Arc<dyn Runnable> {
        match job {
            DefaultJob::HealthCheck => self.health_check.clone(),
            DefaultJob::DataCleanup => self.data_cleanup.clone(),
            DefaultJob::Backup => self.backup.clone(),
            DefaultJob::ApiSync => self.api_sync.clone(),
            DefaultJob::Notification => self.notification.clone(),
            DefaultJob::MetaCatalogAd => self.meta_catalog_ad.clone(),
        }
    }
}

/// Register every enabled default job.
///
/// Registration stops at the first failure; jobs registered before it stay
/// in place.
///
/// # Errors
///
/// Returns the registry error for the failing job, e.g. an invalid trigger
/// override or a duplicate id.
pub fn register_default_jobs(
    scheduler: &SchedulerService,
    config: &DefaultJobsConfig,
    bodies: &DefaultJobBodies,
) -> Result<Vec<JobInfo>, SchedulerError> {
    let mut registered = Vec::new();
    for job in config.enabled_jobs() {
        let info = scheduler.register_shared(
            job.id(),
            config.trigger(job),
            bodies.body(job),
            JobOptions::named(job.display_name())
                .with_misfire_grace_secs(DEFAULT_MISFIRE_GRACE_SECS),
        )?;
        registered.push(info);
    }

    info!(count = registered.len(), "Default jobs registered");
    Ok(registered)
}

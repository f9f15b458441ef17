//! Ad-hoc jobs registered at runtime.
//!
//! A custom job carries an optional JSON payload that it logs on every
//! execution. Its id is derived from the name so callers can look it up,
//! pause it or remove it later.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::registry::{JobInfo, JobOptions};
use crate::runnable::{JobOutcome, Runnable};
use crate::trigger::{IntervalSpec, TriggerSpec};
use crate::{SchedulerError, SchedulerService};

/// Registry id for a custom job name.
pub fn custom_job_id(name: &str) -> String {
    format!("custom_{}", name)
}

/// Trigger used when none is given: every 60 minutes.
pub fn default_custom_trigger() -> TriggerSpec {
    TriggerSpec::interval(IntervalSpec::minutes(60))
}

struct CustomJob {
    name: String,
    data: Option<Value>,
}

#[async_trait]
impl Runnable for CustomJob {
    async fn run(&self) -> JobOutcome {
        match &self.data {
            Some(data) => info!(name = %self.name, data = %data, "Custom job executed"),
            None => info!(name = %self.name, "Custom job executed"),
        }
        Ok(())
    }
}

/// Register a custom job under `custom_<name>`.
///
/// # Errors
///
/// Fails like [`SchedulerService::register_job`]; an empty name is rejected
/// with `SchedulerError::InvalidJob`.
pub fn register_custom_job(
    scheduler: &SchedulerService,
    name: &str,
    data: Option<Value>,
    trigger: Option<TriggerSpec>,
) -> Result<JobInfo, SchedulerError> {
    if name.trim().is_empty() {
        return Err(SchedulerError::InvalidJob(
            "custom job name must not be empty".to_string(),
        ));
    }

    scheduler.register_job(
        &custom_job_id(name),
        trigger.unwrap_or_else(default_custom_trigger),
        CustomJob {
            name: name.to_string(),
            data,
        },
        JobOptions::named(format!("Custom job: {}", name)),
    )
}

//! Error types for the scheduler crate.
//!
//! Registration and configuration errors are returned synchronously to the
//! caller. Failures inside job bodies never surface here; they are contained
//! by the dispatch loop and only show up in statistics and logs.

use thiserror::Error;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job with this id is already registered
    #[error("Job already registered: {0}")]
    DuplicateId(String),

    /// Job not found in the registry
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Date job already fired and can no longer be paused or resumed
    #[error("Job already exhausted: {0}")]
    JobExhausted(String),

    /// Malformed trigger descriptor
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Invalid job options (empty id, zero max_instances)
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Invalid timezone string
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Failure of a single job execution.
///
/// Only produced inside the dispatch loop, where it is logged and recorded
/// as a failed execution.
#[derive(Debug, Error)]
pub(crate) enum JobExecutionError {
    /// The job body returned an error
    #[error("job returned error: {0}")]
    Failed(String),

    /// The job body panicked or its task was aborted
    #[error("job task aborted: {0}")]
    Aborted(String),
}

//! Predefined job implementations.
//!
//! # Available Jobs
//!
//! - **defaults**: the built-in job set (health check, cleanup, backup, API
//!   sync, notification, catalog ad pipeline)
//! - **command**: runs an external program as a job body
//! - **custom**: ad-hoc jobs with a JSON payload registered at runtime

pub mod command;
pub mod custom;
pub mod defaults;

pub use command::{CommandJob, CommandJobConfig};
pub use custom::{custom_job_id, default_custom_trigger, register_custom_job};
pub use defaults::{
    register_default_jobs, DefaultJob, DefaultJobBodies, DefaultJobsConfig, JobToggle,
    DEFAULT_MISFIRE_GRACE_SECS,
};

//! Job scheduler for the catalog automation daemon.
//!
//! This crate runs named jobs on interval, cron and one-shot date triggers
//! with per-job concurrency limits and execution statistics.
//!
//! # Features
//!
//! - Interval, cron (six fields, timezone-aware) and date triggers
//! - Event-driven dispatch loop; every job body runs on its own task
//! - `max_instances` ceiling, missed-slot coalescing and a misfire grace
//!   window per job
//! - Per-job execution statistics with a running mean duration
//! - Pause, resume, removal and status introspection
//! - Built-in default job set and runtime custom jobs
//!
//! # Example
//!
//! ```
//! use catalog_scheduler::{CronSpec, JobOptions, SchedulerConfig, SchedulerService};
//!
//! # async fn run_pipeline() -> std::io::Result<()> { Ok(()) }
//! # #[tokio::main]
//! # async fn main() -> Result<(), catalog_scheduler::SchedulerError> {
//! let scheduler = SchedulerService::new(SchedulerConfig::with_timezone("Asia/Seoul"))?;
//!
//! scheduler.add_cron_job(
//!     "meta_catalog_ad",
//!     CronSpec::new().hour(3).minute(0),
//!     || async { run_pipeline().await.map_err(|e| e.to_string()) },
//!     JobOptions::named("Meta catalog ad image generation").with_misfire_grace_secs(15),
//! )?;
//!
//! scheduler.start().await;
//! assert_eq!(scheduler.get_jobs().len(), 1);
//! scheduler.stop(true).await;
//! # Ok(())
//! # }
//! ```

mod config;
mod cron;
mod error;
mod overlap;
mod registry;
mod runnable;
mod scheduler;
mod stats;
mod trigger;

pub mod jobs;

pub use config::SchedulerConfig;
pub use cron::{CronSchedule, CronSpec};
pub use error::SchedulerError;
pub use overlap::{InstanceGuard, InstanceSlot};
pub use registry::{JobInfo, JobOptions, JobRegistry, JobState};
pub use runnable::{BlockingJob, JobOutcome, Runnable};
pub use scheduler::{NextRunTime, SchedulerService, SchedulerStatus};
pub use stats::{JobStats, StatsTracker};
pub use trigger::{IntervalSpec, Trigger, TriggerSpec};

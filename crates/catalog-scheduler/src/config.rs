//! Scheduler configuration.
//!
//! Provides configuration for the scheduler service including the
//! timezone used to evaluate cron and date triggers, the shutdown
//! timeout, and the idle wake-up interval of the dispatch loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Configuration for the scheduler service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Timezone for cron fields and naive dates (IANA timezone string,
    /// e.g., "Asia/Seoul"). Defaults to "UTC".
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Timeout in seconds for `stop(true)`.
    /// In-flight jobs are awaited at most this long. Defaults to 30 seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Longest time the dispatch loop sleeps without re-checking the
    /// registry, in milliseconds. Defaults to 1000.
    #[serde(default = "default_idle_poll")]
    pub idle_poll_ms: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_idle_poll() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            idle_poll_ms: default_idle_poll(),
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration for the given timezone with default timings.
    pub fn with_timezone(timezone: impl Into<String>) -> Self {
        Self {
            timezone: timezone.into(),
            ..Default::default()
        }
    }

    /// Parse the configured timezone string into a chrono_tz::Tz.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` if the timezone string
    /// is not a valid IANA timezone identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.timezone.clone()))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Idle wake-up interval, never shorter than 10ms.
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(10))
    }
}

//! Daemon configuration.
//!
//! Settings are layered (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/catalog-scheduler/config.toml)
//! 3. CLI-specified config file (optional)
//! 4. Environment variables (CATALOG_*)
//!
//! CLI flags are applied by the caller after loading.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use catalog_scheduler::jobs::DefaultJobsConfig;
use catalog_scheduler::SchedulerConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized
    #[error("Configuration error: {0}")]
    Load(String),

    /// Values were read but are not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Name used in log output
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// IANA timezone for cron and date triggers
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// How long `stop` waits for running jobs
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Longest idle sleep of the dispatch loop
    #[serde(default = "default_idle_poll")]
    pub idle_poll_ms: u64,

    /// Default job toggles and the catalog pipeline command
    #[serde(default)]
    pub jobs: DefaultJobsConfig,
}

fn default_app_name() -> String {
    "catalog-scheduler".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_idle_poll() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            log_level: default_log_level(),
            timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            idle_poll_ms: default_idle_poll(),
            jobs: DefaultJobsConfig::default(),
        }
    }
}

/// Default config file location, without extension.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "catalog-scheduler")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config")
}

impl Settings {
    /// Load settings with layered precedence.
    ///
    /// Environment variables use `_` after the prefix and `__` between
    /// nesting levels, e.g. `CATALOG_LOG_LEVEL` or
    /// `CATALOG_JOBS__BACKUP__ENABLED`.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("app_name", default_app_name())?
            .set_default("log_level", default_log_level())?
            .set_default("timezone", default_timezone())?
            .set_default("shutdown_timeout_secs", default_shutdown_timeout())?
            .set_default("idle_poll_ms", default_idle_poll())?
            .add_source(File::with_name(&default_config_path().to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("CATALOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check values the deserializer cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler_config()
            .parse_timezone()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid("log_level must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            timezone: self.timezone.clone(),
            shutdown_timeout_secs: self.shutdown_timeout_secs,
            idle_poll_ms: self.idle_poll_ms,
        }
    }
}

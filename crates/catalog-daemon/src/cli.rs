//! CLI argument parsing for the catalog scheduler daemon.
//!
//! CLI flags override all other config sources.

use clap::{Args, Parser, Subcommand};

use catalog_scheduler::CronSpec;

/// Catalog Scheduler Daemon
///
/// Runs the catalog automation jobs (health check, catalog ad pipeline and
/// friends) on interval, cron and date triggers.
#[derive(Parser, Debug)]
#[command(name = "catalog-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/catalog-scheduler/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the scheduler daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Override the scheduler timezone
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Print the configured default jobs as JSON without running them
    Jobs,

    /// Print upcoming fire times for a cron descriptor
    NextFire(NextFireArgs),
}

/// Cron fields for `next-fire`. Omitted fields follow the usual defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct NextFireArgs {
    #[arg(long)]
    pub second: Option<String>,

    #[arg(long)]
    pub minute: Option<String>,

    #[arg(long)]
    pub hour: Option<String>,

    #[arg(long)]
    pub day: Option<String>,

    #[arg(long)]
    pub month: Option<String>,

    /// Day of week: 0-6 (Monday = 0) or mon..sun
    #[arg(long)]
    pub day_of_week: Option<String>,

    /// Number of fire times to print
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,

    /// Evaluate in this timezone instead of the configured one
    #[arg(long)]
    pub timezone: Option<String>,
}

impl NextFireArgs {
    pub fn cron_spec(&self) -> CronSpec {
        CronSpec {
            second: self.second.clone(),
            minute: self.minute.clone(),
            hour: self.hour.clone(),
            day: self.day.clone(),
            month: self.month.clone(),
            day_of_week: self.day_of_week.clone(),
        }
    }
}

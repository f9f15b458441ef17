//! Catalog Scheduler Daemon
//!
//! Runs the catalog automation jobs on interval, cron and date triggers.
//!
//! # Usage
//!
//! ```bash
//! catalog-daemon start [--foreground] [--timezone TZ]
//! catalog-daemon stop
//! catalog-daemon status
//! catalog-daemon jobs
//! catalog-daemon next-fire --hour 3 --minute 0 [-n 5]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/catalog-scheduler/config.toml)
//! 3. Environment variables (CATALOG_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use catalog_daemon::{
    show_jobs, show_next_fire, show_status, start_daemon, stop_daemon, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            foreground,
            timezone,
        } => {
            start_daemon(
                cli.config.as_deref(),
                foreground,
                timezone.as_deref(),
                cli.log_level.as_deref(),
            )
            .await?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status => {
            show_status()?;
        }
        Commands::Jobs => {
            show_jobs(cli.config.as_deref())?;
        }
        Commands::NextFire(args) => {
            show_next_fire(cli.config.as_deref(), &args)?;
        }
    }

    Ok(())
}

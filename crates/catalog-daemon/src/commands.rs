//! Command implementations for the catalog scheduler daemon.
//!
//! Handles:
//! - start: Load config, register default jobs, run the scheduler
//! - stop: Signal running daemon to stop (via PID file)
//! - status: Check if daemon is running
//! - jobs: Show the configured job table
//! - next-fire: Preview cron fire times

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::signal;
use tracing::{info, warn};

use catalog_scheduler::jobs::{register_default_jobs, DefaultJobBodies};
use catalog_scheduler::{CronSchedule, CronSpec, SchedulerError, SchedulerService};

use crate::cli::NextFireArgs;
use crate::settings::Settings;

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| {
            #[cfg(unix)]
            {
                dirs.runtime_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.cache_dir().to_path_buf())
            }
            #[cfg(not(unix))]
            {
                dirs.cache_dir().to_path_buf()
            }
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("catalog-scheduler")
        .join("daemon.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent).context("Failed to create PID directory")?;
    }
    fs::write(&pid_path, std::process::id().to_string()).context("Failed to write PID file")?;
    info!(path = ?pid_path, "Wrote PID file");
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!(error = %e, "Failed to remove PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Build a stopped scheduler with every enabled default job registered.
pub fn build_scheduler(settings: &Settings) -> Result<SchedulerService> {
    let scheduler = SchedulerService::new(settings.scheduler_config())
        .context("Failed to create scheduler")?;
    let bodies = DefaultJobBodies::builtin(settings.jobs.catalog_command.as_ref());
    register_default_jobs(&scheduler, &settings.jobs, &bodies)
        .context("Failed to register default jobs")?;
    Ok(scheduler)
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}

/// Start the scheduler daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Register the enabled default jobs
/// 3. Run the scheduler until SIGINT/SIGTERM
/// 4. Wait for running jobs, then exit
pub async fn start_daemon(
    config_path: Option<&str>,
    foreground: bool,
    timezone_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(timezone) = timezone_override {
        settings.timezone = timezone.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    settings.validate().context("Invalid configuration")?;

    init_logging(&settings.log_level)?;

    info!(app = %settings.app_name, "Scheduler daemon starting...");
    info!("  Timezone: {}", settings.timezone);
    info!("  Log level: {}", settings.log_level);
    info!("  Shutdown timeout: {}s", settings.shutdown_timeout_secs);

    if !foreground {
        warn!("Background mode not supported, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    let scheduler = build_scheduler(&settings)?;
    write_pid_file()?;

    scheduler.start().await;
    let signal_result = shutdown_signal().await;
    scheduler.stop(true).await;

    remove_pid_file();
    signal_result
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                anyhow::bail!("Failed to send SIGTERM to daemon");
            }
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not supported on this platform");
    }

    Ok(())
}

/// Show daemon status.
pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();

    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("Catalog scheduler is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
        }
        Some(pid) => {
            println!(
                "Catalog scheduler is NOT running (stale PID {} in {:?})",
                pid, pid_path
            );
        }
        None => {
            println!("Catalog scheduler is NOT running (no PID file)");
        }
    }
    Ok(())
}

/// Print the configured default jobs as JSON.
pub fn show_jobs(config_path: Option<&str>) -> Result<()> {
    let settings = Settings::load(config_path).context("Failed to load configuration")?;
    let scheduler = build_scheduler(&settings)?;
    let json = serde_json::to_string_pretty(&scheduler.get_jobs())
        .context("Failed to serialize job list")?;
    println!("{}", json);
    Ok(())
}

/// The next `count` fire times of `spec` after `after`.
pub fn next_fire_times(
    spec: &CronSpec,
    tz: Tz,
    after: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Tz>>, SchedulerError> {
    let schedule = CronSchedule::parse(spec)?;
    let mut times = Vec::with_capacity(count);
    let mut cursor = after;
    while times.len() < count {
        match schedule.next_after(cursor, tz) {
            Some(next) => {
                times.push(next.with_timezone(&tz));
                cursor = next;
            }
            None => break,
        }
    }
    Ok(times)
}

/// Print upcoming fire times for a cron descriptor.
pub fn show_next_fire(config_path: Option<&str>, args: &NextFireArgs) -> Result<()> {
    let timezone = match &args.timezone {
        Some(tz) => tz.clone(),
        None => {
            Settings::load(config_path)
                .context("Failed to load configuration")?
                .timezone
        }
    };
    let tz: Tz = timezone
        .parse()
        .map_err(|_| SchedulerError::InvalidTimezone(timezone.clone()))?;

    let spec = args.cron_spec();
    let schedule = CronSchedule::parse(&spec)?;
    println!("{} `{}` ({})", schedule, schedule.expression(), tz.name());
    for time in next_fire_times(&spec, tz, Utc::now(), args.count)? {
        println!("  {}", time.to_rfc3339());
    }
    Ok(())
}

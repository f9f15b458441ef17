//! Catalog scheduler daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, stop, status, jobs, next-fire)
//! - `settings`: Layered configuration loading

pub mod cli;
pub mod commands;
pub mod settings;

pub use cli::{Cli, Commands, NextFireArgs};
pub use commands::{
    build_scheduler, next_fire_times, show_jobs, show_next_fire, show_status, start_daemon,
    stop_daemon,
};
pub use settings::{default_config_path, ConfigError, Settings};

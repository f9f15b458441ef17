//! External command job body.
//!
//! Runs a program to completion and treats a non-zero exit, a spawn
//! failure or a timeout as a failed execution. Used to drive the catalog
//! ad-image pipeline, which lives outside this process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::runnable::{JobOutcome, Runnable};

/// Longest stderr excerpt carried in a failure message.
const STDERR_TAIL_CHARS: usize = 512;

/// Configuration for a command job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandJobConfig {
    /// Program to execute (looked up on PATH)
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory; inherits the daemon's when unset
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Kill the process after this many seconds (default: 3600)
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    3600
}

impl CommandJobConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout_secs: default_command_timeout(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Job body that runs an external command.
#[derive(Debug, Clone)]
pub struct CommandJob {
    config: CommandJobConfig,
}

impl CommandJob {
    pub fn new(config: CommandJobConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandJobConfig {
        &self.config
    }
}

#[async_trait]
impl Runnable for CommandJob {
    async fn run(&self) -> JobOutcome {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        debug!(program = %self.config.program, args = ?self.config.args, "Spawning command");

        let limit = Duration::from_secs(self.config.timeout_secs);
        let output = timeout(limit, cmd.output())
            .await
            .map_err(|_| {
                format!(
                    "{} timed out after {}s",
                    self.config.program, self.config.timeout_secs
                )
            })?
            .map_err(|e| format!("failed to run {}: {}", self.config.program, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(program = %self.config.program, stdout = %stdout.trim(), "Command output");
        }

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = tail_chars(stderr.trim(), STDERR_TAIL_CHARS);
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        if tail.is_empty() {
            Err(format!("{} exited with {}", self.config.program, code))
        } else {
            Err(format!("{} exited with {}: {}", self.config.program, code, tail))
        }
    }
}

fn tail_chars(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    let skip = count - max;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

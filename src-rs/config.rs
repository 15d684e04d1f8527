//! Runtime settings resolved once from CLI flags and environment.

use crate::command::CommandBuilder;
use crate::executor::PipelineExecutor;
use crate::process::{LaunchOptions, SystemLauncher};
use crate::runner::{ProcessRunner, DEFAULT_POLL_INTERVAL};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PDAL_BIN: &str = "pdal";

#[derive(Debug, Clone)]
pub struct Settings {
    pub pdal_bin: String,
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    pub launch: LaunchOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pdal_bin: DEFAULT_PDAL_BIN.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            launch: LaunchOptions::default(),
        }
    }
}

impl Settings {
    pub fn resolve(
        pdal_bin: Option<&str>,
        poll_ms: Option<u64>,
        timeout_secs: Option<u64>,
        use_shell: Option<bool>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            pdal_bin: resolve_pdal_executable(pdal_bin),
            poll_interval: poll_ms
                .map(|ms| Duration::from_millis(ms.max(10)))
                .unwrap_or(defaults.poll_interval),
            timeout: timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
            launch: LaunchOptions {
                use_shell: use_shell.unwrap_or(defaults.launch.use_shell),
            },
        }
    }

    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(
            Arc::new(SystemLauncher::new(self.launch)),
            self.poll_interval,
        )
    }

    pub fn builder(&self) -> CommandBuilder {
        CommandBuilder::new(self.pdal_bin.clone())
    }

    pub fn executor(&self) -> PipelineExecutor {
        PipelineExecutor::new(self.builder(), self.runner())
    }
}

fn resolve_pdal_executable(override_bin: Option<&str>) -> String {
    if let Some(bin) = override_bin {
        let trimmed = bin.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if !command_exists(DEFAULT_PDAL_BIN) {
        tracing::warn!("'{DEFAULT_PDAL_BIN}' not found on PATH; set PDAL_BIN or --pdal-bin");
    }
    DEFAULT_PDAL_BIN.to_string()
}

#[cfg(unix)]
fn command_exists(name: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {name} >/dev/null 2>&1"))
        .stdin(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn command_exists(name: &str) -> bool {
    Command::new("where")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

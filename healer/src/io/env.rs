//! Execution environment abstraction.
//!
//! The [`ExecutionEnv`] trait decouples the supervisor from where programs actually
//! run. [`DiskEnv`] deploys a [`FileSet`] into a directory and spawns `sh -c` against
//! it; tests use scripted environments that return canned results.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::files::FileSet;
use crate::core::types::AttemptResult;
use crate::io::files::write_dir;
use crate::io::process::{Input, RunningCommand, spawn_captured};

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Options for a single spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Close stdin so the program can never block on interactive input.
    pub suppress_input: bool,
    /// Wall-clock budget; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Bytes of stdout/stderr kept in memory per stream.
    pub output_limit_bytes: usize,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            suppress_input: true,
            timeout: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

/// A spawned program that can be waited on exactly once.
pub trait ProcessHandle {
    fn wait_and_collect(self: Box<Self>) -> Result<AttemptResult>;
}

/// Somewhere a FileSet can be placed and run.
pub trait ExecutionEnv {
    /// Replace the workspace contents with `files`. No incremental update.
    fn upload(&mut self, files: &FileSet) -> Result<()>;

    /// Start `command` against the uploaded files.
    fn spawn(&self, command: &str, options: &SpawnOptions) -> Result<Box<dyn ProcessHandle>>;

    /// Read a file produced in the workspace, `None` if absent.
    fn read_file(&self, rel_path: &str) -> Result<Option<String>>;

    /// Directory the program runs in.
    fn workdir(&self) -> &Path;
}

/// Writing a FileSet into the workspace failed. Not retried.
#[derive(Debug, thiserror::Error)]
#[error("deploy to {} failed: {reason}", .workdir.display())]
pub struct DeployError {
    pub workdir: PathBuf,
    pub reason: String,
}

/// The command could not be started. Not retried.
#[derive(Debug, thiserror::Error)]
#[error("spawn {command:?} failed: {reason}")]
pub struct SpawnError {
    pub command: String,
    pub reason: String,
}

/// Execution environment backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskEnv {
    workdir: PathBuf,
}

impl DiskEnv {
    /// Use `workdir` as the workspace, creating it if needed.
    pub fn new(workdir: impl Into<PathBuf>) -> Result<Self> {
        let workdir = workdir.into();
        fs::create_dir_all(&workdir)
            .with_context(|| format!("create workspace {}", workdir.display()))?;
        Ok(Self { workdir })
    }

    fn clear_workspace(&self) -> Result<()> {
        for entry in fs::read_dir(&self.workdir)
            .with_context(|| format!("read workspace {}", self.workdir.display()))?
        {
            let entry = entry.context("read workspace entry")?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("stat {}", path.display()))?;
            if file_type.is_dir() {
                fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
            } else {
                fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}

impl ExecutionEnv for DiskEnv {
    #[instrument(skip_all, fields(workdir = %self.workdir.display(), files = files.len()))]
    fn upload(&mut self, files: &FileSet) -> Result<()> {
        let deploy = || -> Result<()> {
            fs::create_dir_all(&self.workdir)
                .with_context(|| format!("create workspace {}", self.workdir.display()))?;
            self.clear_workspace()?;
            write_dir(&self.workdir, files)
        };
        deploy().map_err(|err| {
            DeployError {
                workdir: self.workdir.clone(),
                reason: format!("{err:#}"),
            }
            .into()
        })
    }

    #[instrument(skip_all, fields(command = %command, timeout_secs = options.timeout.map(|t| t.as_secs())))]
    fn spawn(&self, command: &str, options: &SpawnOptions) -> Result<Box<dyn ProcessHandle>> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.workdir);
        let input = if options.suppress_input {
            Input::Null
        } else {
            Input::Inherit
        };
        let running =
            spawn_captured(cmd, input, options.output_limit_bytes).map_err(|err| SpawnError {
                command: command.to_string(),
                reason: format!("{err:#}"),
            })?;
        debug!("process spawned");
        Ok(Box::new(DiskProcess {
            running,
            timeout: options.timeout,
        }))
    }

    fn read_file(&self, rel_path: &str) -> Result<Option<String>> {
        let path = self.workdir.join(rel_path);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }
}

/// Quote `input` for `sh` unless it is made only of safe characters.
pub fn shell_escape(input: &str) -> String {
    if !input.is_empty()
        && input
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':'))
    {
        return input.to_string();
    }
    let mut escaped = String::from("'");
    for ch in input.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

struct DiskProcess {
    running: RunningCommand,
    timeout: Option<Duration>,
}

impl ProcessHandle for DiskProcess {
    fn wait_and_collect(self: Box<Self>) -> Result<AttemptResult> {
        let DiskProcess { running, timeout } = *self;
        let output = running.wait(timeout)?;
        Ok(output.into_attempt_result())
    }
}

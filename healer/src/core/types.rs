//! Shared deterministic types for the self-heal core.
//!
//! These types define stable contracts between the supervisor, the classifier and
//! the execution environment. They carry no I/O handles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exit code reserved for programs that intentionally signal an alternate success.
pub const SUCCESS_EQUIVALENT_EXIT_CODE: i32 = 2;

/// How a spawned process finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum Exit {
    /// Process exited with a status code.
    Code(i32),
    /// Process was terminated by a signal outside the timeout path.
    Signaled,
    /// Process exceeded its wall-clock budget and was killed.
    TimedOut,
}

impl Exit {
    pub fn code(&self) -> Option<i32> {
        match self {
            Exit::Code(code) => Some(*code),
            Exit::Signaled | Exit::TimedOut => None,
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, Exit::TimedOut)
    }
}

/// Observable outcome of one execution. Read-only once captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    pub exit: Exit,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// Bytes of stdout discarded beyond the capture limit.
    pub stdout_truncated: usize,
    /// Bytes of stderr discarded beyond the capture limit.
    pub stderr_truncated: usize,
}

impl AttemptResult {
    /// Result with no truncation, mostly useful for fakes and tests.
    pub fn new(exit: Exit, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
            stdout_truncated: 0,
            stderr_truncated: 0,
        }
    }
}

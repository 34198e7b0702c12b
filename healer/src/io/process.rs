//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::{AttemptResult, Exit};

/// Where the child's stdin comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Closed stdin: reads see end-of-input immediately.
    Null,
    /// Share the parent's stdin.
    Inherit,
    /// Feed these bytes, then close.
    Bytes(Vec<u8>),
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit: Exit,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn into_attempt_result(self) -> AttemptResult {
        AttemptResult {
            exit: self.exit,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            duration: self.duration,
            stdout_truncated: self.stdout_truncated,
            stderr_truncated: self.stderr_truncated,
        }
    }
}

type OutputHandle = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

/// A child whose stdout/stderr are already being drained by reader threads.
#[derive(Debug)]
pub struct RunningCommand {
    child: Child,
    stdout_handle: OutputHandle,
    stderr_handle: OutputHandle,
    stdin_handle: Option<thread::JoinHandle<Result<()>>>,
    started: Instant,
}

/// Spawn `cmd` with piped output drained concurrently, so the child never blocks on a
/// full pipe. `output_limit_bytes` bounds the bytes kept per stream (the rest is
/// discarded while still draining the pipe).
///
/// On Unix the child leads its own process group, so a timeout can kill everything it
/// started.
#[instrument(skip_all, fields(output_limit_bytes))]
pub fn spawn_captured(
    mut cmd: Command,
    input: Input,
    output_limit_bytes: usize,
) -> Result<RunningCommand> {
    match &input {
        Input::Null => cmd.stdin(Stdio::null()),
        Input::Inherit => cmd.stdin(Stdio::inherit()),
        Input::Bytes(_) => cmd.stdin(Stdio::piped()),
    };
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let stdin_handle = match input {
        Input::Bytes(bytes) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(thread::spawn(move || {
                child_stdin.write_all(&bytes).context("write stdin")
            }))
        }
        Input::Null | Input::Inherit => None,
    };

    Ok(RunningCommand {
        child,
        stdout_handle,
        stderr_handle,
        stdin_handle,
        started,
    })
}

impl RunningCommand {
    /// Wait for the child, killing its process group if `timeout` elapses first.
    ///
    /// A timeout is reported as [`Exit::TimedOut`], not as an error. Once the child
    /// exits, anything it left running in its group is killed too.
    #[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs())))]
    pub fn wait(mut self, timeout: Option<Duration>) -> Result<CommandOutput> {
        let status = match timeout {
            Some(limit) => match self.child.wait_timeout(limit).context("wait for command")? {
                Some(status) => Some(status),
                None => {
                    warn!(timeout_secs = limit.as_secs(), "command timed out, killing");
                    kill_tree(&mut self.child)?;
                    self.child.wait().context("wait command after kill")?;
                    None
                }
            },
            None => Some(self.child.wait().context("wait for command")?),
        };
        let duration = self.started.elapsed();
        if status.is_some() {
            kill_leftovers(&self.child);
        }

        if let Some(handle) = self.stdin_handle
            && let Err(err) = join_stdin(handle)
        {
            // The child may exit without reading all of its input.
            debug!(err = %err, "stdin writer finished with error");
        }
        let (stdout, stdout_truncated) = join_output(self.stdout_handle).context("join stdout")?;
        let (stderr, stderr_truncated) = join_output(self.stderr_handle).context("join stderr")?;

        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "output truncated");
        }

        let exit = match status {
            Some(status) => exit_from_status(status),
            None => Exit::TimedOut,
        };
        debug!(exit = ?exit, duration_ms = duration.as_millis() as u64, "command finished");
        Ok(CommandOutput {
            exit,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            duration,
        })
    }
}

/// Run a command with an optional timeout and capture stdout/stderr without risking pipe
/// deadlocks.
pub fn run_command_with_timeout(
    cmd: Command,
    input: Input,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    spawn_captured(cmd, input, output_limit_bytes)?.wait(timeout)
}

fn exit_from_status(status: ExitStatus) -> Exit {
    match status.code() {
        Some(code) => Exit::Code(code),
        None => Exit::Signaled,
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => {
            warn!(err = %err, "killpg failed, killing child only");
            child.kill().context("kill command")
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

/// Kill processes still in the exited child's group. The group outlives its leader.
#[cfg(unix)]
fn kill_leftovers(child: &Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) => debug!("killed leftover processes in group"),
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(err = %err, "killpg of leftover processes failed"),
    }
}

#[cfg(not(unix))]
fn kill_leftovers(_child: &Child) {}

fn join_output(handle: OutputHandle) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn join_stdin(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("stdin writer thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let output = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            Input::Null,
            Some(Duration::from_secs(10)),
            1024,
        )
        .expect("run");
        assert_eq!(output.exit, Exit::Code(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&output.stderr), "err\n");
    }

    #[test]
    fn null_stdin_reads_end_of_input() {
        let output = run_command_with_timeout(
            sh("if read line; then echo got; else echo eof; fi"),
            Input::Null,
            Some(Duration::from_secs(10)),
            1024,
        )
        .expect("run");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "eof\n");
    }

    #[test]
    fn feeds_stdin_bytes() {
        let output = run_command_with_timeout(
            sh("cat"),
            Input::Bytes(b"hello".to_vec()),
            Some(Duration::from_secs(10)),
            1024,
        )
        .expect("run");
        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    fn timeout_kills_process_group_and_reports_timed_out() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 30 & sleep 30; echo never"),
            Input::Null,
            Some(Duration::from_millis(200)),
            1024,
        )
        .expect("run");
        assert_eq!(output.exit, Exit::TimedOut);
        assert!(output.stdout.is_empty());
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn output_is_truncated_at_limit() {
        let output = run_command_with_timeout(
            sh("printf 'abcdef'"),
            Input::Null,
            Some(Duration::from_secs(10)),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 2);
        assert_eq!(output.stderr_truncated, 0);
    }

    #[test]
    fn background_child_does_not_outlive_exit() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 30 & echo started"),
            Input::Null,
            Some(Duration::from_millis(300)),
            1024,
        )
        .expect("run");
        assert_eq!(output.exit, Exit::Code(0));
        assert_eq!(String::from_utf8_lossy(&output.stdout), "started\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn background_child_is_killed_without_timeout() {
        let started = Instant::now();
        let output =
            run_command_with_timeout(sh("sleep 30 & echo started"), Input::Null, None, 1024)
                .expect("run");
        assert_eq!(output.exit, Exit::Code(0));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command_with_timeout(
            Command::new("definitely-not-a-real-binary-xyz"),
            Input::Null,
            None,
            1024,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}

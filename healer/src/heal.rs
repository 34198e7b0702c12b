//! Self-heal supervisor: run, classify, repair, bounded by `max_attempts`.
//!
//! Phases:
//!
//! ```text
//! Run ──> Classify ──> Done(Succeeded | TimedOut | Exhausted)
//!  ^          │
//!  └─ Repair <┘   (failure with attempts remaining)
//! ```
//!
//! The attempt counter increments on every run, so at most `max_attempts` runs and
//! `max_attempts - 1` repairs happen. The FileSet produced by the last repair is run
//! once more and then returned, even when that run fails.

use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::files::FileSet;
use crate::core::outcome::{Outcome, stderr_reports_eof};
use crate::core::repair::{RepairInputs, RepairPromptBuilder, interactive_input_notice};
use crate::core::types::{AttemptResult, Exit};
use crate::io::attempt_log::{
    AttemptMeta, AttemptWriteRequest, clear_attempts, write_attempt, write_prompt,
};
use crate::io::config::HealConfig;
use crate::io::env::ExecutionEnv;
use crate::io::generator::Generator;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealStop {
    /// Last run classified as success (exit 0, or the reserved exit 2).
    Succeeded,
    /// Last run exceeded the attempt timeout. Never repaired.
    TimedOut,
    /// Every run failed and the attempt budget is spent.
    Exhausted,
}

/// What was observed for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt: u32,
    pub outcome: Outcome,
    pub exit: Exit,
    pub duration: Duration,
    /// stderr carried the end-of-input marker.
    pub eof_detected: bool,
}

/// Result of one heal cycle.
///
/// `files` is returned whatever `stop` says; callers that care about success must
/// look at `stop` or re-verify the files themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealOutcome {
    pub files: FileSet,
    pub attempts: Vec<AttemptRecord>,
    pub repairs: u32,
    pub stop: HealStop,
}

impl HealOutcome {
    pub fn succeeded(&self) -> bool {
        self.stop == HealStop::Succeeded
    }
}

struct HealState {
    files: FileSet,
    attempt: u32,
    attempts: Vec<AttemptRecord>,
    repairs: u32,
}

enum Phase {
    Run,
    Classify(AttemptResult),
    Repair {
        result: AttemptResult,
        outcome: Outcome,
        eof_detected: bool,
    },
    Done(HealStop),
}

/// Run `files` until they succeed, time out, or `config.max_attempts` runs are spent.
///
/// Deploy, spawn and generator errors are fatal and returned immediately, as is a
/// FileSet without the configured entrypoint. Runtime and test failures drive repairs.
#[instrument(skip_all, fields(max_attempts = config.max_attempts, entrypoint = %config.entrypoint))]
pub fn heal<G, E>(
    files: FileSet,
    task: &str,
    generator: &G,
    memory: &mut G::Memory,
    env: &mut E,
    config: &HealConfig,
) -> Result<HealOutcome>
where
    G: Generator,
    E: ExecutionEnv + ?Sized,
{
    config.validate()?;
    let classifier = config.classifier()?;
    let prompts = RepairPromptBuilder::new(config.prompt_output_budget_bytes);
    let command = config.entrypoint_command();
    let options = config.spawn_options();
    if let Some(state_dir) = &config.state_dir {
        clear_attempts(state_dir)?;
    }

    let mut state = HealState {
        files,
        attempt: 0,
        attempts: Vec::new(),
        repairs: 0,
    };
    let mut phase = Phase::Run;

    loop {
        phase = match phase {
            Phase::Run => {
                state.files.require(&config.entrypoint)?;
                env.upload(&state.files)?;
                state.attempt += 1;
                debug!(attempt = state.attempt, command = %command, "running entrypoint");
                let result = env.spawn(&command, &options)?.wait_and_collect()?;
                Phase::Classify(result)
            }
            Phase::Classify(result) => {
                let secondary_log = read_secondary_log(env, config)?;
                let outcome = classifier.classify(&result, secondary_log.as_deref());
                let eof_detected = stderr_reports_eof(&result.stderr, &config.eof_marker);
                state.attempts.push(AttemptRecord {
                    attempt: state.attempt,
                    outcome,
                    exit: result.exit,
                    duration: result.duration,
                    eof_detected,
                });
                debug!(attempt = state.attempt, outcome = ?outcome, exit = ?result.exit, "classified attempt");
                if let Some(record) = state.attempts.last() {
                    persist_attempt(config, &command, &state.files, record, &result)?;
                }

                match outcome {
                    Outcome::Success => Phase::Done(HealStop::Succeeded),
                    Outcome::Timeout => {
                        warn!(attempt = state.attempt, "attempt timed out, not repairing");
                        Phase::Done(HealStop::TimedOut)
                    }
                    Outcome::RuntimeFailure | Outcome::TestFailure => {
                        warn!(
                            attempt = state.attempt,
                            outcome = ?outcome,
                            exit = ?result.exit,
                            stdout = %result.stdout,
                            stderr = %result.stderr,
                            "attempt failed"
                        );
                        if state.attempt >= config.max_attempts {
                            Phase::Done(HealStop::Exhausted)
                        } else {
                            Phase::Repair {
                                result,
                                outcome,
                                eof_detected,
                            }
                        }
                    }
                }
            }
            Phase::Repair {
                result,
                outcome,
                eof_detected,
            } => {
                let notice;
                let stdout = if eof_detected {
                    notice = interactive_input_notice(&config.entrypoint);
                    notice.as_str()
                } else {
                    result.stdout.as_str()
                };
                let instruction = prompts
                    .build(&RepairInputs {
                        task,
                        outcome,
                        stdout,
                        stderr: &result.stderr,
                    })?
                    .ok_or_else(|| anyhow!("no repair prompt for outcome {outcome:?}"))?;
                if let Some(state_dir) = &config.state_dir {
                    write_prompt(state_dir, state.attempt, &instruction)?;
                }

                info!(attempt = state.attempt, outcome = ?outcome, "requesting repair");
                state.files = generator.repair(&instruction, &state.files, memory)?;
                state.repairs += 1;
                Phase::Run
            }
            Phase::Done(stop) => {
                info!(
                    stop = ?stop,
                    attempts = state.attempt,
                    repairs = state.repairs,
                    "heal finished"
                );
                return Ok(HealOutcome {
                    files: state.files,
                    attempts: state.attempts,
                    repairs: state.repairs,
                    stop,
                });
            }
        };
    }
}

/// Thin form of [`heal`] returning only the final FileSet.
pub fn heal_files<G, E>(
    files: FileSet,
    task: &str,
    generator: &G,
    memory: &mut G::Memory,
    env: &mut E,
    config: &HealConfig,
) -> Result<FileSet>
where
    G: Generator,
    E: ExecutionEnv + ?Sized,
{
    Ok(heal(files, task, generator, memory, env, config)?.files)
}

fn read_secondary_log<E: ExecutionEnv + ?Sized>(
    env: &E,
    config: &HealConfig,
) -> Result<Option<String>> {
    match &config.test_log_path {
        Some(path) if config.inspect_test_output => env.read_file(path),
        _ => Ok(None),
    }
}

fn persist_attempt(
    config: &HealConfig,
    command: &str,
    files: &FileSet,
    record: &AttemptRecord,
    result: &AttemptResult,
) -> Result<()> {
    let Some(state_dir) = &config.state_dir else {
        return Ok(());
    };
    let meta = AttemptMeta {
        attempt: record.attempt,
        command: command.to_string(),
        outcome: record.outcome,
        exit: record.exit,
        duration_ms: record.duration.as_millis() as u64,
        eof_detected: record.eof_detected,
        stdout_truncated: result.stdout_truncated,
        stderr_truncated: result.stderr_truncated,
        files: files.paths().map(str::to_string).collect(),
    };
    write_attempt(&AttemptWriteRequest {
        state_dir,
        meta: &meta,
        result,
        prompt: None,
    })?;
    Ok(())
}

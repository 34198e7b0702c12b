//! Generation/repair boundary.
//!
//! The [`Generator`] trait is the only way the supervisor obtains new code. It is
//! opaque: the supervisor hands over a prompt, the current [`FileSet`] and an opaque
//! memory value, and receives a FileSet back. [`CommandGenerator`] talks to an
//! external backend over stdin/stdout JSON; tests use scripted generators.

use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::files::FileSet;
use crate::core::types::Exit;
use crate::io::config::GeneratorConfig;
use crate::io::env::DEFAULT_OUTPUT_LIMIT_BYTES;
use crate::io::memory::{ConversationMemory, MemoryEntry, Preprompts, Role};
use crate::io::process::{Input, run_command_with_timeout};

const OUTPUT_SCHEMA: &str = include_str!("../../schemas/generator_output.schema.json");

static OUTPUT_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(OUTPUT_SCHEMA).map_err(|err| format!("parse output schema: {err}"))?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| format!("invalid output schema: {err}"))
});

/// Produces and revises code.
pub trait Generator {
    /// Context threaded through calls. The supervisor never inspects it.
    type Memory;

    /// Produce a fresh FileSet from a natural-language prompt.
    fn generate(&self, prompt: &str, memory: &mut Self::Memory) -> Result<FileSet>;

    /// Produce a revised FileSet from an instruction and the current snapshot.
    fn repair(
        &self,
        instruction: &str,
        current: &FileSet,
        memory: &mut Self::Memory,
    ) -> Result<FileSet>;
}

/// The backend failed or answered with something unusable. Not retried.
#[derive(Debug, thiserror::Error)]
#[error("generator {command} failed: {reason}")]
pub struct GeneratorError {
    pub command: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerateMode {
    Generate,
    Repair,
}

/// JSON document written to the backend's stdin.
#[derive(Debug, Serialize)]
pub struct GeneratorRequest<'a> {
    pub mode: GenerateMode,
    pub prompt: &'a str,
    pub files: &'a FileSet,
    pub preprompts: &'a Preprompts,
    pub history: &'a [MemoryEntry],
}

#[derive(Debug, Deserialize)]
struct GeneratorResponse {
    files: FileSet,
    #[serde(default)]
    notes: Option<String>,
}

/// Generator backed by an external command speaking JSON on stdin/stdout.
///
/// In repair mode the response is merged onto the current FileSet, so backends may
/// return only the files they changed.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    preprompts: Preprompts,
    workdir: Option<PathBuf>,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>) -> Result<Self> {
        match command.first() {
            Some(program) if !program.trim().is_empty() => {}
            _ => bail!("generator command must start with a program"),
        }
        Ok(Self {
            command,
            timeout: Duration::from_secs(GeneratorConfig::default().timeout_secs),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            preprompts: Preprompts::default(),
            workdir: None,
        })
    }

    /// Build from the `[generator]` config table, loading preprompts if configured.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let preprompts = match &config.preprompts_dir {
            Some(dir) => Preprompts::load(dir)?,
            None => Preprompts::default(),
        };
        Ok(Self::new(config.command.clone())?
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_preprompts(preprompts))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_preprompts(mut self, preprompts: Preprompts) -> Self {
        self.preprompts = preprompts;
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    fn display_command(&self) -> String {
        self.command.join(" ")
    }

    fn error(&self, reason: impl Into<String>) -> anyhow::Error {
        GeneratorError {
            command: self.display_command(),
            reason: reason.into(),
        }
        .into()
    }

    #[instrument(skip_all, fields(mode = ?mode, timeout_secs = self.timeout.as_secs()))]
    fn call(
        &self,
        mode: GenerateMode,
        prompt: &str,
        files: &FileSet,
        memory: &mut ConversationMemory,
    ) -> Result<FileSet> {
        let request = GeneratorRequest {
            mode,
            prompt,
            files,
            preprompts: &self.preprompts,
            history: memory.entries(),
        };
        let payload = serde_json::to_vec(&request).context("serialize generator request")?;

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        if let Some(workdir) = &self.workdir {
            cmd.current_dir(workdir);
        }
        info!(command = %self.display_command(), "calling generator");
        let output = run_command_with_timeout(
            cmd,
            Input::Bytes(payload),
            Some(self.timeout),
            self.output_limit_bytes,
        )
        .map_err(|err| self.error(format!("{err:#}")))?;

        match output.exit {
            Exit::Code(0) => {}
            Exit::TimedOut => {
                warn!(timeout_secs = self.timeout.as_secs(), "generator timed out");
                return Err(self.error(format!("timed out after {:?}", self.timeout)));
            }
            other => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(exit = ?other, stderr = %stderr, "generator exited unsuccessfully");
                return Err(self.error(format!("exited with {other:?}: {}", stderr.trim())));
            }
        }
        if output.stdout_truncated > 0 {
            return Err(self.error(format!(
                "response exceeded {} bytes",
                self.output_limit_bytes
            )));
        }

        let value: Value = serde_json::from_slice(&output.stdout)
            .map_err(|err| self.error(format!("response is not json: {err}")))?;
        validate_response(&value).map_err(|err| self.error(format!("{err:#}")))?;
        let response: GeneratorResponse = serde_json::from_value(value)
            .map_err(|err| self.error(format!("invalid response: {err}")))?;
        if let Some(notes) = &response.notes {
            debug!(notes = %notes, "generator notes");
        }

        memory.push(Role::User, prompt)?;
        memory.push(
            Role::Assistant,
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        )?;
        debug!(files = response.files.len(), "generator returned files");
        Ok(response.files)
    }
}

impl Generator for CommandGenerator {
    type Memory = ConversationMemory;

    fn generate(&self, prompt: &str, memory: &mut ConversationMemory) -> Result<FileSet> {
        self.call(GenerateMode::Generate, prompt, &FileSet::new(), memory)
    }

    fn repair(
        &self,
        instruction: &str,
        current: &FileSet,
        memory: &mut ConversationMemory,
    ) -> Result<FileSet> {
        let changed = self.call(GenerateMode::Repair, instruction, current, memory)?;
        Ok(current.merged(&changed))
    }
}

/// Validate a backend response against the bundled JSON Schema (Draft 2020-12).
pub fn validate_response(instance: &Value) -> Result<()> {
    let compiled = OUTPUT_VALIDATOR.as_ref().map_err(|err| anyhow!("{err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("response schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

//! Healer configuration stored in `healer.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::outcome::{
    Classifier, ClassifyMode, DEFAULT_EOF_MARKER, DEFAULT_TEST_BANNER, DEFAULT_TEST_FAILURE_PATTERN,
};
use crate::core::repair::DEFAULT_PROMPT_OUTPUT_BUDGET;
use crate::io::env::{DEFAULT_OUTPUT_LIMIT_BYTES, SpawnOptions, shell_escape};

pub const CONFIG_FILE_NAME: &str = "healer.toml";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_ENTRYPOINT: &str = "run.sh";

/// Self-heal configuration (TOML).
///
/// Missing fields default to the values the supervisor was tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealConfig {
    /// Upper bound on run cycles per heal. Repairs happen between runs only.
    pub max_attempts: u32,

    /// Relative path of the program entrypoint inside the FileSet.
    pub entrypoint: String,

    /// Interpreter used to run the entrypoint (`<shell> <entrypoint>`).
    pub shell: String,

    /// Wall-clock budget for one run of the entrypoint, in seconds.
    pub attempt_timeout_secs: u64,

    /// Bytes of stdout/stderr captured per run.
    pub output_limit_bytes: usize,

    /// Bytes of each output stream embedded in a repair prompt.
    pub prompt_output_budget_bytes: usize,

    /// Downgrade zero exits that report failing sub-tests.
    pub inspect_test_output: bool,

    /// Optional workspace file consulted alongside stdout for test failures.
    pub test_log_path: Option<String>,

    /// Substring in stderr that means the program hit end-of-input on stdin.
    pub eof_marker: String,

    /// Regex marking the start of a test-framework report.
    pub test_banner: String,

    /// Regex for failure markers after the banner.
    pub test_failure_pattern: String,

    /// Persist per-attempt logs under `<state_dir>/attempts/`.
    pub state_dir: Option<PathBuf>,

    pub generator: GeneratorConfig,
}

/// External generation backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command spawned for every generate/repair call (e.g. `["gen-backend", "--json"]`).
    pub command: Vec<String>,

    /// Wall-clock budget for one generator call, in seconds.
    pub timeout_secs: u64,

    /// Directory of preprompt text files sent with every request.
    pub preprompts_dir: Option<PathBuf>,

    /// Directory where the conversation log is appended.
    pub memory_dir: Option<PathBuf>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10 * 60,
            preprompts_dir: None,
            memory_dir: None,
        }
    }
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            entrypoint: DEFAULT_ENTRYPOINT.to_string(),
            shell: "bash".to_string(),
            attempt_timeout_secs: 10 * 60,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            prompt_output_budget_bytes: DEFAULT_PROMPT_OUTPUT_BUDGET,
            inspect_test_output: false,
            test_log_path: None,
            eof_marker: DEFAULT_EOF_MARKER.to_string(),
            test_banner: DEFAULT_TEST_BANNER.to_string(),
            test_failure_pattern: DEFAULT_TEST_FAILURE_PATTERN.to_string(),
            state_dir: None,
            generator: GeneratorConfig::default(),
        }
    }
}

impl HealConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.entrypoint.trim().is_empty() {
            return Err(anyhow!("entrypoint must be non-empty"));
        }
        if self.shell.trim().is_empty() {
            return Err(anyhow!("shell must be non-empty"));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(anyhow!("attempt_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_output_budget_bytes == 0 {
            return Err(anyhow!("prompt_output_budget_bytes must be > 0"));
        }
        self.classifier()?;
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if let Some(program) = self.generator.command.first()
            && program.trim().is_empty()
        {
            return Err(anyhow!("generator.command must start with a program"));
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Command that runs the entrypoint: `<shell> <entrypoint>`.
    pub fn entrypoint_command(&self) -> String {
        format!("{} {}", self.shell, shell_escape(&self.entrypoint))
    }

    /// Spawn options for one attempt. Input is always suppressed.
    pub fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            suppress_input: true,
            timeout: Some(self.attempt_timeout()),
            output_limit_bytes: self.output_limit_bytes,
        }
    }

    pub fn classify_mode(&self) -> ClassifyMode {
        if self.inspect_test_output {
            ClassifyMode::InspectTests
        } else {
            ClassifyMode::Basic
        }
    }

    /// Classifier configured with this file's mode and test markers.
    pub fn classifier(&self) -> Result<Classifier> {
        Classifier::new(
            self.classify_mode(),
            &self.test_banner,
            &self.test_failure_pattern,
        )
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HealConfig::default()`.
pub fn load_config(path: &Path) -> Result<HealConfig> {
    if !path.exists() {
        let cfg = HealConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HealConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HealConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

//! Benchmark file parsing and validation.
//!
//! Benchmarks are TOML files: a `[benchmark]` header, optional `[config]`
//! overrides, and `[[tasks]]`. See `bench/benchmarks/` for examples.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use healer::core::files::FileSet;
use healer::io::files::load_dir;

use crate::assertion::Check;

/// A parsed benchmark file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BenchmarkFile {
    pub benchmark: BenchmarkMeta,
    #[serde(default)]
    pub config: BenchmarkConfig,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BenchmarkMeta {
    /// Unique name, also the results directory name (`[a-z0-9_-]+`).
    pub name: String,
    /// Budget for each task command run and each `command_succeeds` check.
    pub timeout_secs: Option<u64>,
}

/// Heal config overrides for every task in the benchmark.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BenchmarkConfig {
    pub max_attempts: Option<u32>,
    /// Defaults to enabled for benchmarks.
    pub inspect_test_output: Option<bool>,
}

/// One prompt given to the agent, the command that exercises the result, and
/// the assertions checked against each run.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub prompt: String,
    pub command: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub initial_code: FileSet,
    /// Directory (relative to the benchmark file) merged under `initial_code`.
    pub initial_code_dir: Option<PathBuf>,
    /// One table of named checks per input.
    #[serde(default)]
    pub assertions: Vec<BTreeMap<String, Check>>,
}

/// A task declares inputs and assertions whose counts differ.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task} declares {inputs} input(s) but {assertions} assertion table(s)")]
pub struct InputAssertionMismatch {
    pub task: String,
    pub inputs: usize,
    pub assertions: usize,
}

/// A benchmark together with where it was loaded from.
#[derive(Debug, Clone)]
pub struct Benchmark {
    pub path: PathBuf,
    pub file: BenchmarkFile,
}

impl Benchmark {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read benchmark {}", path.display()))?;
        let file = BenchmarkFile::parse_str(&contents)
            .with_context(|| format!("load benchmark {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn name(&self) -> &str {
        &self.file.benchmark.name
    }

    pub fn tasks(&self) -> &[Task] {
        &self.file.tasks
    }

    /// Budget for each command run; `None` waits indefinitely.
    pub fn timeout(&self) -> Option<Duration> {
        self.file.benchmark.timeout_secs.map(Duration::from_secs)
    }

    /// Directory relative paths in the benchmark resolve against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// Starting FileSet for `task`: the directory contents overlaid by inline files.
    pub fn initial_files(&self, task: &Task) -> Result<FileSet> {
        let mut files = match &task.initial_code_dir {
            Some(dir) => {
                let dir = self.base_dir().join(dir);
                load_dir(&dir)
                    .with_context(|| format!("load initial code for task {}", task.name))?
            }
            None => FileSet::new(),
        };
        for (path, content) in task.initial_code.iter() {
            files.insert(path.as_str(), content.as_str())?;
        }
        Ok(files)
    }
}

impl BenchmarkFile {
    pub fn parse_str(contents: &str) -> Result<Self> {
        let file: BenchmarkFile = toml::from_str(contents).context("parse benchmark")?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.benchmark.name)?;
        if self.benchmark.timeout_secs == Some(0) {
            bail!("benchmark.timeout_secs must be > 0");
        }
        if self.config.max_attempts == Some(0) {
            bail!("config.max_attempts must be > 0");
        }
        if self.tasks.is_empty() {
            bail!("tasks must be a non-empty array");
        }
        let mut seen = BTreeSet::new();
        for (index, task) in self.tasks.iter().enumerate() {
            task.validate()
                .with_context(|| format!("tasks[{}] invalid", index))?;
            if !seen.insert(task.name.as_str()) {
                bail!("duplicate task name {}", task.name);
            }
        }
        Ok(())
    }
}

impl Task {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("task.name must be non-empty");
        }
        if self.prompt.trim().is_empty() {
            bail!("task {}: prompt must be non-empty", self.name);
        }
        if let Some(command) = &self.command
            && command.trim().is_empty()
        {
            bail!("task {}: command must be non-empty when set", self.name);
        }
        if !self.inputs.is_empty()
            && !self.assertions.is_empty()
            && self.inputs.len() != self.assertions.len()
        {
            return Err(InputAssertionMismatch {
                task: self.name.clone(),
                inputs: self.inputs.len(),
                assertions: self.assertions.len(),
            }
            .into());
        }
        for (index, table) in self.assertions.iter().enumerate() {
            for (name, check) in table {
                check.validate().with_context(|| {
                    format!("task {}: assertions[{}].{} invalid", self.name, index, name)
                })?;
            }
        }
        Ok(())
    }

    /// Inputs to run the command with; a single empty input when none are declared.
    pub fn effective_inputs(&self) -> Vec<String> {
        if self.inputs.is_empty() {
            vec![String::new()]
        } else {
            self.inputs.clone()
        }
    }
}

/// Discover and load all benchmark files in a directory, sorted by name.
pub fn discover(dir: &Path) -> Result<Vec<Benchmark>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut benchmarks = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("read benchmarks dir {}", dir.display()))?
    {
        let entry = entry.context("read benchmark entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        benchmarks.push(Benchmark::load(&path)?);
    }
    benchmarks.sort_by(|left, right| left.name().cmp(right.name()));
    for pair in benchmarks.windows(2) {
        if pair[0].name() == pair[1].name() {
            return Err(anyhow!("duplicate benchmark.name {}", pair[0].name()));
        }
    }
    Ok(benchmarks)
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("benchmark.name must be non-empty");
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("benchmark.name must use [a-z0-9_-] only");
    }
    Ok(())
}

//! Result persistence.
//!
//! Each benchmark run is stored under `<base>/<benchmark>/<run-id>/` as
//! `results.json` (task results) and `meta.json` (timing, totals, file hash).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::report::summarize;
use crate::run::TaskResult;

/// Input for persisting one completed run.
#[derive(Debug)]
pub struct RunRecord<'a> {
    pub benchmark_name: &'a str,
    pub benchmark_path: &'a Path,
    pub run_id: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: &'a [TaskResult],
}

/// Metadata for a benchmark run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunMeta {
    pub benchmark: String,
    pub run_id: String,
    /// SHA-256 of the benchmark file, to tell edited benchmarks apart.
    pub benchmark_hash: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub tasks: usize,
    pub correct: usize,
    pub total: usize,
    /// Non-fatal errors encountered during capture.
    pub errors: Vec<String>,
}

#[instrument(skip_all, fields(benchmark = %record.benchmark_name, run_id = %record.run_id))]
pub fn write_run(base_dir: &Path, record: &RunRecord<'_>) -> Result<PathBuf> {
    let dir = run_dir(base_dir, record.benchmark_name, record.run_id);
    fs::create_dir_all(&dir).with_context(|| format!("create results dir {}", dir.display()))?;

    let mut errors = Vec::new();
    let benchmark_hash = match file_sha256(record.benchmark_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("benchmark hash: {err:#}"));
            String::new()
        }
    };
    if !errors.is_empty() {
        warn!(errors = ?errors, "result capture had errors");
    }

    write_json(&dir.join("results.json"), record.results)?;

    let totals = summarize(record.results);
    let duration = record.finished_at - record.started_at;
    let meta = RunMeta {
        benchmark: record.benchmark_name.to_string(),
        run_id: record.run_id.to_string(),
        benchmark_hash,
        start_time: record.started_at.to_rfc3339(),
        end_time: record.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        tasks: record.results.len(),
        correct: totals.correct,
        total: totals.total,
        errors,
    };
    write_json(&dir.join("meta.json"), &meta)?;
    debug!(results_dir = %dir.display(), "results written");
    Ok(dir)
}

pub fn read_results(run_dir: &Path) -> Result<Vec<TaskResult>> {
    let path = run_dir.join("results.json");
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

pub fn run_dir(base_dir: &Path, benchmark: &str, run_id: &str) -> PathBuf {
    base_dir.join(benchmark).join(run_id)
}

/// `bench-<timestamp>-<short id>`; sorts chronologically.
pub fn generate_run_id() -> String {
    let mut rng = rand::thread_rng();
    let short_id = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("bench-{}-{short_id}", Utc::now().format("%Y%m%d_%H%M%S"))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    fs::write(path, format!("{contents}\n")).with_context(|| format!("write {}", path.display()))
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::results::{RunMeta, read_results};
use crate::run::TaskResult;

/// Totals over a set of task results.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub total_time: Duration,
    pub correct: usize,
    pub total: usize,
}

pub fn summarize(results: &[TaskResult]) -> Summary {
    let mut summary = Summary::default();
    for result in results {
        summary.total_time += result.duration;
        for table in &result.assertion_results {
            summary.total += table.len();
            summary.correct += table.values().filter(|passed| **passed).count();
        }
    }
    summary
}

pub fn format_results(results: &[TaskResult]) -> String {
    let mut out = String::new();
    for result in results {
        let _ = writeln!(out, "\n--- Results for {} ---", result.task_name);
        let _ = writeln!(
            out,
            "{} ({:.2}s)",
            result.task_name,
            result.duration.as_secs_f64()
        );
        for table in &result.assertion_results {
            for (name, passed) in table {
                let mark = if *passed { "✅" } else { "❌" };
                let _ = writeln!(out, "  {mark} {name}");
            }
        }
        out.push('\n');
    }
    let summary = summarize(results);
    let _ = writeln!(out, "Total time: {:.2}s", summary.total_time.as_secs_f64());
    let _ = writeln!(
        out,
        "Total correct assertions: {}/{}",
        summary.correct, summary.total
    );
    out
}

pub fn print_results(results: &[TaskResult]) {
    println!("{}", format_results(results));
}

/// Aggregate over every recorded run of one benchmark.
#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub avg_duration_secs: Option<f64>,
    pub correct: usize,
    pub total: usize,
    /// `task/assertion` -> (passed, evaluated).
    pub assertion_pass_rates: BTreeMap<String, (usize, usize)>,
}

pub fn load_run_dirs(benchmark_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !benchmark_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(benchmark_results_dir)
        .with_context(|| format!("read {}", benchmark_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(benchmark_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();

    for run_dir in load_run_dirs(benchmark_results_dir)? {
        let meta_path = run_dir.join("meta.json");
        let meta: RunMeta = match fs::read_to_string(&meta_path)
            .with_context(|| format!("read {}", meta_path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse meta"))
        {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err})",
                    run_dir.display()
                ));
                continue;
            }
        };
        let results = match read_results(&run_dir) {
            Ok(results) => results,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: results.json invalid ({err:#})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        summary.avg_duration_secs = Some(match summary.avg_duration_secs {
            None => meta.duration_secs,
            Some(avg) => {
                let total = avg * (summary.runs as f64 - 1.0) + meta.duration_secs;
                total / summary.runs as f64
            }
        });
        let totals = summarize(&results);
        summary.correct += totals.correct;
        summary.total += totals.total;
        update_pass_rates(&mut summary.assertion_pass_rates, &results);
    }

    Ok((summary, warnings))
}

fn update_pass_rates(stats: &mut BTreeMap<String, (usize, usize)>, results: &[TaskResult]) {
    for result in results {
        for table in &result.assertion_results {
            for (name, passed) in table {
                let entry = stats
                    .entry(format!("{}/{}", result.task_name, name))
                    .or_insert((0, 0));
                if *passed {
                    entry.0 += 1;
                }
                entry.1 += 1;
            }
        }
    }
}

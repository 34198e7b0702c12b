//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info};

use healer::agent::HealingAgent;
use healer::exit_codes;
use healer::io::config::{HealConfig, load_config};
use healer::io::env::DiskEnv;
use healer::io::generator::CommandGenerator;
use healer::io::memory::ConversationMemory;

use crate::benchmark::{Benchmark, discover};
use crate::config::apply_benchmark_config;
use crate::report::{aggregate, print_results, summarize};
use crate::results::{RunRecord, generate_run_id, run_dir, write_run};
use crate::run::run;

/// Options for `bench run`.
#[derive(Debug)]
pub struct RunArgs<'a> {
    pub benchmark_path: &'a Path,
    pub task: Option<&'a str>,
    pub verbose: bool,
    pub max_attempts: Option<u32>,
    pub generator_cmd: &'a [String],
    pub config: Option<&'a Path>,
    pub results_dir: &'a Path,
}

/// List all benchmarks in a directory.
pub fn list_benchmarks(dir: &Path) -> Result<i32> {
    for benchmark in discover(dir)? {
        println!(
            "{} ({} task(s)) {}",
            benchmark.name(),
            benchmark.tasks().len(),
            benchmark.path.display()
        );
    }
    Ok(exit_codes::OK)
}

/// Run a benchmark file, print and persist the results.
///
/// Exits `FAILED` when any assertion did not hold.
pub fn run_benchmark(args: &RunArgs<'_>) -> Result<i32> {
    let benchmark = Benchmark::load(args.benchmark_path)?;
    let cfg = heal_config(&benchmark, args)?;
    debug!(benchmark = benchmark.name(), max_attempts = cfg.max_attempts, "benchmark loaded");

    let run_id = generate_run_id();
    let dir = run_dir(args.results_dir, benchmark.name(), &run_id);
    let generator = CommandGenerator::from_config(&cfg.generator)?;
    let memory = ConversationMemory::open(&dir.join("memory"))?;
    let heal_env = DiskEnv::new(dir.join("heal"))?;
    let mut task_env = DiskEnv::new(dir.join("workspace"))?;
    let mut agent = HealingAgent::new(generator, memory, heal_env, cfg);

    info!(run_id = %run_id, "benchmark run started");
    let started_at = Utc::now();
    let results = run(
        &mut agent,
        &mut task_env,
        &benchmark,
        args.task,
        args.verbose,
    )?;
    let finished_at = Utc::now();

    print_results(&results);
    let written = write_run(
        args.results_dir,
        &RunRecord {
            benchmark_name: benchmark.name(),
            benchmark_path: &benchmark.path,
            run_id: &run_id,
            started_at,
            finished_at,
            results: &results,
        },
    )
    .context("write results")?;
    println!("results: {}", written.display());

    let summary = summarize(&results);
    if summary.correct == summary.total {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::FAILED)
    }
}

/// Show aggregated results for a benchmark.
pub fn report_benchmark(results_dir: &Path, benchmark: &str) -> Result<i32> {
    let (summary, warnings) = aggregate(&results_dir.join(benchmark))?;
    println!("report: benchmark={} runs={}", benchmark, summary.runs);
    println!("report: correct={}/{}", summary.correct, summary.total);
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={:.2}", avg);
    }
    for (label, (passed, total)) in summary.assertion_pass_rates {
        println!("report: assertion {} {}/{}", label, passed, total);
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(exit_codes::OK)
}

/// Base config (file or defaults), then benchmark overrides, then CLI flags.
fn heal_config(benchmark: &Benchmark, args: &RunArgs<'_>) -> Result<HealConfig> {
    let base = match args.config {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            load_config(path)?
        }
        None => HealConfig::default(),
    };
    let mut cfg = apply_benchmark_config(base, &benchmark.file.config)?;
    if let Some(max_attempts) = args.max_attempts {
        cfg.max_attempts = max_attempts;
    }
    if !args.generator_cmd.is_empty() {
        cfg.generator.command = args.generator_cmd.to_vec();
    }
    if cfg.generator.command.is_empty() {
        bail!("no generator configured (pass --generator-cmd or set [generator] command)");
    }
    cfg.generator.preprompts_dir = cfg
        .generator
        .preprompts_dir
        .take()
        .map(|dir| resolve(args.config, dir));
    cfg.state_dir = None;
    cfg.validate()?;
    Ok(cfg)
}

/// Relative paths in a config file resolve against the file's directory.
fn resolve(config: Option<&Path>, dir: PathBuf) -> PathBuf {
    match config.and_then(Path::parent) {
        Some(parent) => parent.join(dir),
        None => dir,
    }
}

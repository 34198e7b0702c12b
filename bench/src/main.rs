//! Benchmark runner for the self-healing agent.

mod assertion;
mod benchmark;
mod cli;
mod config;
mod report;
mod results;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use healer::{exit_codes, logging};

#[derive(Parser)]
#[command(name = "bench", version, about = "Benchmark harness for the healing agent")]
struct Cli {
    /// Where run results are stored.
    #[arg(long, global = true, default_value = "results")]
    results_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List benchmark files in a directory.
    List {
        #[arg(default_value = "bench/benchmarks")]
        dir: PathBuf,
    },
    /// Run a benchmark file through the agent.
    Run {
        benchmark: PathBuf,
        /// Run only this task.
        #[arg(long)]
        task: Option<String>,
        /// Print cumulative results after every task.
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Generator command and arguments; overrides the config file.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        generator_cmd: Vec<String>,
        /// Base heal config (`healer.toml` format).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show aggregated results of every recorded run of a benchmark.
    Report { benchmark: String },
}

fn main() {
    logging::init();
    match dispatch() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn dispatch() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::List { dir } => cli::list_benchmarks(&dir),
        Command::Run {
            benchmark,
            task,
            verbose,
            max_attempts,
            generator_cmd,
            config,
        } => cli::run_benchmark(&cli::RunArgs {
            benchmark_path: &benchmark,
            task: task.as_deref(),
            verbose,
            max_attempts,
            generator_cmd: &generator_cmd,
            config: config.as_deref(),
            results_dir: &cli.results_dir,
        }),
        Command::Report { benchmark } => cli::report_benchmark(&cli.results_dir, &benchmark),
    }
}

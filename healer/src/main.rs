//! Self-healing execution loop for generated programs.
//!
//! Works on a project directory: the code being healed, an optional `prompt` file,
//! an optional `healer.toml`, and the `.healer/` state directory (workspace,
//! conversation memory, attempt logs).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use healer::agent::{Agent, HealingAgent};
use healer::exit_codes;
use healer::heal::{HealOutcome, HealStop, heal};
use healer::io::config::{HealConfig, load_config, write_config};
use healer::io::env::DiskEnv;
use healer::io::files::write_dir;
use healer::io::generator::CommandGenerator;
use healer::io::memory::ConversationMemory;
use healer::io::project::ProjectPaths;
use healer::logging;

#[derive(Parser)]
#[command(
    name = "healer",
    version,
    about = "Run generated programs and repair them until they work"
)]
struct Cli {
    /// Config file (defaults to `<project>/healer.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a codebase from the prompt, add an entrypoint, and heal it.
    Init {
        project: PathBuf,
        /// Prompt text (defaults to the project's `prompt` file).
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Apply the prompt to the existing codebase, refresh the entrypoint, and heal it.
    Improve {
        project: PathBuf,
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Run the existing codebase through the self-heal loop only.
    Heal {
        project: PathBuf,
        #[arg(long)]
        prompt: Option<String>,
        /// Override `max_attempts`.
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Print the effective config, or write it to `healer.toml`.
    Config {
        project: PathBuf,
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    match cli.command {
        Command::Init { project, prompt } => cmd_agent(&project, config, prompt.as_deref(), true),
        Command::Improve { project, prompt } => {
            cmd_agent(&project, config, prompt.as_deref(), false)
        }
        Command::Heal {
            project,
            prompt,
            max_attempts,
        } => cmd_heal(&project, config, prompt.as_deref(), max_attempts),
        Command::Config { project, write } => cmd_config(&project, config, write),
    }
}

fn cmd_agent(
    project: &Path,
    config_path: Option<&Path>,
    prompt: Option<&str>,
    from_scratch: bool,
) -> Result<i32> {
    let paths = ProjectPaths::new(project);
    let cfg = paths.load_config(config_path)?;
    let prompt = paths.read_prompt(prompt)?;
    let generator = command_generator(&cfg)?;
    let memory = open_memory(&cfg)?;
    let env = DiskEnv::new(&paths.workspace_dir)?;

    let mut agent = HealingAgent::new(generator, memory, env, cfg);
    let files = if from_scratch {
        agent.init(&prompt)?
    } else {
        let current = paths.load_files()?;
        agent.improve(&current, &prompt)?
    };
    write_dir(&paths.root, &files)
        .with_context(|| format!("write healed files to {}", paths.root.display()))?;
    match agent.last_heal() {
        Some(outcome) => Ok(report(outcome)),
        None => bail!("agent finished without healing"),
    }
}

fn cmd_heal(
    project: &Path,
    config_path: Option<&Path>,
    prompt: Option<&str>,
    max_attempts: Option<u32>,
) -> Result<i32> {
    let paths = ProjectPaths::new(project);
    let mut cfg = paths.load_config(config_path)?;
    if let Some(max_attempts) = max_attempts {
        cfg.max_attempts = max_attempts;
    }
    let prompt = paths.read_prompt(prompt)?;
    let files = paths.load_files()?;
    if files.is_empty() {
        bail!("no files to heal in {}", paths.root.display());
    }
    let generator = command_generator(&cfg)?;
    let mut memory = open_memory(&cfg)?;
    let mut env = DiskEnv::new(&paths.workspace_dir)?;

    let outcome = heal(files, &prompt, &generator, &mut memory, &mut env, &cfg)?;
    write_dir(&paths.root, &outcome.files)
        .with_context(|| format!("write healed files to {}", paths.root.display()))?;
    Ok(report(&outcome))
}

fn cmd_config(project: &Path, config_path: Option<&Path>, write: bool) -> Result<i32> {
    let paths = ProjectPaths::new(project);
    let cfg = load_config(config_path.unwrap_or(&paths.config_path))?;
    if write {
        write_config(&paths.config_path, &cfg)?;
        println!("wrote {}", paths.config_path.display());
    } else {
        print!("{}", toml::to_string_pretty(&cfg).context("serialize config toml")?);
    }
    Ok(exit_codes::OK)
}

fn command_generator(cfg: &HealConfig) -> Result<CommandGenerator> {
    if cfg.generator.command.is_empty() {
        bail!("no generator configured (set [generator] command in healer.toml)");
    }
    CommandGenerator::from_config(&cfg.generator)
}

fn open_memory(cfg: &HealConfig) -> Result<ConversationMemory> {
    match &cfg.generator.memory_dir {
        Some(dir) => ConversationMemory::open(dir),
        None => Ok(ConversationMemory::in_memory()),
    }
}

/// Print one line per attempt plus the stop reason, and map it to an exit code.
fn report(outcome: &HealOutcome) -> i32 {
    for attempt in &outcome.attempts {
        let exit = match attempt.exit.code() {
            Some(code) => format!("exit {code}"),
            None if attempt.exit.timed_out() => "timed out".to_string(),
            None => "signaled".to_string(),
        };
        println!(
            "attempt {}: {:?} ({exit}, {:.1}s)",
            attempt.attempt,
            attempt.outcome,
            attempt.duration.as_secs_f64()
        );
    }
    let (label, code) = match outcome.stop {
        HealStop::Succeeded => ("succeeded", exit_codes::OK),
        HealStop::Exhausted => ("exhausted", exit_codes::FAILED),
        HealStop::TimedOut => ("timed out", exit_codes::TIMED_OUT),
    };
    println!(
        "{label} after {} attempt(s), {} repair(s), {} file(s)",
        outcome.attempts.len(),
        outcome.repairs,
        outcome.files.len()
    );
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_heal_with_overrides() {
        let cli = Cli::parse_from([
            "healer",
            "heal",
            "proj",
            "--max-attempts",
            "2",
            "--config",
            "custom.toml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(
            cli.command,
            Command::Heal {
                max_attempts: Some(2),
                prompt: None,
                ..
            }
        ));
    }

    #[test]
    fn parse_config_write() {
        let cli = Cli::parse_from(["healer", "config", "proj", "--write"]);
        assert!(matches!(cli.command, Command::Config { write: true, .. }));
    }
}

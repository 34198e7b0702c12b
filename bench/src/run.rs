//! Benchmark execution.
//!
//! For every selected task: improve the initial code through the agent (which
//! heals it), deploy the result, run the task command once per input, and
//! evaluate the assertion tables.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use healer::agent::Agent;
use healer::core::files::FileSet;
use healer::io::env::{ExecutionEnv, SpawnOptions, shell_escape};

use crate::assertion::{Assertable, evaluate_all};
use crate::benchmark::{Benchmark, Task};
use crate::report::print_results;

/// Named assertion outcomes for one task, one map per input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_name: String,
    pub assertion_results: Vec<BTreeMap<String, bool>>,
    /// Wall clock for improve plus every command run.
    pub duration: Duration,
}

/// Run `benchmark` (or only `task_name`) through `agent`, deploying results into `env`.
///
/// Every selected task is validated before the first agent call. Command runs
/// that time out are recorded, not raised.
#[instrument(skip_all, fields(benchmark = %benchmark.name(), task = task_name.unwrap_or("*")))]
pub fn run<A, E>(
    agent: &mut A,
    env: &mut E,
    benchmark: &Benchmark,
    task_name: Option<&str>,
    verbose: bool,
) -> Result<Vec<TaskResult>>
where
    A: Agent + ?Sized,
    E: ExecutionEnv,
{
    let tasks = select_tasks(benchmark, task_name)?;
    let mut prepared = Vec::with_capacity(tasks.len());
    for task in tasks {
        task.validate()?;
        let files = benchmark.initial_files(task)?;
        prepared.push((task, files));
    }
    info!(tasks = prepared.len(), "benchmark started");

    let mut results = Vec::with_capacity(prepared.len());
    for (task, initial) in prepared {
        let result = run_task(agent, env, benchmark, task, &initial)
            .with_context(|| format!("run task {}", task.name))?;
        results.push(result);
        if verbose {
            print_results(&results);
        }
    }
    info!(tasks = results.len(), "benchmark finished");
    Ok(results)
}

fn select_tasks<'a>(benchmark: &'a Benchmark, task_name: Option<&str>) -> Result<Vec<&'a Task>> {
    let tasks: Vec<&Task> = benchmark
        .tasks()
        .iter()
        .filter(|task| task_name.is_none_or(|name| task.name == name))
        .collect();
    if let Some(name) = task_name
        && tasks.is_empty()
    {
        bail!("unknown task {} in benchmark {}", name, benchmark.name());
    }
    Ok(tasks)
}

#[instrument(skip_all, fields(task = %task.name))]
fn run_task<A, E>(
    agent: &mut A,
    env: &mut E,
    benchmark: &Benchmark,
    task: &Task,
    initial: &FileSet,
) -> Result<TaskResult>
where
    A: Agent + ?Sized,
    E: ExecutionEnv,
{
    let started = Instant::now();
    let files = agent.improve(initial, &task.prompt)?;
    env.upload(&files)?;
    debug!(files = files.len(), "task files deployed");

    let timeout = benchmark.timeout();
    let mut assertables = Vec::new();
    match &task.command {
        Some(command) => {
            for input in task.effective_inputs() {
                let command = format!("{command} {}", shell_escape(&input));
                let options = SpawnOptions {
                    timeout,
                    ..SpawnOptions::default()
                };
                let result = env.spawn(&command, &options)?.wait_and_collect()?;
                if result.exit.timed_out() {
                    warn!(command = %command, "task command timed out");
                }
                debug!(command = %command, exit = ?result.exit, "task command finished");
                assertables.push(Assertable::from_result(&files, &*env, result));
            }
        }
        None => assertables.push(Assertable::without_process(&files, &*env)),
    }

    let mut assertion_results = Vec::with_capacity(task.assertions.len());
    for (index, table) in task.assertions.iter().enumerate() {
        let Some(assertable) = assertables.get(index).or(assertables.first()) else {
            break;
        };
        assertion_results.push(evaluate_all(table, assertable, timeout)?);
    }

    let duration = started.elapsed();
    info!(duration_secs = duration.as_secs_f64(), "task finished");
    Ok(TaskResult {
        task_name: task.name.clone(),
        assertion_results,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::{BenchmarkFile, InputAssertionMismatch};
    use healer::test_support::{ScriptedEnv, ScriptedRun, entrypoint_only};
    use std::path::PathBuf;

    /// Agent that returns canned files and records prompts.
    struct FixedAgent {
        files: FileSet,
        prompts: Vec<String>,
    }

    impl Agent for FixedAgent {
        fn init(&mut self, prompt: &str) -> Result<FileSet> {
            self.prompts.push(prompt.to_string());
            Ok(self.files.clone())
        }

        fn improve(&mut self, _files: &FileSet, prompt: &str) -> Result<FileSet> {
            self.prompts.push(prompt.to_string());
            Ok(self.files.clone())
        }
    }

    fn agent() -> FixedAgent {
        FixedAgent {
            files: entrypoint_only("echo \"Hello, $1\""),
            prompts: Vec::new(),
        }
    }

    fn benchmark(toml: &str) -> Benchmark {
        Benchmark {
            path: PathBuf::from("benchmarks/test.toml"),
            file: BenchmarkFile::parse_str(toml).expect("benchmark"),
        }
    }

    const GREETER: &str = r#"
[benchmark]
name = "hello"
timeout_secs = 5

[[tasks]]
name = "greeter"
prompt = "greet the first argument"
command = "bash run.sh"
inputs = ["Ada", "Grace O'Hara"]

[[tasks.assertions]]
greets = { type = "stdout_contains", text = "Hello, Ada" }
exits = { type = "exit_code", code = 0 }

[[tasks.assertions]]
greets = { type = "stdout_contains", text = "Hello, Grace" }
exits = { type = "exit_code", code = 0 }

[[tasks]]
name = "static"
prompt = "write a readme"

[[tasks.assertions]]
has_entrypoint = { type = "file_exists", path = "run.sh" }
"#;

    #[test]
    fn runs_command_once_per_input_with_escaped_argument() {
        let mut agent = agent();
        let mut env = ScriptedEnv::new(vec![
            ScriptedRun::exit(0, "Hello, Ada", ""),
            ScriptedRun::timed_out(),
        ]);
        let results = run(&mut agent, &mut env, &benchmark(GREETER), None, false).expect("run");

        assert_eq!(results.len(), 2);
        assert_eq!(
            env.commands(),
            vec!["bash run.sh Ada", "bash run.sh 'Grace O'\"'\"'Hara'"]
        );
        assert!(
            env.spawn_options()
                .iter()
                .all(|options| options.timeout == Some(Duration::from_secs(5)))
        );

        let greeter = &results[0];
        assert_eq!(greeter.task_name, "greeter");
        assert_eq!(greeter.assertion_results[0].get("greets"), Some(&true));
        assert_eq!(greeter.assertion_results[0].get("exits"), Some(&true));
        assert_eq!(greeter.assertion_results[1].get("greets"), Some(&false));
        assert_eq!(greeter.assertion_results[1].get("exits"), Some(&false));

        let readme = &results[1];
        assert_eq!(readme.assertion_results.len(), 1);
        assert_eq!(readme.assertion_results[0].get("has_entrypoint"), Some(&true));
        assert_eq!(agent.prompts, vec!["greet the first argument", "write a readme"]);
        assert_eq!(env.uploads().len(), 2);
    }

    #[test]
    fn task_filter_selects_one_task() {
        let mut agent = agent();
        let mut env = ScriptedEnv::new(Vec::new());
        let results = run(
            &mut agent,
            &mut env,
            &benchmark(GREETER),
            Some("static"),
            false,
        )
        .expect("run");
        assert_eq!(results.len(), 1);
        assert_eq!(env.spawn_count(), 0);
    }

    #[test]
    fn unknown_task_is_an_error() {
        let mut agent = agent();
        let mut env = ScriptedEnv::new(Vec::new());
        let err = run(
            &mut agent,
            &mut env,
            &benchmark(GREETER),
            Some("missing"),
            false,
        )
        .expect_err("unknown task");
        assert!(err.to_string().contains("unknown task missing"));
        assert!(agent.prompts.is_empty());
    }

    #[test]
    fn mismatch_aborts_before_any_agent_call() {
        let mut bench = benchmark(GREETER);
        bench.file.tasks[1].inputs = vec!["a".to_string(), "b".to_string()];
        let mut agent = agent();
        let mut env = ScriptedEnv::new(Vec::new());

        let err = run(&mut agent, &mut env, &bench, None, false).expect_err("mismatch");
        assert!(err.downcast_ref::<InputAssertionMismatch>().is_some());
        assert!(agent.prompts.is_empty());
        assert_eq!(env.spawn_count(), 0);
    }

    #[test]
    fn command_without_inputs_runs_once_with_empty_argument() {
        let toml = r#"
[benchmark]
name = "hello"

[[tasks]]
name = "noargs"
prompt = "print ok"
command = "bash run.sh"

[[tasks.assertions]]
ok = { type = "stdout_equals", text = "ok" }
"#;
        let mut agent = agent();
        let mut env = ScriptedEnv::new(vec![ScriptedRun::exit(0, "ok\n", "")]);
        let results = run(&mut agent, &mut env, &benchmark(toml), None, false).expect("run");
        assert_eq!(env.commands(), vec!["bash run.sh ''"]);
        assert_eq!(env.spawn_options()[0].timeout, None);
        assert_eq!(results[0].assertion_results[0].get("ok"), Some(&true));
    }

    #[test]
    fn healing_agent_repairs_before_task_command_runs() {
        use healer::agent::HealingAgent;
        use healer::io::config::HealConfig;
        use healer::test_support::{ScriptedGenerator, files};

        let toml = r#"
[benchmark]
name = "hello"

[[tasks]]
name = "noargs"
prompt = "print ok"
command = "bash run.sh"

[[tasks.assertions]]
ok = { type = "stdout_equals", text = "ok" }
"#;
        let generator = ScriptedGenerator::new(
            vec![files(&[("main.py", "prnt('ok')")])],
            vec![
                entrypoint_only("python3 main.py"),
                files(&[("main.py", "print('ok')"), ("run.sh", "python3 main.py")]),
            ],
        );
        let heal_env = ScriptedEnv::new(vec![
            ScriptedRun::exit(1, "", "NameError: name 'prnt' is not defined"),
            ScriptedRun::exit(0, "ok", ""),
        ]);
        let mut agent = HealingAgent::new(generator, Vec::new(), heal_env, HealConfig::default());
        let mut task_env = ScriptedEnv::new(vec![ScriptedRun::exit(0, "ok\n", "")]);

        let results = run(&mut agent, &mut task_env, &benchmark(toml), None, false).expect("run");
        assert_eq!(results[0].assertion_results[0].get("ok"), Some(&true));
        assert_eq!(agent.env().spawn_count(), 2);
        let deployed = &task_env.uploads()[0];
        assert_eq!(deployed.get("main.py"), Some("print('ok')"));
        assert_eq!(deployed.get("run.sh"), Some("python3 main.py"));
    }

    #[test]
    fn agent_errors_propagate_with_task_context() {
        struct Broken;
        impl Agent for Broken {
            fn init(&mut self, _prompt: &str) -> Result<FileSet> {
                bail!("generator offline")
            }
            fn improve(&mut self, _files: &FileSet, _prompt: &str) -> Result<FileSet> {
                bail!("generator offline")
            }
        }
        let mut env = ScriptedEnv::new(Vec::new());
        let err = run(&mut Broken, &mut env, &benchmark(GREETER), None, false)
            .expect_err("agent error");
        assert!(format!("{err:#}").contains("run task greeter: generator offline"));
    }
}

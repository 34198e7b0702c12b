//! Declarative assertions evaluated against a task's final state.
//!
//! Each input run of a task produces an [`Assertable`]; every named [`Check`] in
//! the matching assertion table is evaluated to a boolean.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use healer::core::files::FileSet;
use healer::core::types::{AttemptResult, Exit};
use healer::io::env::{ExecutionEnv, SpawnOptions};

/// A predicate over an [`Assertable`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// The file is in the final FileSet or was produced in the workspace.
    FileExists { path: String },
    FileContains { path: String, text: String },
    StdoutContains { text: String },
    /// Compared after trimming surrounding whitespace on both sides.
    StdoutEquals { text: String },
    StderrEmpty,
    ExitCode { code: i32 },
    /// Runs `command` in the task workspace within the benchmark timeout, if any.
    CommandSucceeds { command: String },
}

impl Check {
    pub fn validate(&self) -> Result<()> {
        match self {
            Check::FileExists { path } | Check::FileContains { path, .. } => {
                if path.trim().is_empty() {
                    bail!("path must be non-empty");
                }
            }
            Check::CommandSucceeds { command } => {
                if command.trim().is_empty() {
                    bail!("command_succeeds.command must be non-empty");
                }
            }
            Check::StdoutContains { .. }
            | Check::StdoutEquals { .. }
            | Check::StderrEmpty
            | Check::ExitCode { .. } => {}
        }
        Ok(())
    }
}

/// Everything an assertion may look at after one input run.
///
/// `process`, `stdout` and `stderr` are `None` when the task declares no command;
/// output checks then fail.
pub struct Assertable<'a> {
    pub files: &'a FileSet,
    pub env: &'a dyn ExecutionEnv,
    pub process: Option<Exit>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl<'a> Assertable<'a> {
    /// Assertable for a task without a command.
    pub fn without_process(files: &'a FileSet, env: &'a dyn ExecutionEnv) -> Self {
        Self {
            files,
            env,
            process: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn from_result(
        files: &'a FileSet,
        env: &'a dyn ExecutionEnv,
        result: AttemptResult,
    ) -> Self {
        Self {
            files,
            env,
            process: Some(result.exit),
            stdout: Some(result.stdout),
            stderr: Some(result.stderr),
        }
    }

    fn file(&self, path: &str) -> Result<Option<String>> {
        if let Some(content) = self.files.get(path) {
            return Ok(Some(content.to_string()));
        }
        self.env.read_file(path)
    }
}

/// Evaluate one check. Only workspace read failures are errors.
pub fn evaluate(
    check: &Check,
    assertable: &Assertable<'_>,
    timeout: Option<Duration>,
) -> Result<bool> {
    let passed = match check {
        Check::FileExists { path } => assertable.file(path)?.is_some(),
        Check::FileContains { path, text } => assertable
            .file(path)?
            .is_some_and(|content| content.contains(text.as_str())),
        Check::StdoutContains { text } => assertable
            .stdout
            .as_deref()
            .is_some_and(|stdout| stdout.contains(text.as_str())),
        Check::StdoutEquals { text } => assertable
            .stdout
            .as_deref()
            .is_some_and(|stdout| stdout.trim() == text.trim()),
        Check::StderrEmpty => assertable
            .stderr
            .as_deref()
            .is_some_and(|stderr| stderr.trim().is_empty()),
        Check::ExitCode { code } => assertable.process.and_then(|exit| exit.code()) == Some(*code),
        Check::CommandSucceeds { command } => command_succeeds(assertable.env, command, timeout),
    };
    Ok(passed)
}

/// Evaluate a whole assertion table, keeping the declared names.
pub fn evaluate_all(
    checks: &BTreeMap<String, Check>,
    assertable: &Assertable<'_>,
    timeout: Option<Duration>,
) -> Result<BTreeMap<String, bool>> {
    let mut results = BTreeMap::new();
    for (name, check) in checks {
        let passed = evaluate(check, assertable, timeout)?;
        debug!(assertion = %name, passed, "assertion result");
        results.insert(name.clone(), passed);
    }
    Ok(results)
}

fn command_succeeds(env: &dyn ExecutionEnv, command: &str, timeout: Option<Duration>) -> bool {
    let options = SpawnOptions {
        timeout,
        ..SpawnOptions::default()
    };
    let result = env
        .spawn(command, &options)
        .and_then(|handle| handle.wait_and_collect());
    match result {
        Ok(result) => {
            if result.exit.timed_out() {
                warn!(command, "command_succeeds timed out");
            }
            result.exit == Exit::Code(0)
        }
        Err(err) => {
            warn!(command, error = %format!("{err:#}"), "command_succeeds could not run");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healer::test_support::{ScriptedEnv, ScriptedRun, files, temp_disk_env};

    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

    fn ran<'a>(
        files: &'a FileSet,
        env: &'a dyn ExecutionEnv,
        code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Assertable<'a> {
        Assertable::from_result(files, env, AttemptResult::new(Exit::Code(code), stdout, stderr))
    }

    #[test]
    fn output_checks() {
        let env = ScriptedEnv::new(Vec::new());
        let code = files(&[("main.py", "print('hi')")]);
        let assertable = ran(&code, &env, 0, "  hello world\n", "");

        let passes = [
            Check::StdoutContains {
                text: "hello".to_string(),
            },
            Check::StdoutEquals {
                text: "hello world".to_string(),
            },
            Check::StderrEmpty,
            Check::ExitCode { code: 0 },
            Check::FileContains {
                path: "main.py".to_string(),
                text: "print".to_string(),
            },
        ];
        for check in &passes {
            assert!(evaluate(check, &assertable, TIMEOUT).expect("eval"), "{check:?}");
        }

        let fails = [
            Check::StdoutEquals {
                text: "hello".to_string(),
            },
            Check::ExitCode { code: 1 },
            Check::FileExists {
                path: "missing.txt".to_string(),
            },
        ];
        for check in &fails {
            assert!(!evaluate(check, &assertable, TIMEOUT).expect("eval"), "{check:?}");
        }
    }

    #[test]
    fn output_checks_fail_without_process() {
        let env = ScriptedEnv::new(Vec::new());
        let code = files(&[("main.py", "print('hi')")]);
        let assertable = Assertable::without_process(&code, &env);

        assert!(!evaluate(&Check::StderrEmpty, &assertable, TIMEOUT).expect("eval"));
        assert!(!evaluate(&Check::ExitCode { code: 0 }, &assertable, TIMEOUT).expect("eval"));
        assert!(
            evaluate(
                &Check::FileExists {
                    path: "main.py".to_string()
                },
                &assertable,
                TIMEOUT
            )
            .expect("eval")
        );
    }

    #[test]
    fn timed_out_run_has_no_exit_code() {
        let env = ScriptedEnv::new(Vec::new());
        let code = FileSet::new();
        let assertable = Assertable::from_result(
            &code,
            &env,
            AttemptResult::new(Exit::TimedOut, "partial", ""),
        );
        assert!(!evaluate(&Check::ExitCode { code: 0 }, &assertable, TIMEOUT).expect("eval"));
        assert!(
            evaluate(
                &Check::StdoutContains {
                    text: "partial".to_string()
                },
                &assertable,
                TIMEOUT
            )
            .expect("eval")
        );
    }

    #[test]
    fn files_produced_in_workspace_count() {
        let env = ScriptedEnv::new(vec![ScriptedRun::exit(0, "", "").with_write("out.txt", "42")]);
        let handle = env
            .spawn("bash run.sh", &SpawnOptions::default())
            .expect("spawn");
        handle.wait_and_collect().expect("run");

        let code = FileSet::new();
        let assertable = ran(&code, &env, 0, "", "");
        assert!(
            evaluate(
                &Check::FileContains {
                    path: "out.txt".to_string(),
                    text: "42".to_string()
                },
                &assertable,
                TIMEOUT
            )
            .expect("eval")
        );
    }

    #[test]
    fn command_succeeds_runs_in_workspace() {
        let (_temp, mut env) = temp_disk_env().expect("env");
        let code = files(&[("data.txt", "payload")]);
        env.upload(&code).expect("upload");
        let assertable = ran(&code, &env, 0, "", "");

        let present = Check::CommandSucceeds {
            command: "grep -q payload data.txt".to_string(),
        };
        let absent = Check::CommandSucceeds {
            command: "grep -q nothing data.txt".to_string(),
        };
        assert!(evaluate(&present, &assertable, TIMEOUT).expect("eval"));
        assert!(!evaluate(&absent, &assertable, TIMEOUT).expect("eval"));
    }

    #[test]
    fn command_succeeds_fails_on_timeout() {
        let (_temp, env) = temp_disk_env().expect("env");
        let code = FileSet::new();
        let assertable = ran(&code, &env, 0, "", "");
        let slow = Check::CommandSucceeds {
            command: "sleep 10".to_string(),
        };
        assert!(!evaluate(&slow, &assertable, Some(Duration::from_secs(1))).expect("eval"));
    }

    #[test]
    fn evaluate_all_keeps_names() {
        let env = ScriptedEnv::new(Vec::new());
        let code = FileSet::new();
        let assertable = ran(&code, &env, 0, "ok", "");
        let mut checks = BTreeMap::new();
        checks.insert("says_ok".to_string(), Check::StdoutEquals {
            text: "ok".to_string(),
        });
        checks.insert("exit_one".to_string(), Check::ExitCode { code: 1 });

        let results = evaluate_all(&checks, &assertable, TIMEOUT).expect("eval");
        assert_eq!(results.get("says_ok"), Some(&true));
        assert_eq!(results.get("exit_one"), Some(&false));
    }
}

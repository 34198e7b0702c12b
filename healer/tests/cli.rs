//! CLI tests: spawn the built `healer` binary and check exit codes and written files.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use healer::exit_codes;
use healer::io::config::{GeneratorConfig, HealConfig, write_config};

fn healer(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_healer"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run healer")
}

/// Project whose generator always answers with `reply` as the new `run.sh`.
fn project(root: &Path, run_sh: &str, reply: &str, cfg: HealConfig) {
    fs::write(root.join("run.sh"), run_sh).expect("run.sh");
    fs::write(root.join("prompt"), "print hello world").expect("prompt");
    let response = serde_json::json!({ "files": { "run.sh": reply } }).to_string();
    let script = format!("cat >/dev/null; printf '%s' '{response}'");
    let cfg = HealConfig {
        generator: GeneratorConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script],
            ..GeneratorConfig::default()
        },
        ..cfg
    };
    write_config(&root.join("healer.toml"), &cfg).expect("config");
}

#[test]
fn heal_repairs_project_and_exits_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    project(root, "exit 1", "echo hello world", HealConfig::default());

    let output = healer(&["heal", root.to_str().expect("utf8 path")]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
    assert_eq!(
        fs::read_to_string(root.join("run.sh")).expect("run.sh"),
        "echo hello world"
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("succeeded after 2 attempt(s), 1 repair(s)"));
    assert!(root.join(".healer/attempts/1/prompt.md").is_file());
    assert!(root.join(".healer/memory/conversation.jsonl").is_file());
}

#[test]
fn exhausted_heal_exits_failed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    project(
        root,
        "exit 1",
        "echo still broken >&2; exit 5",
        HealConfig::default(),
    );

    let output = healer(&["heal", root.to_str().expect("utf8 path"), "--max-attempts", "2"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED), "{output:?}");
    assert_eq!(
        fs::read_to_string(root.join("run.sh")).expect("run.sh"),
        "echo still broken >&2; exit 5"
    );
}

#[test]
fn timed_out_heal_exits_timed_out() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    project(
        root,
        "sleep 30",
        "echo unused",
        HealConfig {
            attempt_timeout_secs: 1,
            ..HealConfig::default()
        },
    );

    let output = healer(&["heal", root.to_str().expect("utf8 path")]);
    assert_eq!(output.status.code(), Some(exit_codes::TIMED_OUT), "{output:?}");
}

#[test]
fn missing_prompt_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    project(root, "exit 0", "echo unused", HealConfig::default());
    fs::remove_file(root.join("prompt")).expect("remove prompt");

    let output = healer(&["heal", root.to_str().expect("utf8 path")]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("prompt"));
}

#[test]
fn config_prints_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = healer(&["config", temp.path().to_str().expect("utf8 path")]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("max_attempts = 4"));
    assert!(stdout.contains("entrypoint = \"run.sh\""));
}

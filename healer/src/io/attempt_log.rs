//! Attempt logging helpers for `<state_dir>/attempts/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::outcome::Outcome;
use crate::core::types::{AttemptResult, Exit};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptMeta {
    pub attempt: u32,
    pub command: String,
    pub outcome: Outcome,
    pub exit: Exit,
    pub duration_ms: u64,
    pub eof_detected: bool,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub prompt_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(state_dir: &Path, attempt: u32) -> Self {
        let dir = state_dir.join("attempts").join(attempt.to_string());
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            stdout_path: dir.join("stdout.log"),
            stderr_path: dir.join("stderr.log"),
            prompt_path: dir.join("prompt.md"),
        }
    }
}

pub struct AttemptWriteRequest<'a> {
    pub state_dir: &'a Path,
    pub meta: &'a AttemptMeta,
    pub result: &'a AttemptResult,
    pub prompt: Option<&'a str>,
}

pub fn write_attempt(request: &AttemptWriteRequest<'_>) -> Result<AttemptPaths> {
    let paths = AttemptPaths::new(request.state_dir, request.meta.attempt);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;

    write_json(&paths.meta_path, request.meta)?;
    write_text(
        &paths.stdout_path,
        &with_notice(&request.result.stdout, "stdout", request.result.stdout_truncated),
    )?;
    write_text(
        &paths.stderr_path,
        &with_notice(&request.result.stderr, "stderr", request.result.stderr_truncated),
    )?;
    if let Some(prompt) = request.prompt {
        write_text(&paths.prompt_path, prompt)?;
    }

    Ok(paths)
}

/// Record the repair prompt built from attempt `attempt`.
pub fn write_prompt(state_dir: &Path, attempt: u32, prompt: &str) -> Result<PathBuf> {
    let paths = AttemptPaths::new(state_dir, attempt);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;
    write_text(&paths.prompt_path, prompt)?;
    Ok(paths.prompt_path)
}

/// Remove logs of a previous heal so attempt numbers start fresh.
pub fn clear_attempts(state_dir: &Path) -> Result<()> {
    let dir = state_dir.join("attempts");
    if dir.exists() {
        fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
    }
    Ok(())
}

fn with_notice(text: &str, stream: &str, truncated: usize) -> String {
    if truncated == 0 {
        return text.to_string();
    }
    format!("{text}\n[{stream} truncated {truncated} bytes]\n")
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(attempt: u32, outcome: Outcome) -> AttemptMeta {
        AttemptMeta {
            attempt,
            command: "bash run.sh".to_string(),
            outcome,
            exit: Exit::Code(1),
            duration_ms: 12,
            eof_detected: false,
            stdout_truncated: 0,
            stderr_truncated: 3,
            files: vec!["run.sh".to_string()],
        }
    }

    #[test]
    fn attempt_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = AttemptPaths::new(temp.path(), 3);

        assert!(paths.dir.ends_with(Path::new("attempts/3")));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.stdout_path.ends_with("stdout.log"));
        assert!(paths.stderr_path.ends_with("stderr.log"));
        assert!(paths.prompt_path.ends_with("prompt.md"));
    }

    #[test]
    fn writes_attempt_logs_with_prompt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = AttemptResult {
            stderr_truncated: 3,
            ..AttemptResult::new(Exit::Code(1), "out", "boom")
        };
        let paths = write_attempt(&AttemptWriteRequest {
            state_dir: temp.path(),
            meta: &meta(1, Outcome::RuntimeFailure),
            result: &result,
            prompt: Some("fix it"),
        })
        .expect("write logs");

        let raw = fs::read_to_string(&paths.meta_path).expect("meta");
        let parsed: AttemptMeta = serde_json::from_str(&raw).expect("parse meta");
        assert_eq!(parsed.outcome, Outcome::RuntimeFailure);
        assert_eq!(fs::read_to_string(&paths.stdout_path).expect("stdout"), "out");
        assert!(
            fs::read_to_string(&paths.stderr_path)
                .expect("stderr")
                .contains("[stderr truncated 3 bytes]")
        );
        assert_eq!(fs::read_to_string(&paths.prompt_path).expect("prompt"), "fix it");
    }

    #[test]
    fn successful_attempt_has_no_prompt_and_clear_removes_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = AttemptResult::new(Exit::Code(0), "ok", "");
        let paths = write_attempt(&AttemptWriteRequest {
            state_dir: temp.path(),
            meta: &meta(1, Outcome::Success),
            result: &result,
            prompt: None,
        })
        .expect("write logs");
        assert!(!paths.prompt_path.exists());

        let prompt_path = write_prompt(temp.path(), 1, "repair me").expect("prompt");
        assert_eq!(prompt_path, paths.prompt_path);

        clear_attempts(temp.path()).expect("clear");
        assert!(!paths.dir.exists());
    }
}

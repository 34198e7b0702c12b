//! Test-only helpers: scripted generator and execution environment fakes.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::files::FileSet;
use crate::core::types::{AttemptResult, Exit};
use crate::io::env::{DeployError, DiskEnv, ExecutionEnv, ProcessHandle, SpawnError, SpawnOptions};
use crate::io::generator::Generator;

/// Build a FileSet from literal pairs.
pub fn files(pairs: &[(&str, &str)]) -> FileSet {
    FileSet::from_pairs(pairs.iter().copied()).expect("valid test file set")
}

/// FileSet with only an entrypoint script.
pub fn entrypoint_only(script: &str) -> FileSet {
    files(&[("run.sh", script)])
}

/// Disk environment in a fresh temp directory. Keep the `TempDir` alive.
pub fn temp_disk_env() -> Result<(TempDir, DiskEnv)> {
    let temp = tempfile::tempdir()?;
    let env = DiskEnv::new(temp.path().join("workspace"))?;
    Ok((temp, env))
}

/// A call observed by [`ScriptedGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorCall {
    Generate { prompt: String },
    Repair { instruction: String, files: FileSet },
}

/// Generator returning queued FileSets and recording every call.
///
/// Its memory is a plain list of prompts, so tests can check that callers forward it.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    generated: RefCell<VecDeque<FileSet>>,
    repaired: RefCell<VecDeque<FileSet>>,
    calls: RefCell<Vec<GeneratorCall>>,
}

impl ScriptedGenerator {
    pub fn new(generated: Vec<FileSet>, repaired: Vec<FileSet>) -> Self {
        Self {
            generated: RefCell::new(generated.into()),
            repaired: RefCell::new(repaired.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Generator that only answers repair calls.
    pub fn repairs(repaired: Vec<FileSet>) -> Self {
        Self::new(Vec::new(), repaired)
    }

    pub fn calls(&self) -> Vec<GeneratorCall> {
        self.calls.borrow().clone()
    }

    pub fn repair_instructions(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                GeneratorCall::Repair { instruction, .. } => Some(instruction.clone()),
                GeneratorCall::Generate { .. } => None,
            })
            .collect()
    }

    pub fn repair_count(&self) -> usize {
        self.repair_instructions().len()
    }
}

impl Generator for ScriptedGenerator {
    type Memory = Vec<String>;

    fn generate(&self, prompt: &str, memory: &mut Vec<String>) -> Result<FileSet> {
        self.calls.borrow_mut().push(GeneratorCall::Generate {
            prompt: prompt.to_string(),
        });
        memory.push(prompt.to_string());
        self.generated
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted generator has no generate response left"))
    }

    fn repair(
        &self,
        instruction: &str,
        current: &FileSet,
        memory: &mut Vec<String>,
    ) -> Result<FileSet> {
        self.calls.borrow_mut().push(GeneratorCall::Repair {
            instruction: instruction.to_string(),
            files: current.clone(),
        });
        memory.push(instruction.to_string());
        self.repaired
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted generator has no repair response left"))
    }
}

/// One scripted execution: the result to return and files the "program" writes.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub result: AttemptResult,
    pub writes: Vec<(String, String)>,
}

impl ScriptedRun {
    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            result: AttemptResult::new(Exit::Code(code), stdout, stderr),
            writes: Vec::new(),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            result: AttemptResult::new(Exit::TimedOut, "", ""),
            writes: Vec::new(),
        }
    }

    pub fn with_write(mut self, path: &str, content: &str) -> Self {
        self.writes.push((path.to_string(), content.to_string()));
        self
    }
}

/// Execution environment returning queued results and recording uploads and commands.
#[derive(Debug)]
pub struct ScriptedEnv {
    runs: RefCell<VecDeque<ScriptedRun>>,
    uploads: Vec<FileSet>,
    commands: RefCell<Vec<(String, SpawnOptions)>>,
    produced: RefCell<BTreeMap<String, String>>,
    workdir: PathBuf,
    fail_upload: bool,
    fail_spawn: bool,
}

impl ScriptedEnv {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            uploads: Vec::new(),
            commands: RefCell::new(Vec::new()),
            produced: RefCell::new(BTreeMap::new()),
            workdir: PathBuf::from("scripted-workspace"),
            fail_upload: false,
            fail_spawn: false,
        }
    }

    /// Every upload fails with [`DeployError`].
    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    /// Every spawn fails with [`SpawnError`].
    pub fn failing_spawn(mut self) -> Self {
        self.fail_spawn = true;
        self
    }

    pub fn uploads(&self) -> &[FileSet] {
        &self.uploads
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .borrow()
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    pub fn spawn_options(&self) -> Vec<SpawnOptions> {
        self.commands
            .borrow()
            .iter()
            .map(|(_, options)| options.clone())
            .collect()
    }

    pub fn spawn_count(&self) -> usize {
        self.commands.borrow().len()
    }

    pub fn remaining_runs(&self) -> usize {
        self.runs.borrow().len()
    }
}

impl ExecutionEnv for ScriptedEnv {
    fn upload(&mut self, files: &FileSet) -> Result<()> {
        if self.fail_upload {
            return Err(DeployError {
                workdir: self.workdir.clone(),
                reason: "scripted deploy failure".to_string(),
            }
            .into());
        }
        self.produced.borrow_mut().clear();
        self.uploads.push(files.clone());
        Ok(())
    }

    fn spawn(&self, command: &str, options: &SpawnOptions) -> Result<Box<dyn ProcessHandle>> {
        self.commands
            .borrow_mut()
            .push((command.to_string(), options.clone()));
        if self.fail_spawn {
            return Err(SpawnError {
                command: command.to_string(),
                reason: "scripted spawn failure".to_string(),
            }
            .into());
        }
        let run = self
            .runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted env has no run left for {command}"))?;
        let mut produced = self.produced.borrow_mut();
        for (path, content) in run.writes {
            produced.insert(path, content);
        }
        Ok(Box::new(ScriptedProcess { result: run.result }))
    }

    fn read_file(&self, rel_path: &str) -> Result<Option<String>> {
        if let Some(content) = self.produced.borrow().get(rel_path) {
            return Ok(Some(content.clone()));
        }
        Ok(self
            .uploads
            .last()
            .and_then(|files| files.get(rel_path))
            .map(str::to_string))
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }
}

struct ScriptedProcess {
    result: AttemptResult,
}

impl ProcessHandle for ScriptedProcess {
    fn wait_and_collect(self: Box<Self>) -> Result<AttemptResult> {
        Ok(self.result)
    }
}

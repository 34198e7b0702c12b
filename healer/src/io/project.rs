//! Project layout for the `healer` CLI.
//!
//! A project is a directory holding the code being healed, an optional `prompt`
//! file, an optional `healer.toml`, and the `.healer/` state directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::core::files::FileSet;
use crate::io::config::{CONFIG_FILE_NAME, HealConfig, load_config};
use crate::io::files::load_dir;

pub const PROMPT_FILE_NAME: &str = "prompt";
pub const STATE_DIR_NAME: &str = ".healer";

/// All canonical paths for a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub prompt_path: PathBuf,
    pub state_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub memory_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR_NAME);
        Self {
            config_path: root.join(CONFIG_FILE_NAME),
            prompt_path: root.join(PROMPT_FILE_NAME),
            workspace_dir: state_dir.join("workspace"),
            memory_dir: state_dir.join("memory"),
            state_dir,
            root,
        }
    }

    /// Load `--config` if given, else `healer.toml`, else defaults.
    ///
    /// Relative paths in the file are resolved against the project root, and unset
    /// state/memory directories default to `.healer/` locations.
    pub fn load_config(&self, override_path: Option<&Path>) -> Result<HealConfig> {
        let path = override_path.unwrap_or(&self.config_path);
        if override_path.is_some() && !path.exists() {
            bail!("config file {} does not exist", path.display());
        }
        let mut cfg = load_config(path)?;
        cfg.state_dir = Some(self.resolve(cfg.state_dir.take(), &self.state_dir));
        cfg.generator.memory_dir =
            Some(self.resolve(cfg.generator.memory_dir.take(), &self.memory_dir));
        cfg.generator.preprompts_dir = cfg
            .generator
            .preprompts_dir
            .take()
            .map(|dir| self.root.join(dir));
        Ok(cfg)
    }

    /// The codebase: every project file except healer's own config, prompt and state.
    pub fn load_files(&self) -> Result<FileSet> {
        let mut files = load_dir(&self.root)?;
        files.remove(CONFIG_FILE_NAME);
        files.remove(PROMPT_FILE_NAME);
        Ok(files)
    }

    /// Prompt text from `--prompt`, else the project's `prompt` file.
    pub fn read_prompt(&self, inline: Option<&str>) -> Result<String> {
        let prompt = match inline {
            Some(prompt) => prompt.to_string(),
            None => fs::read_to_string(&self.prompt_path)
                .with_context(|| format!("read {}", self.prompt_path.display()))?,
        };
        if prompt.trim().is_empty() {
            bail!("prompt must be non-empty");
        }
        Ok(prompt)
    }

    fn resolve(&self, configured: Option<PathBuf>, default: &Path) -> PathBuf {
        match configured {
            Some(dir) => self.root.join(dir),
            None => default.to_path_buf(),
        }
    }
}

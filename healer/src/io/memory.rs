//! Conversation memory and preprompts for the command-backed generator.
//!
//! The supervisor only forwards a `&mut ConversationMemory` between generator calls;
//! it never reads or writes entries itself.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MEMORY_LOG_FILE: &str = "conversation.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: Role,
    pub content: String,
}

/// Ordered conversation history, optionally mirrored to an append-only JSONL file.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    entries: Vec<MemoryEntry>,
    log_path: Option<PathBuf>,
}

impl ConversationMemory {
    /// Memory held only in process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Memory mirrored to `<dir>/conversation.jsonl`. Existing entries are loaded.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("create memory dir {}", dir.display()))?;
        let log_path = dir.join(MEMORY_LOG_FILE);
        let mut entries = Vec::new();
        if log_path.exists() {
            let raw = fs::read_to_string(&log_path)
                .with_context(|| format!("read {}", log_path.display()))?;
            for (idx, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: MemoryEntry = serde_json::from_str(line)
                    .with_context(|| format!("parse {} line {}", log_path.display(), idx + 1))?;
                entries.push(entry);
            }
        }
        debug!(path = %log_path.display(), entries = entries.len(), "opened conversation memory");
        Ok(Self {
            entries,
            log_path: Some(log_path),
        })
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) -> Result<()> {
        let entry = MemoryEntry {
            role,
            content: content.into(),
        };
        if let Some(path) = &self.log_path {
            let mut line = serde_json::to_string(&entry).context("serialize memory entry")?;
            line.push('\n');
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open {}", path.display()))?;
            file.write_all(line.as_bytes())
                .with_context(|| format!("append {}", path.display()))?;
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Named system-prompt fragments (file stem to content).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Preprompts {
    prompts: BTreeMap<String, String>,
}

impl Preprompts {
    /// Load every regular file in `dir`. A missing directory yields an empty set.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut prompts = BTreeMap::new();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no preprompts directory");
            return Ok(Self { prompts });
        }
        for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry.context("read preprompt entry")?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let content =
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            prompts.insert(name.to_string(), content);
        }
        Ok(Self { prompts })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prompts: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.prompts.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

//! Agents turn a prompt into a healed FileSet.

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::files::FileSet;
use crate::core::repair::entrypoint_instruction;
use crate::heal::{HealOutcome, heal};
use crate::io::config::HealConfig;
use crate::io::env::ExecutionEnv;
use crate::io::generator::Generator;

/// Something that can write and improve code from a prompt.
pub trait Agent {
    /// Build a codebase from scratch.
    fn init(&mut self, prompt: &str) -> Result<FileSet>;

    /// Apply `prompt` to an existing codebase.
    fn improve(&mut self, files: &FileSet, prompt: &str) -> Result<FileSet>;
}

/// Agent that generates code, asks for an entrypoint, then self-heals the result.
pub struct HealingAgent<G: Generator, E: ExecutionEnv> {
    generator: G,
    memory: G::Memory,
    env: E,
    config: HealConfig,
    last_heal: Option<HealOutcome>,
}

impl<G: Generator, E: ExecutionEnv> HealingAgent<G, E> {
    pub fn new(generator: G, memory: G::Memory, env: E, config: HealConfig) -> Self {
        Self {
            generator,
            memory,
            env,
            config,
            last_heal: None,
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn memory(&self) -> &G::Memory {
        &self.memory
    }

    /// Outcome of the most recent heal, including why it stopped.
    pub fn last_heal(&self) -> Option<&HealOutcome> {
        self.last_heal.as_ref()
    }

    /// Ask for the entrypoint and merge only that file onto `files`.
    #[instrument(skip_all, fields(entrypoint = %self.config.entrypoint))]
    fn with_entrypoint(&mut self, files: FileSet) -> Result<FileSet> {
        let instruction = entrypoint_instruction(&self.config.entrypoint)?;
        let proposed = self
            .generator
            .repair(&instruction, &files, &mut self.memory)?;
        proposed.require(&self.config.entrypoint)?;
        let mut entrypoint = FileSet::new();
        if let Some(script) = proposed.get(&self.config.entrypoint) {
            entrypoint.insert(self.config.entrypoint.as_str(), script)?;
        }
        debug!(files = files.len(), "merged entrypoint");
        Ok(files.merged(&entrypoint))
    }

    fn heal(&mut self, files: FileSet, prompt: &str) -> Result<FileSet> {
        let outcome = heal(
            files,
            prompt,
            &self.generator,
            &mut self.memory,
            &mut self.env,
            &self.config,
        )?;
        info!(stop = ?outcome.stop, repairs = outcome.repairs, "agent heal finished");
        let files = outcome.files.clone();
        self.last_heal = Some(outcome);
        Ok(files)
    }
}

impl<G: Generator, E: ExecutionEnv> Agent for HealingAgent<G, E> {
    #[instrument(skip_all)]
    fn init(&mut self, prompt: &str) -> Result<FileSet> {
        let generated = self.generator.generate(prompt, &mut self.memory)?;
        let files = self.with_entrypoint(generated)?;
        self.heal(files, prompt)
    }

    #[instrument(skip_all, fields(files = files.len()))]
    fn improve(&mut self, files: &FileSet, prompt: &str) -> Result<FileSet> {
        let improved = if files.is_empty() {
            self.generator.generate(prompt, &mut self.memory)?
        } else {
            self.generator.repair(prompt, files, &mut self.memory)?
        };
        let files = self.with_entrypoint(improved)?;
        self.heal(files, prompt)
    }
}

//! Collaborators the engine drives: generation, sandboxed commands, files,
//! remediation, user interaction and persistence.
//!
//! Each one is an `async_trait` held as `Arc<dyn ...>` so tests can swap in
//! fakes. [`Collaborators::from_config`] wires the real implementations.

mod fs;
mod generation;
mod interaction;
mod remediation;
mod sandbox;
mod store;

pub use fs::{LocalFs, ProjectFs, confine};
pub use generation::{
    ChatMessage, CommandGenerationService, GenerationService, HttpGenerationService, Role,
    render_transcript,
};
pub use interaction::{ConsolePrompter, ScriptedPrompter, UserPrompter};
pub use remediation::{GenerationRemediator, RepairReport, RepairRequest, Remediator};
pub use sandbox::{
    CommandExecutor, CommandOutput, PolicyDecision, SandboxPolicy, ShellExecutor, Substitution,
    SubstitutionRun,
};
pub use store::{JsonFileStore, ProjectStore};

use anyhow::Result;
use std::sync::Arc;

use crate::engine_config::{EngineConfig, ProviderKind};

/// The full set of collaborators for one engine.
#[derive(Clone)]
pub struct Collaborators {
    pub generation: Arc<dyn GenerationService>,
    pub executor: Arc<dyn CommandExecutor>,
    pub fs: Arc<dyn ProjectFs>,
    pub remediator: Arc<dyn Remediator>,
    pub prompter: Arc<dyn UserPrompter>,
    pub store: Arc<dyn ProjectStore>,
}

impl Collaborators {
    /// Real implementations for a project on disk.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let generation_section = &config.toml.generation;
        let generation: Arc<dyn GenerationService> = match generation_section.provider {
            ProviderKind::Http => Arc::new(HttpGenerationService::new(
                generation_section,
                config.api_key(),
            )?),
            ProviderKind::Command => Arc::new(CommandGenerationService::new(
                generation_section,
                config.api_key(),
            )),
        };

        let prompter: Arc<dyn UserPrompter> = if config.yes {
            Arc::new(ScriptedPrompter::yes())
        } else {
            Arc::new(ConsolePrompter::new())
        };

        let policy = SandboxPolicy::from_section(&config.toml.sandbox)?;
        let executor: Arc<dyn CommandExecutor> = Arc::new(
            ShellExecutor::new(policy, config.toml.sandbox.command_timeout_secs)
                .with_prompter(prompter.clone()),
        );

        let remediator: Arc<dyn Remediator> = Arc::new(GenerationRemediator::new(
            generation.clone(),
            executor.clone(),
            &config.project_dir,
            generation_section.temperature,
        ));

        Ok(Self {
            generation,
            executor,
            fs: Arc::new(LocalFs::new(&config.project_dir)),
            remediator,
            prompter,
            store: Arc::new(JsonFileStore::new(config.project_file())),
        })
    }
}

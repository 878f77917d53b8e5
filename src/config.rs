use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::engine_config::{BreakerSection, DomainProfile, EngineConfig, LimitsSection};

/// Runtime configuration for the engine.
///
/// This struct bridges the layered `EngineConfig` with what the engine needs
/// at run time: resolved paths, the domain profile, and attempt limits.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub wright_dir: PathBuf,
    pub log_dir: PathBuf,
    pub project_file: PathBuf,
    pub profile: DomainProfile,
    pub limits: LimitsSection,
    pub breaker: BreakerSection,
    pub review_enabled: bool,
    pub temperature: f32,
    pub verbose: bool,
    pub yes: bool,
}

impl Config {
    pub fn from_engine_config(engine: &EngineConfig) -> Result<Self> {
        Ok(Self {
            project_dir: engine.project_dir.clone(),
            wright_dir: engine.wright_dir.clone(),
            log_dir: engine.log_dir(),
            project_file: engine.project_file(),
            profile: engine.profile()?,
            limits: engine.toml.limits.clone(),
            breaker: engine.toml.breaker.clone(),
            review_enabled: engine.toml.review.enabled,
            temperature: engine.toml.generation.temperature,
            verbose: engine.verbose,
            yes: engine.yes,
        })
    }

    /// Default settings rooted at `project_dir`, without reading any file.
    pub fn for_root(project_dir: impl Into<PathBuf>, profile: DomainProfile) -> Self {
        let project_dir = project_dir.into();
        let wright_dir = project_dir.join(".wright");
        Self {
            log_dir: wright_dir.join("logs"),
            project_file: wright_dir.join("project.json"),
            project_dir,
            wright_dir,
            profile,
            limits: LimitsSection::default(),
            breaker: BreakerSection::default(),
            review_enabled: false,
            temperature: 0.2,
            verbose: false,
            yes: false,
        }
    }

    pub fn with_limits(mut self, limits: LimitsSection) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerSection) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_review(mut self, enabled: bool) -> Self {
        self.review_enabled = enabled;
        self
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.wright_dir).context("Failed to create .wright directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }
}

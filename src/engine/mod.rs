//! The orchestration engine.
//!
//! [`Engine`] owns the [`Project`] aggregate and is its only writer. Every
//! mutation is followed by a full snapshot save through the configured
//! [`ProjectStore`](crate::services::ProjectStore).
//!
//! - **controller** - feature selection and the feature lifecycle
//! - **executor** - the per-task retry/remediation loop, run by the DAG
//!   scheduler
//! - **events** - progress stream for the caller
//! - **prompts** - text sent to the generation service

mod controller;
mod events;
mod executor;
mod prompts;

pub use controller::RunOutcome;
pub use events::{EngineEvent, EventSink};

use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::{EngineError, GenerationError};
use crate::project::{FeatureStatus, Project};
use crate::services::{ChatMessage, Collaborators, SubstitutionRun};

pub struct Engine {
    config: Config,
    services: Collaborators,
    project: Project,
    events: EventSink,
    cancel: CancellationToken,
}

/// Await `fut` unless `cancel` fires first.
///
/// `fut` is polled first so a collaborator that watches the token itself
/// can still report what it was doing when cancellation arrived.
async fn interruptible<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, EngineError> {
    tokio::select! {
        biased;
        out = fut => Ok(out),
        _ = cancel.cancelled() => Err(EngineError::Interrupted),
    }
}

impl Engine {
    pub fn new(config: Config, services: Collaborators, cancel: CancellationToken) -> Self {
        let project = Project::new(&config.project_dir, &config.profile.name, "");
        Self {
            config,
            services,
            project,
            events: EventSink::none(),
            cancel,
        }
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<EngineEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load the persisted snapshot. Returns whether one existed.
    pub async fn load(&mut self) -> Result<bool, EngineError> {
        match self
            .services
            .store
            .load()
            .await
            .map_err(EngineError::Persistence)?
        {
            Some(project) => {
                self.project = project;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Start a project at the configured root and run `goal` to completion.
    ///
    /// A new project replaces any snapshot on disk; otherwise the existing
    /// snapshot is loaded (or created when missing) and the goal is added to
    /// it. An empty goal just resumes the existing work.
    pub async fn initialize_project(
        &mut self,
        goal: &str,
        is_new: bool,
    ) -> Result<RunOutcome, EngineError> {
        if is_new || !self.load().await? {
            self.project = Project::new(&self.config.project_dir, &self.config.profile.name, goal);
            tracing::info!(root = %self.config.project_dir.display(), profile = %self.config.profile.name, "initialized project");
        }
        self.project.root = self.config.project_dir.clone();
        self.project.profile = self.config.profile.name.clone();
        self.save().await?;

        if goal.trim().is_empty() {
            self.resume().await
        } else {
            self.handle_new_goal(goal).await
        }
    }

    /// Identify features for `goal`, append them, and run the lifecycle.
    pub async fn handle_new_goal(&mut self, goal: &str) -> Result<RunOutcome, EngineError> {
        let result = async {
            self.prepare_snapshot().await?;
            if self.project.goal.trim().is_empty() {
                self.project.goal = goal.trim().to_string();
            }
            self.identify_features(goal).await?;
            self.run_lifecycle().await
        }
        .await;
        self.finish_run(result).await
    }

    /// Reload the snapshot, roll back interrupted tasks, and continue.
    pub async fn resume(&mut self) -> Result<RunOutcome, EngineError> {
        let result = async {
            self.prepare_snapshot().await?;
            self.run_lifecycle().await
        }
        .await;
        self.finish_run(result).await
    }

    /// Force a non-terminal feature to Cancelled.
    pub async fn cancel_feature(&mut self, feature_id: &str) -> Result<(), EngineError> {
        if self.project.features.is_empty() {
            self.load().await?;
        }
        if self.project.feature(feature_id).is_none() {
            return Err(EngineError::FeatureNotFound(feature_id.to_string()));
        }
        self.set_feature_status(feature_id, FeatureStatus::Cancelled, None)
            .await?;
        if self.project.current_feature_id.as_deref() == Some(feature_id) {
            self.project.current_feature_id = None;
            self.save().await?;
        }
        Ok(())
    }

    /// Make sure the in-memory project reflects the snapshot and holds no
    /// orphaned InProgress tasks.
    async fn prepare_snapshot(&mut self) -> Result<(), EngineError> {
        if self.project.features.is_empty() {
            self.load().await?;
        }
        let rolled = self.project.rollback_interrupted();
        for (feature, task) in &rolled {
            tracing::warn!(feature = %feature, task = %task, "rolled back interrupted task");
        }
        if !rolled.is_empty() {
            self.save().await?;
        }
        Ok(())
    }

    /// Persist a consistent state when a run ends early.
    async fn finish_run(
        &mut self,
        result: Result<RunOutcome, EngineError>,
    ) -> Result<RunOutcome, EngineError> {
        if let Err(err) = &result {
            tracing::debug!(error = %err, "run ended early");
            for (feature, task) in self.project.rollback_interrupted() {
                tracing::warn!(feature = %feature, task = %task, "rolled back interrupted task");
            }
            if matches!(err, EngineError::Interrupted) {
                self.events
                    .error(self.project.current_feature_id.as_deref(), None, "Run interrupted")
                    .await;
            }
            // best effort: the original error matters more than a save failure
            if let Err(save_err) = self.save().await {
                tracing::error!(error = %save_err, "failed to save state after error");
            }
        }
        result
    }

    /// Log sandbox substitutions against a task, resolved by the exit code
    /// of each replacement, and persist.
    async fn record_substitutions(
        &mut self,
        feature_id: &str,
        task_id: &str,
        runs: &[SubstitutionRun],
    ) -> Result<(), EngineError> {
        if runs.is_empty() {
            return Ok(());
        }
        for run in runs {
            let sub = &run.substitution;
            let index = self.project.record_substitution(
                feature_id,
                task_id,
                &sub.original,
                &sub.substitute,
                &sub.reason,
            );
            self.project.resolve_feedback(index, run.exit_code);
        }
        self.save().await
    }

    /// Full-state overwrite of the snapshot.
    async fn save(&mut self) -> Result<(), EngineError> {
        self.project.touch();
        self.services
            .store
            .save(&self.project)
            .await
            .map_err(EngineError::Persistence)
    }

    /// Call the generation service, recovering from credential and network
    /// failures with the user's help.
    ///
    /// Recoveries are bounded by `max_upstream_retries` and never count
    /// against task or plan budgets.
    async fn generate(
        &self,
        system: &str,
        conversation: &[ChatMessage],
    ) -> Result<String, EngineError> {
        let max = self.config.limits.max_upstream_retries;
        let mut recoveries = 0u32;
        loop {
            let call = self
                .services
                .generation
                .invoke(system, conversation, self.config.temperature);
            let error = match interruptible(&self.cancel, call).await? {
                Ok(text) => return Ok(text),
                Err(GenerationError::Other(e)) => return Err(EngineError::Other(e)),
                Err(e) => e,
            };

            recoveries += 1;
            if recoveries > max {
                return Err(EngineError::UpstreamAbandoned {
                    attempts: max,
                    message: error.to_string(),
                });
            }
            tracing::warn!(error = %error, attempt = recoveries, "generation service failed");

            let prompter = self.services.prompter.clone();
            match &error {
                GenerationError::Authentication(_) => {
                    let secret = interruptible(
                        &self.cancel,
                        prompter.ask_text("The API key was rejected. Enter a new key", true),
                    )
                    .await??;
                    let Some(secret) = secret else {
                        return Err(EngineError::Interrupted);
                    };
                    self.services.generation.update_credential(&secret).await?;
                }
                _ => {
                    let retry = interruptible(
                        &self.cancel,
                        prompter.confirm(&format!("{}. Retry?", error), true),
                    )
                    .await??;
                    if !retry {
                        return Err(EngineError::Interrupted);
                    }
                }
            }
        }
    }

    /// Move a feature to `to`, persist, and report the change.
    ///
    /// Terminal transitions append a historical note; failures emit exactly
    /// one user-facing error event.
    async fn set_feature_status(
        &mut self,
        feature_id: &str,
        to: FeatureStatus,
        cause: Option<&str>,
    ) -> Result<(), EngineError> {
        let feature = self
            .project
            .feature_mut(feature_id)
            .ok_or_else(|| EngineError::FeatureNotFound(feature_id.to_string()))?;
        let from = feature.status;
        match cause {
            Some(cause) => feature.fail(to, cause)?,
            None => feature.advance(to)?,
        }
        let name = feature.name.clone();
        tracing::info!(feature = %feature_id, from = %from, to = %to, "feature status changed");

        if to.is_terminal() {
            let note = match cause {
                Some(cause) => format!("{} ended {}: {}", name, to, cause),
                None => format!("{} ended {}", name, to),
            };
            self.project.add_note(feature_id, note);
        }
        self.save().await?;

        self.events
            .emit(EngineEvent::FeatureStatusChanged {
                feature: feature_id.to_string(),
                name: name.clone(),
                from,
                to,
            })
            .await;
        if let Some(cause) = cause {
            self.events
                .error(Some(feature_id), None, format!("Feature {} ({}) failed: {}", feature_id, name, cause))
                .await;
        }
        Ok(())
    }
}

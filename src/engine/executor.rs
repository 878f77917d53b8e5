//! Per-task retry/remediation loop.
//!
//! [`FeatureRun`] is the [`TaskRunner`] the DAG scheduler drives for one
//! feature. Each task is attempted, verified, handed to the remediator on
//! failure and retried within its budget. The circuit breaker is shared by
//! every task in the feature and ends the feature as soon as it trips.

use async_trait::async_trait;

use super::{Engine, EngineEvent, interruptible, prompts};
use crate::artifacts;
use crate::dag::TaskRunner;
use crate::engine_config::BreakerSection;
use crate::errors::{EngineError, ExecError};
use crate::plan::extract_code_block;
use crate::project::{AttemptOutcome, Task, TaskAction, TaskStatus};
use crate::retry::{BoundedRetry, CircuitBreaker, FailureSignature, RetryDecision};
use crate::services::{ChatMessage, RepairRequest, SubstitutionRun};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Action,
    Verification,
}

/// Result of one attempt at a task.
#[derive(Debug)]
enum Attempt {
    Success(String),
    /// The user declined a sensitive command.
    Declined(String),
    Failure {
        stage: Stage,
        command: String,
        payload: String,
    },
}

impl Attempt {
    fn failed(stage: Stage, command: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Failure {
            stage,
            command: command.into(),
            payload: payload.into(),
        }
    }
}

/// Outcome of running one shell command through the sandbox.
enum CommandRun {
    Passed(String),
    Declined(String),
    Failed(String),
}

/// A task with every placeholder in its free-text fields resolved.
struct Resolved {
    target: String,
    requirements: String,
    verification: Option<String>,
}

/// Answers to a bare-identifier PromptUserInput target become placeholders.
fn is_placeholder_name(target: &str) -> bool {
    !target.is_empty()
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !target.contains('/')
}

fn looks_secret(name: &str) -> bool {
    let lower = name.to_lowercase();
    ["key", "secret", "password", "token"]
        .iter()
        .any(|word| lower.contains(word))
}

pub(super) struct FeatureRun<'a> {
    engine: &'a mut Engine,
    feature_id: String,
    breaker: CircuitBreaker,
    tripped: Option<String>,
}

impl<'a> FeatureRun<'a> {
    pub(super) fn new(engine: &'a mut Engine, feature_id: &str, breaker: BreakerSection) -> Self {
        Self {
            engine,
            feature_id: feature_id.to_string(),
            breaker: CircuitBreaker::new(breaker),
            tripped: None,
        }
    }

    /// Why the circuit breaker ended the feature, if it did.
    pub(super) fn into_trip(self) -> Option<String> {
        self.tripped
    }

    fn task(&self, task_id: &str) -> Result<&Task, EngineError> {
        self.engine
            .project
            .feature(&self.feature_id)
            .and_then(|f| f.task(task_id))
            .ok_or_else(|| {
                EngineError::Other(anyhow::anyhow!(
                    "task {} not found in feature {}",
                    task_id,
                    self.feature_id
                ))
            })
    }

    fn task_mut(&mut self, task_id: &str) -> Result<&mut Task, EngineError> {
        let feature_id = self.feature_id.clone();
        self.engine
            .project
            .feature_mut(&feature_id)
            .and_then(|f| f.task_mut(task_id))
            .ok_or_else(|| {
                EngineError::Other(anyhow::anyhow!(
                    "task {} not found in feature {}",
                    task_id,
                    feature_id
                ))
            })
    }

    async fn log_attempt(
        &mut self,
        task_id: &str,
        outcome: AttemptOutcome,
        detail: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.task_mut(task_id)?.log_attempt(outcome, detail);
        self.engine.save().await
    }

    async fn emit_task_status(&self, task_id: &str) -> Result<(), EngineError> {
        let task = self.task(task_id)?;
        let event = EngineEvent::TaskStatusChanged {
            feature: self.feature_id.clone(),
            task: task.id.clone(),
            label: task.label(),
            status: task.status,
        };
        self.engine.events.emit(event).await;
        Ok(())
    }

    fn resolve(&self, task: &Task) -> Resolved {
        let project = &self.engine.project;
        let resolve = |text: &str| {
            artifacts::resolve(text, &project.artifact_registry, &project.placeholders).text
        };
        Resolved {
            target: resolve(&task.target),
            requirements: resolve(&task.requirements),
            verification: task
                .verification_command
                .as_deref()
                .map(resolve)
                .filter(|c| !c.trim().is_empty()),
        }
    }

    /// Run one command in the sandbox, recording any policy substitution.
    async fn run_command(&mut self, task_id: &str, command: &str) -> Result<CommandRun, EngineError> {
        let executor = self.engine.services.executor.clone();
        let cancel = self.engine.cancel.clone();
        let run = interruptible(
            &cancel,
            executor.run(command, &self.engine.config.project_dir, &cancel),
        )
        .await?;

        let (run, substitution) = match run {
            Ok(output) => {
                let substitution = output.substitution.clone().map(|substitution| SubstitutionRun {
                    substitution,
                    exit_code: output.exit_code,
                });
                (Ok(output), substitution)
            }
            Err(err) => {
                let (err, substitution) = err.into_parts();
                let substitution = substitution.map(|substitution| SubstitutionRun {
                    substitution,
                    exit_code: None,
                });
                (Err(err), substitution)
            }
        };
        if let Some(sub) = substitution {
            tracing::info!(task = %task_id, original = %sub.substitution.original, substitute = %sub.substitution.substitute, "command substituted by sandbox policy");
            let feature_id = self.feature_id.clone();
            self.engine
                .record_substitutions(&feature_id, task_id, std::slice::from_ref(&sub))
                .await?;
        }

        let output = match run {
            Ok(output) => output,
            Err(ExecError::UserDeclined { command }) => return Ok(CommandRun::Declined(command)),
            Err(ExecError::Cancelled) => return Err(EngineError::Interrupted),
            Err(e) => return Ok(CommandRun::Failed(e.to_string())),
        };

        if output.success() {
            Ok(CommandRun::Passed(output.stdout.trim().to_string()))
        } else {
            Ok(CommandRun::Failed(output.failure_payload()))
        }
    }

    async fn verify(&mut self, task_id: &str, verification: Option<&str>) -> Result<Attempt, EngineError> {
        let Some(command) = verification else {
            return Ok(Attempt::Success("no verification step".to_string()));
        };
        Ok(match self.run_command(task_id, command).await? {
            CommandRun::Passed(_) => Attempt::Success(format!("verified with `{}`", command)),
            CommandRun::Declined(cmd) => Attempt::Declined(cmd),
            CommandRun::Failed(payload) => Attempt::failed(Stage::Verification, command, payload),
        })
    }

    /// Generate file content for a CreateFile/ModifyFile task.
    async fn generate_content(
        &self,
        task: &Task,
        resolved: &Resolved,
        existing: Option<&str>,
    ) -> Result<Result<String, String>, EngineError> {
        let feature = self
            .engine
            .project
            .feature(&self.feature_id)
            .ok_or_else(|| EngineError::FeatureNotFound(self.feature_id.clone()))?;
        let prompt = prompts::content_prompt(
            feature,
            task,
            &resolved.target,
            &resolved.requirements,
            existing,
        );
        match self
            .engine
            .generate(prompts::CONTENT_SYSTEM, &[ChatMessage::user(prompt)])
            .await
        {
            Ok(reply) => Ok(Ok(extract_code_block(&reply, false)
                .unwrap_or_else(|| reply.trim().to_string()))),
            Err(EngineError::Other(e)) => Ok(Err(format!("content generation failed: {}", e))),
            Err(e) => Err(e),
        }
    }

    /// Perform the task's primary action, then its verification step.
    async fn attempt(&mut self, task: &Task) -> Result<Attempt, EngineError> {
        let resolved = self.resolve(task);
        let target = resolved.target.clone();
        let fs = self.engine.services.fs.clone();

        let action = match task.action {
            TaskAction::CreateDirectory => fs
                .mkdir(&target)
                .await
                .map(|_| format!("created directory {}", target))
                .map_err(|e| e.to_string()),
            TaskAction::DeleteFile => fs
                .delete(&target)
                .await
                .map(|_| format!("deleted {}", target))
                .map_err(|e| e.to_string()),
            TaskAction::CreateFile | TaskAction::ModifyFile => {
                let existing = if task.action == TaskAction::ModifyFile {
                    match fs.read(&target).await {
                        Ok(content) => Some(content),
                        Err(e) => {
                            tracing::debug!(task = %task.id, error = %e, "modifying a file that cannot be read");
                            None
                        }
                    }
                } else {
                    None
                };
                match self.generate_content(task, &resolved, existing.as_deref()).await? {
                    Ok(content) => fs
                        .write(&target, &content)
                        .await
                        .map(|_| format!("wrote {} ({} bytes)", target, content.len()))
                        .map_err(|e| e.to_string()),
                    Err(reason) => Err(reason),
                }
            }
            TaskAction::RunCommand => match self.run_command(&task.id, &target).await? {
                CommandRun::Passed(out) => Ok(out),
                CommandRun::Declined(cmd) => return Ok(Attempt::Declined(cmd)),
                CommandRun::Failed(payload) => Err(payload),
            },
            TaskAction::PromptUserInput => self.ask_user(task, &target).await?,
        };

        match action {
            Ok(detail) => {
                tracing::debug!(task = %task.id, detail = %detail, "action succeeded");
                match self.verify(&task.id, resolved.verification.as_deref()).await? {
                    Attempt::Success(verified) => Ok(Attempt::Success(format!("{}; {}", detail, verified))),
                    other => Ok(other),
                }
            }
            Err(payload) => Ok(Attempt::failed(Stage::Action, target, payload)),
        }
    }

    async fn ask_user(&mut self, task: &Task, target: &str) -> Result<Result<String, String>, EngineError> {
        let prompter = self.engine.services.prompter.clone();
        let cancel = self.engine.cancel.clone();

        if is_placeholder_name(target) {
            let question = if task.description.trim().is_empty() {
                format!("Enter a value for {}", target)
            } else {
                task.description.trim().to_string()
            };
            let answer = interruptible(&cancel, prompter.ask_text(&question, looks_secret(target))).await??;
            return Ok(match answer {
                Some(value) => {
                    self.engine
                        .project
                        .placeholders
                        .insert(target.to_string(), value);
                    self.engine.save().await?;
                    Ok(format!("received value for {}", target))
                }
                None => Err(format!("no value supplied for {}", target)),
            });
        }

        let done = interruptible(&cancel, prompter.manual_step(target)).await??;
        Ok(if done {
            Ok("manual step confirmed".to_string())
        } else {
            Err(format!("manual step not completed: {}", target))
        })
    }

    /// Ask the remediator to fix a failure. Errors count as a failed repair.
    async fn remediate(&mut self, task: &Task, command: &str, errors: &[String]) -> Result<bool, EngineError> {
        let request = RepairRequest {
            feature_id: self.feature_id.clone(),
            task: task.clone(),
            failing_command: command.to_string(),
            error_records: errors.to_vec(),
            project_context: self.engine.project.planning_context(),
        };
        let remediator = self.engine.services.remediator.clone();
        let cancel = self.engine.cancel.clone();
        let repaired = match interruptible(&cancel, remediator.repair(&request, &cancel)).await? {
            Ok(report) => {
                let feature_id = self.feature_id.clone();
                self.engine
                    .record_substitutions(&feature_id, &task.id, &report.substitutions)
                    .await?;
                report.repaired
            }
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "remediation errored");
                false
            }
        };
        if cancel.is_cancelled() {
            return Err(EngineError::Interrupted);
        }
        Ok(repaired)
    }

    async fn finish(&mut self, task_id: &str, status: TaskStatus) -> Result<TaskStatus, EngineError> {
        self.task_mut(task_id)?.advance(status)?;
        if status == TaskStatus::Completed {
            let task = self.task(task_id)?.clone();
            let location = self.resolve(&task).target;
            let feature_id = self.feature_id.clone();
            if let Some(name) = self
                .engine
                .project
                .artifact_registry
                .register_task(&feature_id, &task, &location)
            {
                tracing::info!(task = %task_id, artifact = %name, location = %location, "artifact registered");
            }
            self.breaker.reset();
        }
        self.engine.save().await?;
        tracing::info!(feature = %self.feature_id, task = %task_id, status = %status, "task finished");
        self.emit_task_status(task_id).await?;

        let percent = self
            .engine
            .project
            .feature(&self.feature_id)
            .map(|f| f.completion_percentage());
        self.engine
            .events
            .status(format!("Task {} {}", task_id, status), percent)
            .await;
        Ok(status)
    }
}

#[async_trait]
impl TaskRunner for FeatureRun<'_> {
    fn tasks(&self) -> &[Task] {
        self.engine
            .project
            .feature(&self.feature_id)
            .map(|f| f.tasks.as_slice())
            .unwrap_or(&[])
    }

    async fn promote(&mut self, task_id: &str) -> Result<(), EngineError> {
        self.task_mut(task_id)?.advance(TaskStatus::Pending)?;
        self.engine.save().await?;
        self.emit_task_status(task_id).await
    }

    async fn execute(&mut self, task_id: &str) -> Result<TaskStatus, EngineError> {
        self.task_mut(task_id)?.advance(TaskStatus::InProgress)?;
        self.engine.save().await?;
        self.emit_task_status(task_id).await?;

        let cap = self.engine.config.limits.max_task_retries;
        let mut budget = BoundedRetry::resume(cap, self.task(task_id)?.retry_count);
        let mut errors = Vec::new();

        loop {
            if self.engine.cancel.is_cancelled() {
                return Err(EngineError::Interrupted);
            }
            let task = self.task(task_id)?.clone();
            tracing::info!(feature = %self.feature_id, task = %task.label(), "attempting task");

            let (stage, command, payload) = match self.attempt(&task).await? {
                Attempt::Success(detail) => {
                    self.log_attempt(task_id, AttemptOutcome::Succeeded, detail).await?;
                    return self.finish(task_id, TaskStatus::Completed).await;
                }
                Attempt::Declined(command) => {
                    tracing::warn!(task = %task_id, command = %command, "user declined command; skipping task");
                    self.log_attempt(task_id, AttemptOutcome::Declined, format!("declined: {}", command))
                        .await?;
                    return self.finish(task_id, TaskStatus::Skipped).await;
                }
                Attempt::Failure {
                    stage,
                    command,
                    payload,
                } => (stage, command, payload),
            };

            let outcome = match stage {
                Stage::Action => AttemptOutcome::ActionFailed,
                Stage::Verification => AttemptOutcome::VerificationFailed,
            };
            tracing::warn!(task = %task_id, stage = ?stage, "attempt failed");
            self.log_attempt(task_id, outcome, payload.clone()).await?;
            errors.push(payload.clone());

            let verdict = self
                .breaker
                .record(FailureSignature::new(task.action, &task.target, &payload));
            if verdict.is_tripped() {
                let reason = verdict.describe();
                tracing::error!(feature = %self.feature_id, task = %task_id, reason = %reason, "circuit breaker tripped");
                self.tripped = Some(reason);
                return self.finish(task_id, TaskStatus::Failed).await;
            }

            if self.remediate(&task, &command, &errors).await? {
                let verification = self.resolve(&task).verification;
                match self.verify(task_id, verification.as_deref()).await? {
                    Attempt::Success(detail) => {
                        self.log_attempt(task_id, AttemptOutcome::RemediationConfirmed, detail)
                            .await?;
                        return self.finish(task_id, TaskStatus::Completed).await;
                    }
                    Attempt::Declined(command) => {
                        self.log_attempt(task_id, AttemptOutcome::Declined, format!("declined: {}", command))
                            .await?;
                        return self.finish(task_id, TaskStatus::Skipped).await;
                    }
                    Attempt::Failure { payload, .. } => {
                        self.log_attempt(task_id, AttemptOutcome::RemediationFailed, payload.clone())
                            .await?;
                        errors.push(payload);
                    }
                }
            } else {
                self.log_attempt(task_id, AttemptOutcome::RemediationFailed, payload)
                    .await?;
            }

            let decision = budget.register_failure();
            self.task_mut(task_id)?.retry_count = budget.failures();
            self.engine.save().await?;

            match decision {
                RetryDecision::Exhausted { failures } => {
                    tracing::error!(task = %task_id, failures, "task retries exhausted");
                    return self.finish(task_id, TaskStatus::Failed).await;
                }
                RetryDecision::Retry { attempt } => {
                    let prompter = self.engine.services.prompter.clone();
                    let question = format!(
                        "Task {} is still failing. Retry the repair cycle (attempt {} of {})?",
                        task.label(),
                        attempt,
                        cap
                    );
                    let retry = interruptible(&self.engine.cancel, prompter.confirm(&question, true))
                        .await?
                        .unwrap_or(false);
                    if !retry {
                        tracing::warn!(task = %task_id, "user declined retry");
                        return self.finish(task_id, TaskStatus::Failed).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_names() {
        assert!(is_placeholder_name("DATABASE_URL"));
        assert!(is_placeholder_name("stripe.key"));
        assert!(!is_placeholder_name("Create an OAuth app and paste its id"));
        assert!(!is_placeholder_name("config/secrets.env"));
        assert!(!is_placeholder_name(""));
    }

    #[test]
    fn test_secret_detection() {
        assert!(looks_secret("STRIPE_API_KEY"));
        assert!(looks_secret("admin_password"));
        assert!(!looks_secret("site_name"));
    }
}

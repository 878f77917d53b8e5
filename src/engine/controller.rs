//! Feature lifecycle controller.
//!
//! ```text
//! Identified -> Planned -> Implementing -> TasksImplemented
//!     -> [GeneratingTests] -> Testing <-> TestingFailed -> Reviewing -> Merged
//! ```
//!
//! Planning exhaustion, scheduler stalls, breaker trips, failed tasks and
//! exhausted test repairs end the feature in a failure status and halt the
//! whole run. Any non-terminal feature may be forced to Cancelled.

use super::executor::FeatureRun;
use super::prompts;
use super::{Engine, interruptible};
use crate::dag::{DagScheduler, ScheduleOutcome};
use crate::errors::{EngineError, ExecError};
use crate::plan::{FeatureSpec, extract_code_block, into_features, parse_features, parse_plan};
use crate::project::{FeatureStatus, Task, TaskAction};
use crate::retry::{BoundedRetry, RetryDecision};
use crate::services::{ChatMessage, RepairRequest, SubstitutionRun};

/// Task id used for feature-level test runs in logs and feedback entries.
const TESTS_TASK_ID: &str = "tests";

/// How a run of the lifecycle controller ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No feature is left to work on.
    Finished { merged: usize },
    /// A feature failed; nothing further was selected.
    Halted {
        feature: String,
        status: FeatureStatus,
        cause: String,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// First line of a cause, capped for user-facing messages.
fn short_cause(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() > 160 {
        format!("{}...", line.chars().take(157).collect::<String>())
    } else {
        line.to_string()
    }
}

impl Engine {
    pub(super) async fn identify_features(&mut self, goal: &str) -> Result<(), EngineError> {
        self.events.status("Identifying features", None).await;
        let prompt = prompts::features_prompt(goal, &self.project);
        let specs = match self
            .generate(prompts::FEATURES_SYSTEM, &[ChatMessage::user(prompt)])
            .await
        {
            Ok(reply) => parse_features(&reply),
            Err(EngineError::Other(e)) => {
                tracing::warn!(error = %e, "feature identification failed; using the goal as one feature");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let specs = if specs.is_empty() {
            vec![FeatureSpec::fallback(goal)]
        } else {
            specs
        };

        let features = into_features(specs, &self.project);
        for feature in &features {
            tracing::info!(feature = %feature.id, name = %feature.name, deps = ?feature.dependencies, "feature identified");
        }
        self.events
            .status(format!("Identified {} feature(s)", features.len()), None)
            .await;
        self.project.features.extend(features);
        self.save().await
    }

    /// The feature to work on next, if any.
    ///
    /// Continues the current feature when it is non-terminal; otherwise the
    /// first feature in declared order whose dependencies are all merged.
    pub(super) fn select_next_feature(&self) -> Option<String> {
        if let Some(current) = self
            .project
            .current_feature_id
            .as_deref()
            .and_then(|id| self.project.feature(id))
            && !current.status.is_terminal()
        {
            return Some(current.id.clone());
        }

        self.project
            .features
            .iter()
            .filter(|f| !f.status.is_terminal())
            .find(|f| {
                f.dependencies.iter().all(|dep| {
                    self.project
                        .feature(dep)
                        .is_some_and(|d| d.status == FeatureStatus::Merged)
                })
            })
            .map(|f| f.id.clone())
    }

    /// Non-terminal features that selection will never reach, such as
    /// features that depend on each other or on a missing feature.
    pub(super) fn unselectable_features(&self) -> Vec<String> {
        self.project
            .features
            .iter()
            .filter(|f| !f.status.is_terminal())
            .map(|f| f.id.clone())
            .collect()
    }

    pub(super) async fn run_lifecycle(&mut self) -> Result<RunOutcome, EngineError> {
        loop {
            if let Some(failed) = self.project.has_failed_feature() {
                let outcome = RunOutcome::Halted {
                    feature: failed.id.clone(),
                    status: failed.status,
                    cause: failed.failure.clone().unwrap_or_default(),
                };
                tracing::warn!(feature = %failed.id, status = %failed.status, "halting: a feature has failed");
                return Ok(outcome);
            }

            let Some(feature_id) = self.select_next_feature() else {
                let blocked = self.unselectable_features();
                if !blocked.is_empty() {
                    tracing::warn!(features = ?blocked, "features left unfinished: their dependencies can never be merged");
                    self.events
                        .status(
                            format!(
                                "{} feature(s) blocked on dependencies that can never be merged: {}",
                                blocked.len(),
                                blocked.join(", ")
                            ),
                            None,
                        )
                        .await;
                }
                let merged = self.project.count_features(FeatureStatus::Merged);
                self.events
                    .status(format!("All work done ({} feature(s) merged)", merged), Some(100.0))
                    .await;
                return Ok(RunOutcome::Finished { merged });
            };

            if self.project.current_feature_id.as_deref() != Some(feature_id.as_str()) {
                self.project.current_feature_id = Some(feature_id.clone());
                self.save().await?;
            }
            self.drive_feature(&feature_id).await?;
        }
    }

    /// Advance one feature until it reaches a terminal status.
    async fn drive_feature(&mut self, feature_id: &str) -> Result<(), EngineError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Interrupted);
            }
            let status = self
                .project
                .feature(feature_id)
                .map(|f| f.status)
                .ok_or_else(|| EngineError::FeatureNotFound(feature_id.to_string()))?;

            match status {
                FeatureStatus::Identified => self.plan_feature(feature_id).await?,
                FeatureStatus::Planned => {
                    self.set_feature_status(feature_id, FeatureStatus::Implementing, None)
                        .await?
                }
                FeatureStatus::Implementing => self.implement_feature(feature_id).await?,
                FeatureStatus::TasksImplemented | FeatureStatus::GeneratingTests => {
                    self.prepare_tests(feature_id).await?
                }
                FeatureStatus::TestingFailed => {
                    self.set_feature_status(feature_id, FeatureStatus::Testing, None)
                        .await?
                }
                FeatureStatus::Testing => self.run_tests(feature_id).await?,
                FeatureStatus::Reviewing => self.review_feature(feature_id).await?,
                terminal => {
                    tracing::debug!(feature = %feature_id, status = %terminal, "feature finished");
                    return Ok(());
                }
            }
        }
    }

    /// Request plans until one parses, feeding each rejection back.
    async fn plan_feature(&mut self, feature_id: &str) -> Result<(), EngineError> {
        let (prompt, name, rejected) = {
            let feature = self
                .project
                .feature(feature_id)
                .ok_or_else(|| EngineError::FeatureNotFound(feature_id.to_string()))?;
            (
                prompts::plan_prompt(feature, &self.project),
                feature.name.clone(),
                feature.plan_attempts,
            )
        };
        self.events.status(format!("Planning {}", name), None).await;

        let mut budget = BoundedRetry::resume(self.config.limits.max_plan_attempts, rejected);
        let mut conversation = vec![ChatMessage::user(prompt)];

        loop {
            if budget.is_exhausted() {
                let cause = format!("no valid plan after {} attempts", budget.failures());
                return self
                    .set_feature_status(feature_id, FeatureStatus::PlanningFailed, Some(&cause))
                    .await;
            }

            let reason = match self.generate(prompts::PLAN_SYSTEM, &conversation).await {
                Ok(reply) => {
                    let parsed = parse_plan(&reply, &self.config.profile);
                    if let Some(feature) = self.project.feature_mut(feature_id) {
                        feature.plan_text = Some(reply.clone());
                    }
                    match parsed {
                        Ok(tasks) => {
                            tracing::info!(feature = %feature_id, tasks = tasks.len(), "plan accepted");
                            if let Some(feature) = self.project.feature_mut(feature_id) {
                                feature.tasks = tasks;
                            }
                            return self
                                .set_feature_status(feature_id, FeatureStatus::Planned, None)
                                .await;
                        }
                        Err(e) => {
                            conversation.push(ChatMessage::assistant(reply));
                            conversation.push(ChatMessage::user(prompts::plan_rejected(&e.to_string())));
                            e.to_string()
                        }
                    }
                }
                Err(EngineError::Other(e)) => format!("generation failed: {}", e),
                Err(e) => return Err(e),
            };

            tracing::warn!(feature = %feature_id, reason = %reason, "plan rejected");
            budget.register_failure();
            if let Some(feature) = self.project.feature_mut(feature_id) {
                feature.plan_attempts = budget.failures();
            }
            self.save().await?;
        }
    }

    async fn implement_feature(&mut self, feature_id: &str) -> Result<(), EngineError> {
        let profile = self.config.profile.clone();
        let breaker_settings = self.config.breaker.clone();
        let (outcome, tripped) = {
            let mut run = FeatureRun::new(self, feature_id, breaker_settings);
            let mut scheduler = DagScheduler::new(&profile);
            let outcome = scheduler.run_to_completion(&mut run).await?;
            (outcome, run.into_trip())
        };

        match outcome {
            ScheduleOutcome::Completed { passes } => {
                tracing::info!(feature = %feature_id, passes, "all tasks implemented");
                self.set_feature_status(feature_id, FeatureStatus::TasksImplemented, None)
                    .await
            }
            ScheduleOutcome::TaskFailed { task_id, .. } => {
                let cause = match tripped {
                    Some(trip) => format!("task {} aborted: {}", task_id, trip),
                    None => {
                        let last = self
                            .project
                            .feature(feature_id)
                            .and_then(|f| f.task(&task_id))
                            .and_then(|t| t.last_result.clone())
                            .unwrap_or_default();
                        format!("task {} failed: {}", task_id, short_cause(&last))
                    }
                };
                self.set_feature_status(
                    feature_id,
                    FeatureStatus::ImplementationFailed,
                    Some(&cause),
                )
                .await
            }
            ScheduleOutcome::Stalled(report) => {
                self.set_feature_status(
                    feature_id,
                    FeatureStatus::ImplementationFailed,
                    Some(&report.to_string()),
                )
                .await
            }
        }
    }

    /// Write the generated test file, or go straight to Testing when the
    /// profile has no test command.
    async fn prepare_tests(&mut self, feature_id: &str) -> Result<(), EngineError> {
        let profile = &self.config.profile;
        let (feature_name, status) = self
            .project
            .feature(feature_id)
            .map(|f| (f.name.clone(), f.status))
            .ok_or_else(|| EngineError::FeatureNotFound(feature_id.to_string()))?;

        let (Some(test_command), Some(test_file)) =
            (profile.test_command.clone(), profile.test_file_for(&feature_name))
        else {
            return self
                .set_feature_status(feature_id, FeatureStatus::Testing, None)
                .await;
        };

        if status == FeatureStatus::TasksImplemented {
            self.set_feature_status(feature_id, FeatureStatus::GeneratingTests, None)
                .await?;
        }
        self.events
            .status(format!("Generating tests for {}", feature_name), None)
            .await;

        let prompt = match self.project.feature(feature_id) {
            Some(feature) => prompts::tests_prompt(feature, &test_file, &test_command),
            None => return Err(EngineError::FeatureNotFound(feature_id.to_string())),
        };
        let written = match self
            .generate(prompts::TESTS_SYSTEM, &[ChatMessage::user(prompt)])
            .await
        {
            Ok(reply) => match extract_code_block(&reply, false) {
                Some(code) => self
                    .services
                    .fs
                    .write(&test_file, &code)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("test generation returned no code".to_string()),
            },
            Err(EngineError::Other(e)) => Err(e.to_string()),
            Err(e) => return Err(e),
        };

        match written {
            Ok(()) => {
                tracing::info!(feature = %feature_id, file = %test_file, "test file written");
                self.set_feature_status(feature_id, FeatureStatus::Testing, None)
                    .await
            }
            Err(cause) => {
                self.set_feature_status(
                    feature_id,
                    FeatureStatus::ImplementationFailed,
                    Some(&cause),
                )
                .await
            }
        }
    }

    /// Run the test command; on failure remediate and cycle through
    /// TestingFailed until the attempt cap is reached.
    async fn run_tests(&mut self, feature_id: &str) -> Result<(), EngineError> {
        let Some(test_command) = self.config.profile.test_command.clone() else {
            return self
                .set_feature_status(feature_id, FeatureStatus::Reviewing, None)
                .await;
        };
        let failures = self
            .project
            .feature(feature_id)
            .map(|f| f.test_attempts)
            .unwrap_or_default();

        self.events
            .status(format!("Running tests: {}", test_command), None)
            .await;
        let executor = self.services.executor.clone();
        let run = interruptible(
            &self.cancel,
            executor.run(&test_command, &self.config.project_dir, &self.cancel),
        )
        .await?;
        let substitution = match &run {
            Ok(output) => output.substitution.clone().map(|substitution| SubstitutionRun {
                substitution,
                exit_code: output.exit_code,
            }),
            Err(ExecError::Substituted { substitution, .. }) => Some(SubstitutionRun {
                substitution: substitution.clone(),
                exit_code: None,
            }),
            Err(_) => None,
        };
        if let Some(sub) = substitution {
            self.record_substitutions(feature_id, TESTS_TASK_ID, std::slice::from_ref(&sub))
                .await?;
        }
        let payload = match run.map_err(|e| e.into_parts().0) {
            Ok(output) if output.success() => {
                return self
                    .set_feature_status(feature_id, FeatureStatus::Reviewing, None)
                    .await;
            }
            Ok(output) => output.failure_payload(),
            Err(ExecError::Cancelled) => return Err(EngineError::Interrupted),
            Err(e) => e.to_string(),
        };
        tracing::warn!(feature = %feature_id, "feature tests failed");

        let mut budget = BoundedRetry::resume(self.config.limits.max_test_attempts, failures);
        let decision = budget.register_failure();
        if let Some(feature) = self.project.feature_mut(feature_id) {
            feature.test_attempts = budget.failures();
        }
        if let RetryDecision::Exhausted { failures } = decision {
            let cause = format!("tests still failing after {} attempts: {}", failures, short_cause(&payload));
            return self
                .set_feature_status(feature_id, FeatureStatus::ImplementationFailed, Some(&cause))
                .await;
        }
        self.set_feature_status(feature_id, FeatureStatus::TestingFailed, None)
            .await?;

        let request = RepairRequest {
            feature_id: feature_id.to_string(),
            task: Task::new(TESTS_TASK_ID, TaskAction::RunCommand, &test_command)
                .with_verification(&test_command),
            failing_command: test_command.clone(),
            error_records: vec![payload],
            project_context: self.project.planning_context(),
        };
        let remediator = self.services.remediator.clone();
        match interruptible(&self.cancel, remediator.repair(&request, &self.cancel)).await? {
            Ok(report) => {
                tracing::info!(feature = %feature_id, repaired = report.repaired, "test remediation finished");
                self.record_substitutions(feature_id, TESTS_TASK_ID, &report.substitutions)
                    .await?;
            }
            Err(e) => tracing::warn!(feature = %feature_id, error = %e, "test remediation errored"),
        }
        if self.cancel.is_cancelled() {
            return Err(EngineError::Interrupted);
        }
        self.set_feature_status(feature_id, FeatureStatus::Testing, None)
            .await
    }

    async fn review_feature(&mut self, feature_id: &str) -> Result<(), EngineError> {
        if !self.config.review_enabled {
            return self
                .set_feature_status(feature_id, FeatureStatus::Merged, None)
                .await;
        }

        let prompt = match self.project.feature(feature_id) {
            Some(feature) => prompts::review_prompt(feature),
            None => return Err(EngineError::FeatureNotFound(feature_id.to_string())),
        };
        let verdict = match self
            .generate(prompts::REVIEW_SYSTEM, &[ChatMessage::user(prompt)])
            .await
        {
            Ok(reply) => reply,
            Err(EngineError::Other(e)) => format!("REJECTED review failed: {}", e),
            Err(e) => return Err(e),
        };

        let upper = verdict.to_uppercase();
        if upper.contains("APPROVED") && !upper.contains("REJECTED") {
            self.set_feature_status(feature_id, FeatureStatus::Merged, None)
                .await
        } else {
            let reason = verdict
                .lines()
                .skip_while(|l| l.trim().is_empty() || l.to_uppercase().contains("REJECTED"))
                .find(|l| !l.trim().is_empty())
                .map(short_cause)
                .unwrap_or_else(|| "no reason given".to_string());
            let cause = format!("review rejected: {}", reason);
            self.set_feature_status(feature_id, FeatureStatus::ImplementationFailed, Some(&cause))
                .await
        }
    }
}

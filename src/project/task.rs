//! Task records and their forward-only lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::TransitionError;

/// The primitive a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    CreateFile,
    ModifyFile,
    DeleteFile,
    CreateDirectory,
    RunCommand,
    PromptUserInput,
}

impl TaskAction {
    /// Parse an action name as written by the planner.
    ///
    /// Case, spaces, dashes and underscores are ignored, so `Create File`,
    /// `create_file` and `CreateFile` all map to the same variant.
    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "createfile" | "newfile" | "writefile" => Some(Self::CreateFile),
            "modifyfile" | "editfile" | "updatefile" => Some(Self::ModifyFile),
            "deletefile" | "removefile" => Some(Self::DeleteFile),
            "createdirectory" | "createdir" | "mkdir" | "makedirectory" => {
                Some(Self::CreateDirectory)
            }
            "runcommand" | "command" | "run" | "shell" => Some(Self::RunCommand),
            "promptuserinput" | "userinput" | "promptuser" | "askuser" => {
                Some(Self::PromptUserInput)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateFile => "CreateFile",
            Self::ModifyFile => "ModifyFile",
            Self::DeleteFile => "DeleteFile",
            Self::CreateDirectory => "CreateDirectory",
            Self::RunCommand => "RunCommand",
            Self::PromptUserInput => "PromptUserInput",
        }
    }

    /// Whether the action writes file content produced by the generation service.
    pub fn writes_content(&self) -> bool {
        matches!(self, Self::CreateFile | Self::ModifyFile)
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a task.
///
/// Statuses only move forward along
/// `Waiting -> Pending -> InProgress -> {Completed | Failed | Skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Dependencies not yet satisfied.
    #[default]
    Waiting,
    /// Eligible to run.
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Intentionally not executed (e.g. the user declined a sensitive command).
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Terminal and satisfies dependents.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate that a task status transition moves forward.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    matches!(
        (from, to),
        (TaskStatus::Waiting, TaskStatus::Pending)
            | (TaskStatus::Pending, TaskStatus::InProgress)
            | (TaskStatus::InProgress, TaskStatus::Completed)
            | (TaskStatus::InProgress, TaskStatus::Failed)
            | (TaskStatus::InProgress, TaskStatus::Skipped)
    )
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Action and verification both passed.
    Succeeded,
    ActionFailed,
    VerificationFailed,
    /// Remediation claimed success and the re-run verification confirmed it.
    RemediationConfirmed,
    /// Remediation failed, errored, or its success was not confirmed.
    RemediationFailed,
    /// The user declined a sensitive command.
    Declined,
    /// Cancellation was observed mid-attempt.
    Interrupted,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::RemediationConfirmed)
    }
}

/// Immutable record of one attempt, appended to the task's execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    /// Short summary, or the raw failure payload for failed attempts.
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(attempt: u32, outcome: AttemptOutcome, detail: impl Into<String>) -> Self {
        Self {
            attempt,
            outcome,
            detail: detail.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// One atomic unit of work inside a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Hierarchical id, unique within its feature (e.g. "1.2").
    pub id: String,
    pub action: TaskAction,
    /// Path for file actions, command line for `RunCommand`,
    /// placeholder name or instruction for `PromptUserInput`.
    pub target: String,
    #[serde(default)]
    pub description: String,
    /// Free-text requirements handed to the generation service for file content.
    #[serde(default)]
    pub requirements: String,
    /// Ids of sibling tasks that must be done first, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub verification_command: Option<String>,
    /// Symbolic name this task introduces into the artifact registry.
    #[serde(default)]
    pub defines: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_result: Option<String>,
    #[serde(default)]
    pub execution_log: Vec<AttemptRecord>,
}

impl Task {
    pub fn new(id: &str, action: TaskAction, target: &str) -> Self {
        Self {
            id: id.to_string(),
            action,
            target: target.to_string(),
            description: String::new(),
            requirements: String::new(),
            dependencies: Vec::new(),
            verification_command: None,
            defines: None,
            status: TaskStatus::Waiting,
            retry_count: 0,
            last_result: None,
            execution_log: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_requirements(mut self, requirements: &str) -> Self {
        self.requirements = requirements.to_string();
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_verification(mut self, command: &str) -> Self {
        self.verification_command = Some(command.to_string());
        self
    }

    pub fn with_defines(mut self, name: &str) -> Self {
        self.defines = Some(name.to_string());
        self
    }

    /// Move the task to a new status, refusing any backwards step.
    pub fn advance(&mut self, to: TaskStatus) -> Result<(), TransitionError> {
        if !is_valid_transition(self.status, to) {
            return Err(TransitionError {
                entity: "task",
                id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Roll an interrupted `InProgress` task back to `Pending`.
    ///
    /// This is the only backwards move a task may make; it never touches a
    /// terminal task. Returns whether a rollback happened.
    pub fn rollback_interrupted(&mut self) -> bool {
        if self.status != TaskStatus::InProgress {
            return false;
        }
        let attempt = self.next_attempt_number();
        self.execution_log.push(AttemptRecord::new(
            attempt,
            AttemptOutcome::Interrupted,
            "attempt interrupted before completion",
        ));
        self.status = TaskStatus::Pending;
        true
    }

    /// Append an attempt record and remember its payload as the last result.
    pub fn log_attempt(&mut self, outcome: AttemptOutcome, detail: impl Into<String>) {
        let detail = detail.into();
        let attempt = self.next_attempt_number();
        self.last_result = Some(detail.clone());
        self.execution_log
            .push(AttemptRecord::new(attempt, outcome, detail));
    }

    pub fn next_attempt_number(&self) -> u32 {
        self.execution_log.len() as u32 + 1
    }

    /// Whether every dependency is in `done`.
    pub fn dependencies_met(&self, mut done: impl FnMut(&str) -> bool) -> bool {
        self.dependencies.iter().all(|d| done(d))
    }

    /// Short human label used in logs and user-facing messages.
    pub fn label(&self) -> String {
        format!("{} {} {}", self.id, self.action, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse_is_tolerant() {
        assert_eq!(TaskAction::parse("CreateFile"), Some(TaskAction::CreateFile));
        assert_eq!(TaskAction::parse("create_file"), Some(TaskAction::CreateFile));
        assert_eq!(TaskAction::parse("Create File"), Some(TaskAction::CreateFile));
        assert_eq!(
            TaskAction::parse("create-directory"),
            Some(TaskAction::CreateDirectory)
        );
        assert_eq!(TaskAction::parse("RUN COMMAND"), Some(TaskAction::RunCommand));
        assert_eq!(
            TaskAction::parse("Prompt User Input"),
            Some(TaskAction::PromptUserInput)
        );
        assert_eq!(TaskAction::parse("DeployToMars"), None);
    }

    #[test]
    fn test_forward_transitions() {
        let mut task = Task::new("1", TaskAction::RunCommand, "ls");
        task.advance(TaskStatus::Pending).unwrap();
        task.advance(TaskStatus::InProgress).unwrap();
        task.advance(TaskStatus::Completed).unwrap();
        assert!(task.status.is_terminal());
        assert!(task.status.is_done());
    }

    #[test]
    fn test_terminal_status_never_moves() {
        let mut task = Task::new("1", TaskAction::RunCommand, "ls");
        task.advance(TaskStatus::Pending).unwrap();
        task.advance(TaskStatus::InProgress).unwrap();
        task.advance(TaskStatus::Failed).unwrap();

        for to in [
            TaskStatus::Waiting,
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert!(task.advance(to).is_err());
        }
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(!task.rollback_interrupted());
    }

    #[test]
    fn test_cannot_skip_pending() {
        let mut task = Task::new("1", TaskAction::RunCommand, "ls");
        let err = task.advance(TaskStatus::InProgress).unwrap_err();
        assert_eq!(err.from, "waiting");
        assert_eq!(err.to, "in_progress");
    }

    #[test]
    fn test_rollback_interrupted_logs_attempt() {
        let mut task = Task::new("1", TaskAction::RunCommand, "ls");
        task.advance(TaskStatus::Pending).unwrap();
        task.advance(TaskStatus::InProgress).unwrap();

        assert!(task.rollback_interrupted());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.execution_log.len(), 1);
        assert_eq!(task.execution_log[0].outcome, AttemptOutcome::Interrupted);
    }

    #[test]
    fn test_log_attempt_numbers_sequentially() {
        let mut task = Task::new("1", TaskAction::RunCommand, "ls");
        task.log_attempt(AttemptOutcome::ActionFailed, "exit 1");
        task.log_attempt(AttemptOutcome::Succeeded, "ok");
        assert_eq!(task.execution_log[0].attempt, 1);
        assert_eq!(task.execution_log[1].attempt, 2);
        assert_eq!(task.last_result.as_deref(), Some("ok"));
    }

    #[test]
    fn test_dependencies_met() {
        let task = Task::new("2", TaskAction::CreateFile, "a.py")
            .with_dependencies(vec!["1".into()]);
        assert!(!task.dependencies_met(|_| false));
        assert!(task.dependencies_met(|id| id == "1"));
    }
}

//! Feature records and the feature status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::task::{Task, TaskStatus};
use crate::errors::TransitionError;

/// Lifecycle status of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    #[default]
    Identified,
    Planned,
    PlanningFailed,
    Implementing,
    TasksImplemented,
    GeneratingTests,
    Testing,
    TestingFailed,
    Reviewing,
    Merged,
    ImplementationFailed,
    Cancelled,
}

impl FeatureStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Merged | Self::PlanningFailed | Self::ImplementationFailed | Self::Cancelled
        )
    }

    /// Terminal failure states that halt selection of any further feature.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::PlanningFailed | Self::ImplementationFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identified => "identified",
            Self::Planned => "planned",
            Self::PlanningFailed => "planning_failed",
            Self::Implementing => "implementing",
            Self::TasksImplemented => "tasks_implemented",
            Self::GeneratingTests => "generating_tests",
            Self::Testing => "testing",
            Self::TestingFailed => "testing_failed",
            Self::Reviewing => "reviewing",
            Self::Merged => "merged",
            Self::ImplementationFailed => "implementation_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a feature status transition.
///
/// Statuses are monotonic except `Testing <-> TestingFailed`; every
/// non-terminal status may be forced to `Cancelled`.
pub fn is_valid_transition(from: FeatureStatus, to: FeatureStatus) -> bool {
    use FeatureStatus as S;
    if to == S::Cancelled {
        return !from.is_terminal();
    }
    matches!(
        (from, to),
        (S::Identified, S::Planned)
            | (S::Identified, S::PlanningFailed)
            | (S::Planned, S::Implementing)
            | (S::Implementing, S::TasksImplemented)
            | (S::Implementing, S::ImplementationFailed)
            | (S::TasksImplemented, S::GeneratingTests)
            | (S::TasksImplemented, S::Testing)
            | (S::GeneratingTests, S::Testing)
            | (S::GeneratingTests, S::ImplementationFailed)
            | (S::Testing, S::TestingFailed)
            | (S::Testing, S::Reviewing)
            | (S::Testing, S::ImplementationFailed)
            | (S::TestingFailed, S::Testing)
            | (S::TestingFailed, S::ImplementationFailed)
            | (S::Reviewing, S::Merged)
            | (S::Reviewing, S::ImplementationFailed)
    )
}

/// A coherent unit of requested functionality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: FeatureStatus,
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Raw plan text as received, kept for audit.
    #[serde(default)]
    pub plan_text: Option<String>,
    /// Feature ids that must be merged before this one starts.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub plan_attempts: u32,
    #[serde(default)]
    pub test_attempts: u32,
    /// Short cause of the terminal failure, if any.
    #[serde(default)]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Feature {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            status: FeatureStatus::Identified,
            tasks: Vec::new(),
            plan_text: None,
            dependencies: Vec::new(),
            plan_attempts: 0,
            test_attempts: 0,
            failure: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn advance(&mut self, to: FeatureStatus) -> Result<(), TransitionError> {
        if !is_valid_transition(self.status, to) {
            return Err(TransitionError {
                entity: "feature",
                id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Move to a terminal failure status and record the cause.
    pub fn fail(&mut self, to: FeatureStatus, cause: &str) -> Result<(), TransitionError> {
        self.advance(to)?;
        self.failure = Some(cause.to_string());
        Ok(())
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn count_tasks(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn all_tasks_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_done())
    }

    /// Percentage of tasks in a terminal state.
    pub fn completion_percentage(&self) -> f64 {
        if self.tasks.is_empty() {
            return 100.0;
        }
        let terminal = self.tasks.iter().filter(|t| t.status.is_terminal()).count();
        (terminal as f64 / self.tasks.len() as f64) * 100.0
    }
}

//! Typed error hierarchy for the wright engine.
//!
//! One enum per failure class the engine has to tell apart:
//! - `PlanError` - a generated plan was rejected (fed back to the planner)
//! - `GenerationError` - the generation service failed upstream
//! - `ExecError` - the sandboxed executor refused or could not run a command
//! - `FsError` - a file operation escaped the project root or hit I/O
//! - `EngineError` - run-level failures surfaced to the caller

use thiserror::Error;

use crate::services::Substitution;

/// Reasons a plan is rejected wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Plan text was non-empty but contained no tasks")]
    Empty,

    #[error("Task {task} has unknown action '{action}'")]
    UnknownAction { task: String, action: String },

    #[error("Task {task} has no target")]
    MissingTarget { task: String },

    #[error("Task {task} depends on itself")]
    SelfDependency { task: String },

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Duplicate task id {task}")]
    DuplicateId { task: String },

    #[error("Task {task} creates directory '{directory}' which task {creator} already creates")]
    RedundantDirectory {
        task: String,
        directory: String,
        creator: String,
    },
}

/// Failures reported by the generation service.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures reported by the sandboxed command executor.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Command rejected by policy: {reason}")]
    PolicyRejected { command: String, reason: String },

    #[error("User declined to run '{command}'")]
    UserDeclined { command: String },

    #[error("Command cancelled")]
    Cancelled,

    #[error("Command timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Failed to spawn command: {0}")]
    Io(#[source] std::io::Error),

    /// The policy replaced the command and the replacement then failed to
    /// run to an exit code.
    #[error("Substitute '{}' failed: {source}", substitution.substitute)]
    Substituted {
        substitution: Substitution,
        #[source]
        source: Box<ExecError>,
    },
}

impl ExecError {
    /// Wrap `self` with the substitution that produced it, if any.
    pub fn with_substitution(self, substitution: Option<&Substitution>) -> Self {
        match substitution {
            Some(sub) => Self::Substituted {
                substitution: sub.clone(),
                source: Box::new(self),
            },
            None => self,
        }
    }

    /// Split off a carried substitution, returning the underlying error.
    pub fn into_parts(self) -> (Self, Option<Substitution>) {
        match self {
            Self::Substituted {
                substitution,
                source,
            } => (*source, Some(substitution)),
            other => (other, None),
        }
    }
}

/// Failures from the project file system.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("Path '{0}' escapes the project root")]
    OutsideRoot(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A status change that would move a task or feature backwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {entity} transition for {id}: {from} -> {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub id: String,
    pub from: String,
    pub to: String,
}

/// Run-level errors returned by the engine entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to persist project state: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("Run interrupted by user")]
    Interrupted,

    #[error("Generation service unavailable after {attempts} recovery attempts: {message}")]
    UpstreamAbandoned { attempts: u32, message: String },

    #[error("Feature {0} not found")]
    FeatureNotFound(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Errors that end the whole run instead of failing one attempt.
    pub fn is_run_level(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_error_names_task_and_dependency() {
        let err = PlanError::UnknownDependency {
            task: "1.2".into(),
            dependency: "9.9".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1.2"));
        assert!(msg.contains("9.9"));
    }

    #[test]
    fn test_redundant_directory_message() {
        let err = PlanError::RedundantDirectory {
            task: "1".into(),
            directory: "blog".into(),
            creator: "2".into(),
        };
        assert!(err.to_string().contains("already creates"));
    }

    #[test]
    fn test_generation_error_converts_from_anyhow() {
        let err: GenerationError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, GenerationError::Other(_)));
    }

    #[test]
    fn test_exec_error_policy_rejected_is_matchable() {
        let err = ExecError::PolicyRejected {
            command: "rm -rf /".into(),
            reason: "denied".into(),
        };
        match &err {
            ExecError::PolicyRejected { command, .. } => assert_eq!(command, "rm -rf /"),
            _ => panic!("Expected PolicyRejected"),
        }
    }

    #[test]
    fn test_substituted_error_splits_back_apart() {
        let sub = Substitution {
            original: "pip install x".into(),
            substitute: "sleep 5".into(),
            reason: "pinned".into(),
        };
        let err = ExecError::Timeout { secs: 1 }.with_substitution(Some(&sub));
        assert!(err.to_string().contains("sleep 5"));
        let (inner, carried) = err.into_parts();
        assert!(matches!(inner, ExecError::Timeout { secs: 1 }));
        assert_eq!(carried, Some(sub));

        let (inner, carried) = ExecError::Cancelled.with_substitution(None).into_parts();
        assert!(matches!(inner, ExecError::Cancelled));
        assert!(carried.is_none());
    }

    #[test]
    fn test_run_level_classification() {
        assert!(EngineError::Interrupted.is_run_level());
        assert!(
            EngineError::UpstreamAbandoned {
                attempts: 3,
                message: "down".into()
            }
            .is_run_level()
        );
        assert!(!EngineError::Other(anyhow::anyhow!("bad reply")).is_run_level());
    }

    #[test]
    fn test_all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PlanError::Empty);
        assert_std_error(&ExecError::Cancelled);
        assert_std_error(&EngineError::Interrupted);
        assert_std_error(&FsError::OutsideRoot("..".into()));
    }
}

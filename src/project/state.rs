//! The Project aggregate: everything the engine persists between runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use super::feature::{Feature, FeatureStatus};
use crate::artifacts::ArtifactRegistry;

/// Resolution state of a sandbox substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    #[default]
    Pending,
    Success,
    Failure,
}

/// One command the sandbox rewrote instead of running as requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityFeedback {
    pub feature_id: String,
    pub task_id: String,
    pub original: String,
    pub substitute: String,
    pub reason: String,
    pub status: FeedbackStatus,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

/// Dated note appended on every feature terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalNote {
    pub feature_id: String,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate root for a single project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub root: PathBuf,
    pub goal: String,
    /// Name of the domain profile the project was initialised with.
    pub profile: String,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub current_feature_id: Option<String>,
    #[serde(default)]
    pub artifact_registry: ArtifactRegistry,
    /// User-supplied values, referenced as `{{name}}`.
    #[serde(default)]
    pub placeholders: BTreeMap<String, String>,
    #[serde(default)]
    pub historical_notes: Vec<HistoricalNote>,
    #[serde(default)]
    pub security_feedback_log: Vec<SecurityFeedback>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>, profile: &str, goal: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            root: root.into(),
            goal: goal.to_string(),
            profile: profile.to_string(),
            features: Vec::new(),
            current_feature_id: None,
            artifact_registry: ArtifactRegistry::new(),
            placeholders: BTreeMap::new(),
            historical_notes: Vec::new(),
            security_feedback_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn feature(&self, id: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }

    pub fn feature_mut(&mut self, id: &str) -> Option<&mut Feature> {
        self.features.iter_mut().find(|f| f.id == id)
    }

    /// Next free feature id (`f1`, `f2`, ...).
    pub fn next_feature_id(&self) -> String {
        let mut n = self.features.len() + 1;
        loop {
            let candidate = format!("f{}", n);
            if self.feature(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record a substitution as pending; returns its index in the log.
    pub fn record_substitution(
        &mut self,
        feature_id: &str,
        task_id: &str,
        original: &str,
        substitute: &str,
        reason: &str,
    ) -> usize {
        tracing::warn!(
            feature = %feature_id,
            task = %task_id,
            original,
            substitute,
            "command substituted by sandbox policy"
        );
        self.security_feedback_log.push(SecurityFeedback {
            feature_id: feature_id.to_string(),
            task_id: task_id.to_string(),
            original: original.to_string(),
            substitute: substitute.to_string(),
            reason: reason.to_string(),
            status: FeedbackStatus::Pending,
            exit_code: None,
            recorded_at: Utc::now(),
        });
        self.security_feedback_log.len() - 1
    }

    /// Resolve a pending substitution from the substitute's exit code.
    pub fn resolve_feedback(&mut self, index: usize, exit_code: Option<i32>) {
        if let Some(entry) = self.security_feedback_log.get_mut(index) {
            entry.exit_code = exit_code;
            entry.status = if exit_code == Some(0) {
                FeedbackStatus::Success
            } else {
                FeedbackStatus::Failure
            };
        }
    }

    pub fn add_note(&mut self, feature_id: &str, text: impl Into<String>) {
        self.historical_notes.push(HistoricalNote {
            feature_id: feature_id.to_string(),
            text: text.into(),
            recorded_at: Utc::now(),
        });
    }

    /// Roll every `InProgress` task back to `Pending`.
    ///
    /// Returns `(feature id, task id)` for each rolled-back task.
    pub fn rollback_interrupted(&mut self) -> Vec<(String, String)> {
        let mut rolled = Vec::new();
        for feature in &mut self.features {
            for task in &mut feature.tasks {
                if task.rollback_interrupted() {
                    rolled.push((feature.id.clone(), task.id.clone()));
                }
            }
        }
        rolled
    }

    /// Whether any feature ended in a failure status.
    pub fn has_failed_feature(&self) -> Option<&Feature> {
        self.features.iter().find(|f| f.status.is_failure())
    }

    /// Count features by status.
    pub fn count_features(&self, status: FeatureStatus) -> usize {
        self.features.iter().filter(|f| f.status == status).count()
    }

    /// Summary of prior outcomes, registry and sandbox feedback for planning prompts.
    pub fn planning_context(&self) -> String {
        let mut sections = Vec::new();

        if !self.historical_notes.is_empty() {
            let notes: Vec<String> = self
                .historical_notes
                .iter()
                .map(|n| format!("- [{}] {}", n.feature_id, n.text))
                .collect();
            sections.push(format!("## Previous outcomes\n{}", notes.join("\n")));
        }

        if !self.artifact_registry.is_empty() {
            sections.push(format!(
                "## Known artifacts\n{}",
                self.artifact_registry.describe()
            ));
        }

        let feedback: Vec<String> = self
            .security_feedback_log
            .iter()
            .filter(|f| f.status != FeedbackStatus::Pending)
            .map(|f| {
                format!(
                    "- `{}` was replaced by `{}` ({}); result: {:?}",
                    f.original, f.substitute, f.reason, f.status
                )
            })
            .collect();
        if !feedback.is_empty() {
            sections.push(format!("## Sandbox substitutions\n{}", feedback.join("\n")));
        }

        sections.join("\n\n")
    }
}

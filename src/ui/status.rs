//! Plain-text summary of a persisted project, for `wright status`.

use std::fmt::Write;

use crate::project::{Project, TaskStatus};

/// Render features, task counts and the last failure of each feature.
pub fn render_status(project: &Project) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Project: {}", project.root.display());
    let _ = writeln!(out, "Profile: {}", project.profile);
    if !project.goal.trim().is_empty() {
        let _ = writeln!(out, "Goal:    {}", project.goal.trim());
    }
    let _ = writeln!(out);

    if project.features.is_empty() {
        let _ = writeln!(out, "No features yet. Run 'wright goal \"<text>\"' to start.");
        return out;
    }

    let _ = writeln!(out, "Features:");
    for feature in &project.features {
        let current = if project.current_feature_id.as_deref() == Some(feature.id.as_str()) {
            "*"
        } else {
            " "
        };
        let _ = writeln!(
            out,
            " {} {:<4} {:<22} {:<20} {}/{} tasks done ({:.0}%)",
            current,
            feature.id,
            feature.status.to_string(),
            feature.name,
            feature.count_tasks(TaskStatus::Completed) + feature.count_tasks(TaskStatus::Skipped),
            feature.tasks.len(),
            feature.completion_percentage(),
        );
        if feature.count_tasks(TaskStatus::Failed) > 0 {
            let _ = writeln!(
                out,
                "        {} task(s) failed",
                feature.count_tasks(TaskStatus::Failed)
            );
        }
        if let Some(failure) = &feature.failure {
            let _ = writeln!(out, "        last failure: {}", failure);
        }
    }

    if !project.artifact_registry.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Artifacts: {}", project.artifact_registry.len());
    }
    if !project.security_feedback_log.is_empty() {
        let _ = writeln!(
            out,
            "Command substitutions: {}",
            project.security_feedback_log.len()
        );
    }
    out
}

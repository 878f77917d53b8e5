//! Prompt text sent to the generation service.

use crate::project::{Feature, Project, Task};

pub const FEATURES_SYSTEM: &str = "You split a software goal into features. \
For each feature write a block:\n\
Feature <n>: <name>\n\
Description: <what it does>\n\
Depends on: <feature numbers, or none>\n\
List features in the order they should be built.";

pub const PLAN_SYSTEM: &str = "You plan the implementation of one feature as \
small ordered tasks. For each task write a block:\n\
### Task <id>: <title>\n\
Action: CreateFile | ModifyFile | DeleteFile | CreateDirectory | RunCommand | PromptUserInput\n\
Target: <relative path, shell command, or input name>\n\
Description: <one line>\n\
Requirements: <what the file must contain; may span lines>\n\
Dependencies: <task ids, or none>\n\
Test step: <shell command that verifies the task>\n\
Defines: <optional artifact name other tasks can reference as {{name}}>\n\
Use relative paths only.";

pub const CONTENT_SYSTEM: &str = "You write source files. Reply with one fenced \
code block holding the complete file content and nothing else.";

pub const TESTS_SYSTEM: &str = "You write automated tests for a feature. Reply \
with one fenced code block holding the complete test file.";

pub const REVIEW_SYSTEM: &str = "You review a finished feature. Answer APPROVED \
or REJECTED on the first line, followed by a short reason.";

fn with_context(mut prompt: String, project: &Project) -> String {
    let context = project.planning_context();
    if !context.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&context);
    }
    prompt
}

pub fn features_prompt(goal: &str, project: &Project) -> String {
    let mut prompt = format!("Goal:\n{}\n", goal.trim());
    if !project.features.is_empty() {
        prompt.push_str("\nExisting features:\n");
        for feature in &project.features {
            prompt.push_str(&format!("- {} ({})\n", feature.name, feature.status));
        }
    }
    with_context(prompt, project)
}

pub fn plan_prompt(feature: &Feature, project: &Project) -> String {
    let prompt = format!(
        "Project goal: {}\n\nFeature: {}\n{}\n",
        project.goal.trim(),
        feature.name,
        feature.description.trim()
    );
    with_context(prompt, project)
}

pub fn plan_rejected(reason: &str) -> String {
    format!(
        "The plan was rejected: {}. Send the complete corrected plan.",
        reason
    )
}

pub fn content_prompt(
    feature: &Feature,
    task: &Task,
    target: &str,
    requirements: &str,
    existing: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Feature: {}\nTask {}: {}\nFile: {}\n\nRequirements:\n{}\n",
        feature.name, task.id, task.description, target, requirements.trim()
    );
    if let Some(existing) = existing {
        prompt.push_str(&format!("\nCurrent content:\n```\n{}\n```\n", existing));
    }
    prompt
}

pub fn tests_prompt(feature: &Feature, test_file: &str, test_command: &str) -> String {
    let files: Vec<&str> = feature
        .tasks
        .iter()
        .filter(|t| t.action.writes_content())
        .map(|t| t.target.as_str())
        .collect();
    format!(
        "Feature: {}\n{}\n\nFiles written: {}\nTest file: {}\nTests run with: {}\n",
        feature.name,
        feature.description.trim(),
        files.join(", "),
        test_file,
        test_command
    )
}

pub fn review_prompt(feature: &Feature) -> String {
    let mut prompt = format!("Feature: {}\n{}\n\nTasks:\n", feature.name, feature.description.trim());
    for task in &feature.tasks {
        prompt.push_str(&format!("- {} [{}]\n", task.label(), task.status));
    }
    prompt
}

//! Plan text to Task records.
//!
//! A plan is a sequence of blocks, each introduced by a header carrying a
//! hierarchical id and title:
//!
//! ```text
//! ### Task 1.2: Create the post model
//! Action: CreateFile
//! Target: blog/models.py
//! Description: Post model with title and body
//! Requirements:
//!   - title: CharField(200)
//!
//!   - body: TextField
//! Dependencies: 1.1
//! Test step: python manage.py check
//! ```
//!
//! `Requirements` runs until the next recognised key written at the same
//! margin as the `Requirements` line itself; blank lines and indented
//! `name: value` lines inside it are kept. Any validation failure rejects
//! the whole plan.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::clean::pre_clean;
use super::keys::{PlanKey, margin, parse_id_list, split_key_line, unwrap_value};
use super::rules;
use crate::engine_config::DomainProfile;
use crate::errors::PlanError;
use crate::project::{Task, TaskAction};

static HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:#{1,6}\s*)?(?:\*\*|__)?\s*task|(?:#{1,6}|\*\*|__)\s*(?:\*\*|__)?\s*step)\s+#?([A-Za-z]?\d+(?:\.\d+)*)\s*(?:\*\*|__)?\s*[:.)\-]?\s*(.*?)\s*(?:\*\*|__)?\s*$",
    )
    .unwrap()
});

/// A header written as plain `Task <id>` needs a separator after the id,
/// so prose such as "Task 2 should run first" stays body text.
static BARE_TASK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*task\s").unwrap());
static BARE_TASK_HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*task\s+#?[A-Za-z]?\d+(?:\.\d+)*\s*(?:[:.)\-]|\*\*|__|$)").unwrap()
});

/// Id given to the single block of a header-less plan.
const SYNTHETIC_ID: &str = "1";

fn header_captures(line: &str) -> Option<regex::Captures<'_>> {
    if BARE_TASK_REGEX.is_match(line) && !BARE_TASK_HEADER_REGEX.is_match(line) {
        return None;
    }
    HEADER_REGEX.captures(line)
}

pub fn is_task_header(line: &str) -> bool {
    header_captures(line).is_some()
}

/// One header-delimited chunk of plan text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    id: String,
    title: String,
    lines: Vec<String>,
}

fn split_blocks(text: &str) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = header_captures(line) {
            blocks.push(Block {
                id: caps[1].to_string(),
                title: caps[2].trim_end_matches(['*', '_']).trim().to_string(),
                lines: Vec::new(),
            });
        } else if let Some(block) = blocks.last_mut() {
            block.lines.push(line.to_string());
        }
    }

    if blocks.is_empty() && !text.trim().is_empty() {
        blocks.push(Block {
            id: SYNTHETIC_ID.to_string(),
            title: String::new(),
            lines: text.lines().map(String::from).collect(),
        });
    }
    blocks
}

/// Field values collected from one block before validation.
#[derive(Debug, Default)]
struct Fields {
    action: Option<String>,
    target: Option<String>,
    description: Option<String>,
    requirements: Vec<String>,
    dependencies: Vec<String>,
    test_step: Option<String>,
    defines: Option<String>,
}

fn extract_fields(block: &Block) -> Fields {
    let mut fields = Fields::default();
    // Margin of the Requirements key line while its body is being read.
    let mut requirements_margin: Option<&str> = None;

    for line in &block.lines {
        let key = split_key_line(line)
            .and_then(|(k, v)| PlanKey::from_name(k).map(|k| (k, v)))
            .filter(|_| requirements_margin.is_none_or(|m| margin(line) == m));
        match key {
            Some((key, value)) => {
                requirements_margin = (key == PlanKey::Requirements).then(|| margin(line));
                match key {
                    PlanKey::Action => fields.action = Some(unwrap_value(value)),
                    PlanKey::Target => fields.target = Some(unwrap_value(value)),
                    PlanKey::Description => fields.description = Some(value.trim().to_string()),
                    PlanKey::Requirements => {
                        if !value.trim().is_empty() {
                            fields.requirements.push(value.trim().to_string());
                        }
                    }
                    PlanKey::Dependencies => fields.dependencies = parse_id_list(value),
                    PlanKey::TestStep => fields.test_step = Some(unwrap_value(value)),
                    PlanKey::Defines => fields.defines = Some(unwrap_value(value)),
                }
            }
            None if requirements_margin.is_some() => {
                fields.requirements.push(line.trim_end().to_string())
            }
            None => {}
        }
    }

    while fields.requirements.last().is_some_and(|l| l.trim().is_empty()) {
        fields.requirements.pop();
    }
    fields
}

fn build_task(block: &Block, fields: Fields, profile: &DomainProfile) -> Result<Task, PlanError> {
    let raw_action = fields.action.unwrap_or_default();
    let action = TaskAction::parse(&raw_action).ok_or_else(|| PlanError::UnknownAction {
        task: block.id.clone(),
        action: raw_action.clone(),
    })?;

    let target = fields.target.unwrap_or_default();
    if target.trim().is_empty() {
        return Err(PlanError::MissingTarget {
            task: block.id.clone(),
        });
    }

    let description = fields
        .description
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| block.title.clone());

    let verification = fields
        .test_step
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
        .unwrap_or_else(|| profile.default_verification.clone());

    let mut task = Task::new(&block.id, action, target.trim())
        .with_description(&description)
        .with_requirements(&fields.requirements.join("\n"))
        .with_dependencies(fields.dependencies)
        .with_verification(&verification);
    if let Some(name) = fields.defines.filter(|d| !d.is_empty()) {
        task = task.with_defines(&name);
    }
    Ok(task)
}

/// Check ids are unique and every dependency names another task in the plan.
fn validate_dependencies(tasks: &[Task]) -> Result<(), PlanError> {
    let mut ids = HashSet::new();
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(PlanError::DuplicateId {
                task: task.id.clone(),
            });
        }
    }

    for task in tasks {
        for dep in &task.dependencies {
            if dep == &task.id {
                return Err(PlanError::SelfDependency {
                    task: task.id.clone(),
                });
            }
            if !ids.contains(dep.as_str()) {
                return Err(PlanError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Parse raw plan text into tasks, or reject the plan as a whole.
pub fn parse_plan(raw: &str, profile: &DomainProfile) -> Result<Vec<Task>, PlanError> {
    let cleaned = pre_clean(raw, is_task_header);
    let blocks = split_blocks(&cleaned);
    if blocks.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut tasks = blocks
        .iter()
        .map(|block| build_task(block, extract_fields(block), profile))
        .collect::<Result<Vec<_>, _>>()?;

    validate_dependencies(&tasks)?;
    rules::check_redundant_directories(&tasks, profile)?;

    let fixed = rules::correct_verification_typos(&mut tasks, profile);
    let added = rules::insert_companion_tasks(&mut tasks, profile);
    tracing::debug!(
        tasks = tasks.len(),
        typo_fixes = fixed,
        companions = added,
        "plan parsed"
    );

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::TaskStatus;

    fn generic() -> DomainProfile {
        DomainProfile::generic()
    }

    const TWO_TASKS: &str = "\
Here is the plan.

### Task 1: Create app directory
Action: CreateDirectory
Target: app
Dependencies: none

### Task 2: Create models
**Action:** CreateFile
**Target:** `app/models.py`
Description: Data models
Requirements:
- class Post
  with a title

- and a body field
Dependencies: 1
Test step: python -c 'import app.models'
";

    #[test]
    fn test_parse_two_tasks() {
        let tasks = parse_plan(TWO_TASKS, &generic()).unwrap();
        assert_eq!(tasks.len(), 2);

        assert_eq!(tasks[0].id, "1");
        assert_eq!(tasks[0].action, TaskAction::CreateDirectory);
        assert_eq!(tasks[0].description, "Create app directory");
        assert!(tasks[0].dependencies.is_empty());
        assert_eq!(tasks[0].verification_command.as_deref(), Some("ls"));
        assert_eq!(tasks[0].status, TaskStatus::Waiting);

        assert_eq!(tasks[1].target, "app/models.py");
        assert_eq!(tasks[1].description, "Data models");
        assert_eq!(tasks[1].dependencies, vec!["1"]);
        assert_eq!(
            tasks[1].verification_command.as_deref(),
            Some("python -c 'import app.models'")
        );
    }

    #[test]
    fn test_requirements_span_blank_lines() {
        let tasks = parse_plan(TWO_TASKS, &generic()).unwrap();
        assert_eq!(
            tasks[1].requirements,
            "- class Post\n  with a title\n\n- and a body field"
        );
    }

    #[test]
    fn test_headerless_plan_gets_synthetic_id() {
        let tasks = parse_plan("Action: RunCommand\nTarget: echo hi\n", &generic()).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, SYNTHETIC_ID);
        assert_eq!(tasks[0].target, "echo hi");
    }

    #[test]
    fn test_fenced_plan_is_cleaned() {
        let raw = "```\n**Task 1.1 - Scaffold**\nAction: Run Command\nTarget: npm init -y\n```";
        let tasks = parse_plan(raw, &generic()).unwrap();
        assert_eq!(tasks[0].id, "1.1");
        assert_eq!(tasks[0].description, "Scaffold");
        assert_eq!(tasks[0].action, TaskAction::RunCommand);
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert_eq!(parse_plan("```\n```", &generic()), Err(PlanError::Empty));
        assert_eq!(parse_plan("   ", &generic()), Err(PlanError::Empty));
    }

    #[test]
    fn test_unknown_action_rejects_whole_plan() {
        let raw = "Task 1: a\nAction: RunCommand\nTarget: ls\n\nTask 2: b\nAction: Teleport\nTarget: x\n";
        assert_eq!(
            parse_plan(raw, &generic()),
            Err(PlanError::UnknownAction {
                task: "2".into(),
                action: "Teleport".into()
            })
        );
    }

    #[test]
    fn test_missing_action_is_unknown_action() {
        let raw = "Task 1: a\nTarget: ls\n";
        assert!(matches!(
            parse_plan(raw, &generic()),
            Err(PlanError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_blank_target_rejected() {
        let raw = "Task 1: a\nAction: RunCommand\nTarget:   \n";
        assert_eq!(
            parse_plan(raw, &generic()),
            Err(PlanError::MissingTarget { task: "1".into() })
        );
    }

    #[test]
    fn test_self_dependency_rejected() {
        let raw = "Task 1: a\nAction: RunCommand\nTarget: ls\nDependencies: 1\n";
        assert_eq!(
            parse_plan(raw, &generic()),
            Err(PlanError::SelfDependency { task: "1".into() })
        );
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let raw = "Task 1: a\nAction: RunCommand\nTarget: ls\nDependencies: 7\n";
        assert_eq!(
            parse_plan(raw, &generic()),
            Err(PlanError::UnknownDependency {
                task: "1".into(),
                dependency: "7".into()
            })
        );
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let raw = "Task 1: a\nAction: RunCommand\nTarget: ls\n\nTask 1: b\nAction: RunCommand\nTarget: pwd\n";
        assert_eq!(
            parse_plan(raw, &generic()),
            Err(PlanError::DuplicateId { task: "1".into() })
        );
    }

    #[test]
    fn test_mutual_dependency_is_accepted_by_parser() {
        let raw = "Task T3: a\nAction: RunCommand\nTarget: ls\nDependencies: T4\n\n\
                   Task T4: b\nAction: RunCommand\nTarget: pwd\nDependencies: T3\n";
        let tasks = parse_plan(raw, &generic()).unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn test_plain_step_line_inside_requirements_is_not_a_header() {
        let raw = "## Step 1: setup\nAction: RunCommand\nTarget: ls\nRequirements:\nStep 2: then list\n";
        let tasks = parse_plan(raw, &generic()).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].requirements, "Step 2: then list");
    }

    #[test]
    fn test_indented_path_line_stays_in_requirements() {
        let raw = "\
### Task 1: Routes
Action: ModifyFile
Target: blog/urls.py
Requirements:
  path: /posts/
  name: post-list
Dependencies: none
";
        let tasks = parse_plan(raw, &generic()).unwrap();
        assert_eq!(tasks[0].target, "blog/urls.py");
        assert_eq!(tasks[0].requirements, "  path: /posts/\n  name: post-list");
        assert!(tasks[0].dependencies.is_empty());
    }

    #[test]
    fn test_field_types_in_requirements_do_not_change_action() {
        let raw = "\
### Task 1: Post model
Action: CreateFile
Target: blog/models.py
Requirements:
  type: CharField(200)
  - Target: the admin site
Test step: python manage.py check
";
        let tasks = parse_plan(raw, &generic()).unwrap();
        assert_eq!(tasks[0].action, TaskAction::CreateFile);
        assert_eq!(tasks[0].target, "blog/models.py");
        assert_eq!(
            tasks[0].requirements,
            "  type: CharField(200)\n  - Target: the admin site"
        );
        assert_eq!(
            tasks[0].verification_command.as_deref(),
            Some("python manage.py check")
        );
    }

    #[test]
    fn test_bulleted_keys_still_end_bulleted_requirements() {
        let raw = "\
### Task 2: Views
- Action: CreateFile
- Target: blog/views.py
- Requirements: list view
  with pagination
- Dependencies: 1
### Task 1: App
- Action: CreateDirectory
- Target: blog
";
        let tasks = parse_plan(raw, &generic()).unwrap();
        let views = tasks.iter().find(|t| t.id == "2").unwrap();
        assert_eq!(views.requirements, "list view\n  with pagination");
        assert_eq!(views.dependencies, vec!["1"]);
    }

    #[test]
    fn test_task_mentioned_in_prose_is_not_a_header() {
        let raw = "\
Task 1: Install
Action: RunCommand
Target: pip install -r requirements.txt
Requirements:
Task 2 should only start once this finishes.
";
        assert!(!is_task_header("Task 2 should only start once this finishes."));
        assert!(is_task_header("Task 2 - Views"));
        assert!(is_task_header("Task 2"));
        assert!(is_task_header("**Task 2** Views"));
        let tasks = parse_plan(raw, &generic()).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(
            tasks[0].requirements,
            "Task 2 should only start once this finishes."
        );
    }

    #[test]
    fn test_defines_key_is_captured() {
        let raw = "Task 1: model\nAction: CreateFile\nTarget: app/models.py\nDefines: post_model\n";
        let tasks = parse_plan(raw, &generic()).unwrap();
        assert_eq!(tasks[0].defines.as_deref(), Some("post_model"));
    }
}

//! Post-processing rules applied to a structurally valid plan.

use crate::engine_config::{DomainProfile, normalize_dir};
use crate::errors::PlanError;
use crate::project::{Task, TaskAction};

/// Reject a directory-creation task that precedes a command creating the
/// same directory itself (e.g. `startapp blog` after `mkdir blog` fails).
pub fn check_redundant_directories(tasks: &[Task], profile: &DomainProfile) -> Result<(), PlanError> {
    for (i, dir_task) in tasks.iter().enumerate() {
        if dir_task.action != TaskAction::CreateDirectory {
            continue;
        }
        let directory = normalize_dir(&dir_task.target);

        let creator = tasks[i + 1..].iter().find(|t| {
            t.action == TaskAction::RunCommand
                && profile
                    .created_directory(&t.target)
                    .is_some_and(|created| created == directory)
        });

        if let Some(creator) = creator {
            return Err(PlanError::RedundantDirectory {
                task: dir_task.id.clone(),
                directory,
                creator: creator.id.clone(),
            });
        }
    }
    Ok(())
}

/// Fix known planner typos in verification commands. Returns the number fixed.
pub fn correct_verification_typos(tasks: &mut [Task], profile: &DomainProfile) -> usize {
    let mut fixed = 0;
    for task in tasks.iter_mut() {
        let Some(command) = task.verification_command.as_deref() else {
            continue;
        };
        let corrected = profile.correct_typos(command);
        if corrected != command {
            tracing::debug!(task = %task.id, from = command, to = %corrected, "corrected verification typo");
            task.verification_command = Some(corrected);
            fixed += 1;
        }
    }
    fixed
}

/// Insert a "register entity" task after every task that writes a
/// model-like file. Returns the number of tasks inserted.
pub fn insert_companion_tasks(tasks: &mut Vec<Task>, profile: &DomainProfile) -> usize {
    if profile.register_command.is_none() {
        return 0;
    }

    let mut out: Vec<Task> = Vec::with_capacity(tasks.len());
    let mut added = 0;
    let existing: Vec<String> = tasks.iter().map(|t| t.target.clone()).collect();

    for task in tasks.drain(..) {
        let companion = (task.action.writes_content() && profile.is_model_file(&task.target))
            .then(|| profile.register_command_for(&task.target))
            .flatten()
            // the planner already registered it
            .filter(|command| !existing.iter().any(|t| t == command));

        let companion = companion.map(|command| {
            Task::new(&format!("{}-register", task.id), TaskAction::RunCommand, &command)
                .with_description(&format!("Register entities defined in {}", task.target))
                .with_dependencies(vec![task.id.clone()])
                .with_verification(&profile.default_verification)
        });

        out.push(task);
        if let Some(companion) = companion {
            if out.iter().any(|t| t.id == companion.id) {
                continue;
            }
            out.push(companion);
            added += 1;
        }
    }

    *tasks = out;
    added
}

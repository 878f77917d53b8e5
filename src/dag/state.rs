//! Per-pass task partition and scheduler outcomes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::project::{Task, TaskStatus};

/// Tasks split by scheduling state at the start of a pass.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// Completed or Skipped.
    pub done: HashSet<String>,
    /// Failed.
    pub blocked: HashSet<String>,
    /// Everything else.
    pub open: Vec<String>,
}

impl Partition {
    pub fn of(tasks: &[Task]) -> Self {
        let mut partition = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Completed | TaskStatus::Skipped => {
                    partition.done.insert(task.id.clone());
                }
                TaskStatus::Failed => {
                    partition.blocked.insert(task.id.clone());
                }
                _ => partition.open.push(task.id.clone()),
            }
        }
        partition
    }

    pub fn is_finished(&self) -> bool {
        self.open.is_empty()
    }
}

/// A task that can never run, with the dependencies it is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StuckTask {
    pub id: String,
    pub unmet: Vec<String>,
}

/// Open tasks left when a pass made no progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StallReport {
    pub stuck: Vec<StuckTask>,
    /// Pass number on which the stall was detected.
    pub pass: usize,
}

impl StallReport {
    pub fn from_tasks(tasks: &[Task], partition: &Partition, pass: usize) -> Self {
        let stuck = tasks
            .iter()
            .filter(|t| partition.open.contains(&t.id))
            .map(|t| StuckTask {
                id: t.id.clone(),
                unmet: t
                    .dependencies
                    .iter()
                    .filter(|d| !partition.done.contains(*d))
                    .cloned()
                    .collect(),
            })
            .collect();
        Self { stuck, pass }
    }

    pub fn stuck_ids(&self) -> Vec<&str> {
        self.stuck.iter().map(|s| s.id.as_str()).collect()
    }
}

impl fmt::Display for StallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .stuck
            .iter()
            .map(|s| {
                if s.unmet.is_empty() {
                    format!("{} (not runnable)", s.id)
                } else {
                    format!("{} waits on {}", s.id, s.unmet.join(", "))
                }
            })
            .collect();
        write!(f, "scheduler stalled: {}", parts.join("; "))
    }
}

/// How a feature's task graph finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Every task is Completed or Skipped.
    Completed { passes: usize },
    /// A task ended Failed.
    TaskFailed { task_id: String, passes: usize },
    Stalled(StallReport),
}

impl ScheduleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

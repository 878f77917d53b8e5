//! Dependency scheduler for a feature's tasks.
//!
//! Each pass takes a snapshot of the ready set (tasks whose dependencies
//! are all Completed or Skipped), orders it by domain phase rank and then
//! declaration order, and runs those tasks one at a time through a
//! [`TaskRunner`]. A pass that changes nothing while tasks remain open is a
//! stall.

use async_trait::async_trait;

use super::state::{Partition, ScheduleOutcome, StallReport};
use crate::engine_config::DomainProfile;
use crate::errors::EngineError;
use crate::project::{Task, TaskStatus};

/// The side of the engine that owns the tasks and runs them.
#[async_trait]
pub trait TaskRunner: Send {
    /// Current view of the feature's tasks.
    fn tasks(&self) -> &[Task];

    /// Move a Waiting task whose dependencies are met to Pending.
    async fn promote(&mut self, task_id: &str) -> Result<(), EngineError>;

    /// Run one task to a terminal status.
    async fn execute(&mut self, task_id: &str) -> Result<TaskStatus, EngineError>;
}

#[derive(Debug)]
pub struct DagScheduler<'a> {
    profile: &'a DomainProfile,
    passes: usize,
}

impl<'a> DagScheduler<'a> {
    pub fn new(profile: &'a DomainProfile) -> Self {
        Self { profile, passes: 0 }
    }

    /// Number of passes run so far.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Tasks that may start now, highest priority first.
    pub fn get_ready_tasks(&self, tasks: &[Task]) -> Vec<String> {
        let partition = Partition::of(tasks);
        let mut ready: Vec<(u8, usize, &Task)> = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| matches!(t.status, TaskStatus::Waiting | TaskStatus::Pending))
            .filter(|(_, t)| t.dependencies_met(|d| partition.done.contains(d)))
            .map(|(i, t)| (self.profile.phase_rank(t), i, t))
            .collect();
        ready.sort_by_key(|(rank, index, _)| (*rank, *index));
        ready.into_iter().map(|(_, _, t)| t.id.clone()).collect()
    }

    /// Whether `task_id` may still start: open and every dependency done.
    fn still_ready(tasks: &[Task], task_id: &str) -> bool {
        let partition = Partition::of(tasks);
        tasks
            .iter()
            .find(|t| t.id == task_id)
            .is_some_and(|t| {
                matches!(t.status, TaskStatus::Waiting | TaskStatus::Pending)
                    && t.dependencies_met(|d| partition.done.contains(d))
            })
    }

    /// Drive every task to a terminal status, or report why that is impossible.
    pub async fn run_to_completion<R: TaskRunner>(
        &mut self,
        runner: &mut R,
    ) -> Result<ScheduleOutcome, EngineError> {
        loop {
            let partition = Partition::of(runner.tasks());
            if let Some(failed) = runner
                .tasks()
                .iter()
                .find(|t| partition.blocked.contains(&t.id))
            {
                return Ok(ScheduleOutcome::TaskFailed {
                    task_id: failed.id.clone(),
                    passes: self.passes,
                });
            }
            if partition.is_finished() {
                tracing::debug!(passes = self.passes, "all tasks done");
                return Ok(ScheduleOutcome::Completed {
                    passes: self.passes,
                });
            }

            self.passes += 1;
            let wave = self.get_ready_tasks(runner.tasks());
            tracing::debug!(pass = self.passes, ready = ?wave, "scheduler pass");

            let mut changes = 0usize;
            for task_id in wave {
                if !Self::still_ready(runner.tasks(), &task_id) {
                    continue;
                }
                let waiting = runner
                    .tasks()
                    .iter()
                    .any(|t| t.id == task_id && t.status == TaskStatus::Waiting);
                if waiting {
                    runner.promote(&task_id).await?;
                }

                let status = runner.execute(&task_id).await?;
                changes += 1;
                if status == TaskStatus::Failed {
                    return Ok(ScheduleOutcome::TaskFailed {
                        task_id,
                        passes: self.passes,
                    });
                }
            }

            if changes == 0 {
                let tasks = runner.tasks();
                let report = StallReport::from_tasks(tasks, &Partition::of(tasks), self.passes);
                tracing::warn!(pass = self.passes, stuck = ?report.stuck_ids(), "{}", report);
                return Ok(ScheduleOutcome::Stalled(report));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::TaskAction;

    /// Records execution order and ends each task with a scripted status.
    struct FakeRunner {
        tasks: Vec<Task>,
        order: Vec<String>,
        fail: Option<String>,
    }

    impl FakeRunner {
        fn new(tasks: Vec<Task>) -> Self {
            Self {
                tasks,
                order: Vec::new(),
                fail: None,
            }
        }

        fn task_mut(&mut self, id: &str) -> &mut Task {
            self.tasks.iter_mut().find(|t| t.id == id).unwrap()
        }
    }

    #[async_trait]
    impl TaskRunner for FakeRunner {
        fn tasks(&self) -> &[Task] {
            &self.tasks
        }

        async fn promote(&mut self, task_id: &str) -> Result<(), EngineError> {
            self.task_mut(task_id).advance(TaskStatus::Pending)?;
            Ok(())
        }

        async fn execute(&mut self, task_id: &str) -> Result<TaskStatus, EngineError> {
            let fail = self.fail.as_deref() == Some(task_id);
            // the dependency invariant must hold whenever a task starts
            let done: Vec<String> = self
                .tasks
                .iter()
                .filter(|t| t.status.is_done())
                .map(|t| t.id.clone())
                .collect();
            let task = self.task_mut(task_id);
            assert!(task.dependencies.iter().all(|d| done.contains(d)));
            task.advance(TaskStatus::InProgress)?;
            let status = if fail { TaskStatus::Failed } else { TaskStatus::Completed };
            task.advance(status)?;
            self.order.push(task_id.to_string());
            Ok(status)
        }
    }

    fn task(id: &str, action: TaskAction, target: &str, deps: &[&str]) -> Task {
        Task::new(id, action, target).with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    #[tokio::test]
    async fn test_linear_order() {
        let profile = DomainProfile::generic();
        let mut runner = FakeRunner::new(vec![
            task("T1", TaskAction::CreateDirectory, "app", &[]),
            task("T2", TaskAction::CreateFile, "app/models.py", &["T1"]),
        ]);
        let mut scheduler = DagScheduler::new(&profile);
        let outcome = scheduler.run_to_completion(&mut runner).await.unwrap();
        assert_eq!(outcome, ScheduleOutcome::Completed { passes: 2 });
        assert_eq!(runner.order, vec!["T1", "T2"]);
    }

    #[tokio::test]
    async fn test_terminates_within_task_count_passes() {
        let profile = DomainProfile::generic();
        let mut runner = FakeRunner::new(vec![
            task("1", TaskAction::RunCommand, "a", &[]),
            task("2", TaskAction::RunCommand, "b", &["1"]),
            task("3", TaskAction::RunCommand, "c", &["1"]),
            task("4", TaskAction::RunCommand, "d", &["2", "3"]),
        ]);
        let mut scheduler = DagScheduler::new(&profile);
        let outcome = scheduler.run_to_completion(&mut runner).await.unwrap();
        assert!(outcome.is_success());
        assert!(scheduler.passes() <= 4);
        assert_eq!(runner.order, vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_phase_rank_breaks_ties() {
        let profile = DomainProfile::generic();
        let mut runner = FakeRunner::new(vec![
            task("1", TaskAction::CreateFile, "tests/test_posts.py", &[]),
            task("2", TaskAction::CreateFile, "README.md", &[]),
            task("3", TaskAction::CreateDirectory, "app", &[]),
        ]);
        let mut scheduler = DagScheduler::new(&profile);
        scheduler.run_to_completion(&mut runner).await.unwrap();
        assert_eq!(runner.order, vec!["3", "2", "1"]);
    }

    #[tokio::test]
    async fn test_mutual_dependency_stalls_after_one_pass() {
        let profile = DomainProfile::generic();
        let mut runner = FakeRunner::new(vec![
            task("T3", TaskAction::RunCommand, "a", &["T4"]),
            task("T4", TaskAction::RunCommand, "b", &["T3"]),
        ]);
        let mut scheduler = DagScheduler::new(&profile);
        match scheduler.run_to_completion(&mut runner).await.unwrap() {
            ScheduleOutcome::Stalled(report) => {
                assert_eq!(report.pass, 1);
                assert_eq!(report.stuck_ids(), vec!["T3", "T4"]);
            }
            other => panic!("expected stall, got {:?}", other),
        }
        assert!(runner.order.is_empty());
    }

    #[tokio::test]
    async fn test_stall_after_progress() {
        let profile = DomainProfile::generic();
        let mut runner = FakeRunner::new(vec![
            task("1", TaskAction::RunCommand, "a", &[]),
            task("2", TaskAction::RunCommand, "b", &["3"]),
            task("3", TaskAction::RunCommand, "c", &["2"]),
        ]);
        let mut scheduler = DagScheduler::new(&profile);
        let outcome = scheduler.run_to_completion(&mut runner).await.unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Stalled(ref r) if r.pass == 2));
        assert_eq!(runner.order, vec!["1"]);
    }

    #[tokio::test]
    async fn test_failed_task_stops_feature() {
        let profile = DomainProfile::generic();
        let mut runner = FakeRunner::new(vec![
            task("1", TaskAction::RunCommand, "a", &[]),
            task("2", TaskAction::RunCommand, "b", &[]),
            task("3", TaskAction::RunCommand, "c", &["1"]),
        ]);
        runner.fail = Some("1".into());
        let mut scheduler = DagScheduler::new(&profile);
        let outcome = scheduler.run_to_completion(&mut runner).await.unwrap();
        assert_eq!(
            outcome,
            ScheduleOutcome::TaskFailed {
                task_id: "1".into(),
                passes: 1
            }
        );
        assert_eq!(runner.order, vec!["1"]);
    }

    #[tokio::test]
    async fn test_all_completed_runs_nothing() {
        let profile = DomainProfile::generic();
        let mut done = task("1", TaskAction::RunCommand, "a", &[]);
        done.status = TaskStatus::Completed;
        let mut runner = FakeRunner::new(vec![done]);
        let mut scheduler = DagScheduler::new(&profile);
        let outcome = scheduler.run_to_completion(&mut runner).await.unwrap();
        assert_eq!(outcome, ScheduleOutcome::Completed { passes: 0 });
        assert!(runner.order.is_empty());
    }

    #[tokio::test]
    async fn test_skipped_dependency_counts_as_done() {
        let profile = DomainProfile::generic();
        let mut skipped = task("1", TaskAction::RunCommand, "a", &[]);
        skipped.status = TaskStatus::Skipped;
        let mut runner = FakeRunner::new(vec![skipped, task("2", TaskAction::RunCommand, "b", &["1"])]);
        let mut scheduler = DagScheduler::new(&profile);
        assert!(scheduler.run_to_completion(&mut runner).await.unwrap().is_success());
        assert_eq!(runner.order, vec!["2"]);
    }
}

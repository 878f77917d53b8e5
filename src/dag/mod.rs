//! Dependency scheduling for a feature's task graph.
//!
//! ## Architecture
//!
//! 1. **State** - partitions tasks into done / blocked / open and describes
//!    how a run ended ([`ScheduleOutcome`], [`StallReport`])
//! 2. **Scheduler** - runs passes over the ready set, serially, through a
//!    [`TaskRunner`] supplied by the engine
//!
//! Tasks within a feature share one working tree, so the scheduler never
//! runs two of them at once.

mod scheduler;
mod state;

pub use scheduler::{DagScheduler, TaskRunner};
pub use state::{Partition, ScheduleOutcome, StallReport, StuckTask};

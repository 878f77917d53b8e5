//! Task, Feature and Project data model.
//!
//! Tasks are created only by the plan parser and mutated only by the
//! scheduler and executor. Features are mutated only by the lifecycle
//! controller. Both status machines are forward-only; see
//! [`task::is_valid_transition`] and [`feature::is_valid_transition`].

pub mod feature;
mod state;
pub mod task;

pub use feature::{Feature, FeatureStatus};
pub use state::{FeedbackStatus, HistoricalNote, Project, SecurityFeedback};
pub use task::{AttemptOutcome, AttemptRecord, Task, TaskAction, TaskStatus};

//! Wright: an autonomous software-construction engine.
//!
//! A goal is split into features; each feature is planned as a set of
//! tasks, the tasks are scheduled by dependency and executed inside a
//! bounded retry/remediation loop, and the feature is then tested, reviewed
//! and merged. All state lives in one [`project::Project`] snapshot that is
//! saved after every mutation, so a run can be resumed after a crash.

pub mod artifacts;
pub mod config;
pub mod dag;
pub mod engine;
pub mod engine_config;
pub mod errors;
pub mod logging;
pub mod plan;
pub mod project;
pub mod retry;
pub mod services;
pub mod ui;

pub use config::Config;
pub use engine::{Engine, EngineEvent, RunOutcome};
pub use errors::EngineError;

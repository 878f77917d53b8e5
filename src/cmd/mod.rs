//! CLI command implementations.
//!
//! | Module    | Commands handled                   |
//! |-----------|------------------------------------|
//! | `project` | `Init`, `Status`                   |
//! | `run`     | `Goal`, `Resume`, `Cancel`         |
//! | `config`  | `Config`                           |

pub mod config;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use project::{cmd_init, cmd_status};
pub use run::{cmd_cancel, cmd_goal, cmd_resume};

//! Plan compilation: generation output to typed Task records.
//!
//! ## Pipeline
//!
//! 1. **clean** - strip fences and preamble prose
//! 2. **parser** - split at task headers, extract `Key: value` metadata with
//!    the tolerant matcher in **keys**, build and validate Tasks
//! 3. **rules** - domain post-processing (redundant directories, typo
//!    fixes, companion "register" tasks)
//!
//! **features** reuses the same key matcher for goal-to-feature lists.

mod clean;
mod features;
mod keys;
mod parser;
mod rules;

pub use clean::{extract_code_block, pre_clean};
pub use features::{FeatureSpec, into_features, parse_features};
pub use keys::{FeatureKey, PlanKey, parse_id_list, split_key_line, unwrap_value};
pub use parser::{is_task_header, parse_plan};

//! Feature list parsing for goal identification.
//!
//! The generation service answers a goal with blocks like:
//!
//! ```text
//! Feature 1: User accounts
//! Description: Sign up, log in, log out
//! Depends on: none
//!
//! Feature 2: Blog posts
//! Description: CRUD for posts owned by users
//! Depends on: 1
//! ```
//!
//! Output with no recognisable feature falls back to a single feature built
//! from the goal text.

use regex::Regex;
use std::sync::LazyLock;

use super::clean::pre_clean;
use super::keys::{FeatureKey, parse_id_list, split_key_line};
use crate::project::{Feature, Project};

static FEATURE_HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:#{1,6}\s*)?(?:\*\*|__)?\s*feature\s*#?(\d+)?\s*(?:\*\*|__)?\s*[:.)\-]\s*(?:\*\*|__)?\s*(.+?)\s*(?:\*\*|__)?\s*$",
    )
    .unwrap()
});

/// A feature as described by the generation service, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpec {
    /// Ordinal as written by the planner (`Feature 2`), if any.
    pub ordinal: Option<String>,
    pub name: String,
    pub description: String,
    /// Ordinals or names of prerequisite features.
    pub depends_on: Vec<String>,
}

impl FeatureSpec {
    /// Single feature covering the whole goal.
    pub fn fallback(goal: &str) -> Self {
        let name = goal
            .lines()
            .next()
            .unwrap_or(goal)
            .chars()
            .take(60)
            .collect::<String>()
            .trim()
            .to_string();
        Self {
            ordinal: None,
            name: if name.is_empty() { "Goal".to_string() } else { name },
            description: goal.trim().to_string(),
            depends_on: Vec::new(),
        }
    }
}

/// Parse a feature list. Returns an empty list when nothing matched.
pub fn parse_features(raw: &str) -> Vec<FeatureSpec> {
    let cleaned = pre_clean(raw, |l| FEATURE_HEADER_REGEX.is_match(l));
    let mut specs: Vec<FeatureSpec> = Vec::new();
    let mut in_description = false;

    for line in cleaned.lines() {
        if let Some(caps) = FEATURE_HEADER_REGEX.captures(line) {
            specs.push(FeatureSpec {
                ordinal: caps.get(1).map(|m| m.as_str().to_string()),
                name: caps[2].trim_end_matches(['*', '_']).trim().to_string(),
                description: String::new(),
                depends_on: Vec::new(),
            });
            in_description = false;
            continue;
        }
        let Some(spec) = specs.last_mut() else {
            continue;
        };

        match split_key_line(line).and_then(|(k, v)| FeatureKey::from_name(k).map(|k| (k, v))) {
            Some((FeatureKey::Description, value)) => {
                spec.description = value.trim().to_string();
                in_description = true;
            }
            Some((FeatureKey::DependsOn, value)) => {
                spec.depends_on = parse_id_list(value);
                in_description = false;
            }
            None if in_description && !line.trim().is_empty() => {
                spec.description.push('\n');
                spec.description.push_str(line.trim());
            }
            None => {}
        }
    }

    specs
}

/// Assign project-unique ids and resolve dependencies to feature ids.
///
/// Dependencies may name an ordinal from the same list, a feature name, or
/// an existing feature id. Anything else is dropped with a warning.
pub fn into_features(specs: Vec<FeatureSpec>, project: &Project) -> Vec<Feature> {
    let base = project.features.len();
    let ids: Vec<String> = (0..specs.len()).map(|i| format!("f{}", base + i + 1)).collect();

    let resolve = |dep: &str| -> Option<String> {
        if let Some(pos) = specs.iter().position(|s| s.ordinal.as_deref() == Some(dep)) {
            return Some(ids[pos].clone());
        }
        if let Some(pos) = specs.iter().position(|s| s.name.eq_ignore_ascii_case(dep)) {
            return Some(ids[pos].clone());
        }
        project
            .features
            .iter()
            .find(|f| f.id == dep || f.name.eq_ignore_ascii_case(dep))
            .map(|f| f.id.clone())
    };

    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let dependencies: Vec<String> = spec
                .depends_on
                .iter()
                .filter_map(|dep| {
                    let resolved = resolve(dep);
                    if resolved.is_none() {
                        tracing::warn!(feature = %spec.name, dependency = %dep, "dropping unknown feature dependency");
                    }
                    resolved
                })
                // only earlier features; a forward reference could never be satisfied in order
                .filter(|id| ids[..i].contains(id) || project.feature(id).is_some())
                .collect();
            Feature::new(&ids[i], &spec.name, &spec.description).with_dependencies(dependencies)
        })
        .collect()
}

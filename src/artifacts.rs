//! Artifact registry and placeholder resolution.
//!
//! Tasks may declare a symbolic name (`Defines: user_model`). When such a task
//! completes, its concrete location is recorded here so later prompts and
//! commands can refer to it as `{{user_model}}` or `{{user_model.dir}}`.
//!
//! Resolution never fails: an unknown token is left verbatim and reported,
//! because downstream verification catches an unresolved reference anyway.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::project::{Task, TaskAction};

static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*)(?:\.([A-Za-z_][A-Za-z0-9_]*))?\s*\}\}")
        .expect("token regex is a valid static pattern")
});

/// What kind of thing a registered name points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    File,
    Directory,
    Command,
    Value,
}

impl ArtifactKind {
    pub fn for_action(action: TaskAction) -> Self {
        match action {
            TaskAction::CreateFile | TaskAction::ModifyFile | TaskAction::DeleteFile => Self::File,
            TaskAction::CreateDirectory => Self::Directory,
            TaskAction::RunCommand => Self::Command,
            TaskAction::PromptUserInput => Self::Value,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Command => "command",
            Self::Value => "value",
        }
    }
}

/// A concrete location introduced by a completed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub location: String,
    /// Id of the task that defined it.
    pub defined_by: String,
    pub feature_id: String,
}

impl Artifact {
    /// Look up a dotted attribute (`{{name.attribute}}`).
    fn attribute(&self, attribute: &str) -> Option<String> {
        let path = Path::new(&self.location);
        match attribute {
            "location" | "path" => Some(self.location.clone()),
            "kind" => Some(self.kind.as_str().to_string()),
            "task" | "defined_by" => Some(self.defined_by.clone()),
            "feature" => Some(self.feature_id.clone()),
            "dir" | "parent" => path
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .filter(|p| !p.is_empty())
                .or_else(|| Some(".".to_string())),
            "file" | "filename" => path.file_name().map(|n| n.to_string_lossy().to_string()),
            "stem" | "name" => path.file_stem().map(|n| n.to_string_lossy().to_string()),
            _ => None,
        }
    }
}

/// Symbol table mapping names to artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRegistry {
    #[serde(default)]
    entries: BTreeMap<String, Artifact>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an artifact, returning the entry it replaced.
    pub fn register(&mut self, name: &str, artifact: Artifact) -> Option<Artifact> {
        self.entries.insert(name.to_string(), artifact)
    }

    /// Register whatever a completed task declared via `Defines:`.
    ///
    /// `location` is the task target after placeholder resolution.
    pub fn register_task(&mut self, feature_id: &str, task: &Task, location: &str) -> Option<String> {
        let name = task.defines.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        let replaced = self.register(
            name,
            Artifact {
                kind: ArtifactKind::for_action(task.action),
                location: location.to_string(),
                defined_by: task.id.clone(),
                feature_id: feature_id.to_string(),
            },
        );
        if let Some(old) = replaced {
            tracing::debug!(name, previous = %old.location, "artifact name redefined");
        }
        Some(name.to_string())
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Artifact)> {
        self.entries.iter()
    }

    /// Render the registry as prompt context.
    pub fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|(name, a)| format!("- {} ({}): {}", name, a.kind.as_str(), a.location))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Output of a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    /// Tokens that could not be resolved, left verbatim in `text`.
    pub unresolved: Vec<String>,
}

/// Substitute `{{name}}` and `{{name.attribute}}` tokens.
///
/// Registry entries win over user-supplied placeholders; placeholders only
/// answer bare names.
pub fn resolve(
    text: &str,
    registry: &ArtifactRegistry,
    placeholders: &BTreeMap<String, String>,
) -> Resolution {
    let mut unresolved = Vec::new();
    let resolved = TOKEN_REGEX.replace_all(text, |caps: &Captures| {
        let name = &caps[1];
        let attribute = caps.get(2).map(|m| m.as_str());

        let value = match (registry.get(name), attribute) {
            (Some(artifact), None) => Some(artifact.location.clone()),
            (Some(artifact), Some(attr)) => artifact.attribute(attr),
            (None, None) => placeholders.get(name).cloned(),
            (None, Some(_)) => None,
        };

        value.unwrap_or_else(|| {
            let token = caps[0].to_string();
            unresolved.push(token.clone());
            token
        })
    });

    for token in &unresolved {
        tracing::warn!(token = %token, "unresolved placeholder left verbatim");
    }

    Resolution {
        text: resolved.into_owned(),
        unresolved,
    }
}

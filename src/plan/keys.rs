//! Tolerant key matcher for `Key: value` metadata lines.
//!
//! Planners write keys bare (`Action: ...`), bulleted (`- Action: ...`),
//! emphasized (`**Action:** ...`, `__Action__: ...`) or quoted
//! (`"Action": ...`). All of these match; unknown keys do not.

use regex::Regex;
use std::sync::LazyLock;

static KEY_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:[-*+]\s+)?(?:\*\*|__|\*|_|["'`])?([A-Za-z][A-Za-z _\-]{0,30}?)\s*(?:\*\*|__|\*|_|["'`])?\s*:\s*(?:\*\*|__|\*|_)?\s*(.*?)\s*$"#,
    )
    .unwrap()
});

static MARGIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]\s+)?").unwrap());

/// Metadata keys recognised inside a task block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanKey {
    Action,
    Target,
    Description,
    Requirements,
    Dependencies,
    TestStep,
    Defines,
}

impl PlanKey {
    /// Only the canonical names and their spelling variants; generic words
    /// like `path` or `type` are left to the free text that uses them.
    pub fn from_name(name: &str) -> Option<Self> {
        match normalize(name).as_str() {
            "action" => Some(Self::Action),
            "target" => Some(Self::Target),
            "description" => Some(Self::Description),
            "requirements" | "requirement" => Some(Self::Requirements),
            "dependencies" | "dependson" => Some(Self::Dependencies),
            "teststep" => Some(Self::TestStep),
            "defines" => Some(Self::Defines),
            _ => None,
        }
    }
}

/// Metadata keys recognised inside a feature block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKey {
    Description,
    DependsOn,
}

impl FeatureKey {
    pub fn from_name(name: &str) -> Option<Self> {
        match normalize(name).as_str() {
            "description" | "summary" => Some(Self::Description),
            "dependson" | "dependencies" | "depends" | "deps" => Some(Self::DependsOn),
            _ => None,
        }
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Split a line into `(key name, value)` if it looks like a metadata line.
///
/// The caller decides whether the key is one it knows.
pub fn split_key_line(line: &str) -> Option<(&str, &str)> {
    let caps = KEY_LINE_REGEX.captures(line)?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    Some((key, value))
}

/// Leading indentation and list bullet of a line, e.g. `"  - "`.
pub fn margin(line: &str) -> &str {
    MARGIN_REGEX.find(line).map_or("", |m| m.as_str())
}

/// Strip wrapping quotes, backticks and emphasis from a single-line value.
pub fn unwrap_value(value: &str) -> String {
    let mut v = value.trim();
    loop {
        let before = v;
        for (open, close) in [("**", "**"), ("__", "__"), ("`", "`"), ("\"", "\""), ("'", "'")] {
            if v.len() >= open.len() + close.len() && v.starts_with(open) && v.ends_with(close) {
                v = v[open.len()..v.len() - close.len()].trim();
            }
        }
        if v == before {
            break;
        }
    }
    v.to_string()
}

/// Parse a dependency list such as `1.1, Task 1.2 and [2]`.
///
/// `none`, `n/a`, `-` and `[]` mean no dependencies.
pub fn parse_id_list(value: &str) -> Vec<String> {
    let cleaned = unwrap_value(value);
    let lowered = cleaned.to_lowercase();
    if matches!(lowered.as_str(), "" | "none" | "n/a" | "na" | "-" | "[]" | "nothing") {
        return Vec::new();
    }

    let mut ids: Vec<String> = Vec::new();
    for raw in cleaned
        .replace(" and ", ",")
        .split([',', ';', '[', ']', ' '])
    {
        let token = raw.trim().trim_matches(|c| matches!(c, '"' | '\'' | '`' | '#' | '(' | ')'));
        if token.is_empty() {
            continue;
        }
        let lower = token.to_lowercase();
        if matches!(lower.as_str(), "task" | "tasks" | "step" | "steps" | "feature" | "features") {
            continue;
        }
        let token = token.trim_end_matches(['.', ':']);
        if !token.is_empty() && !ids.iter().any(|i| i == token) {
            ids.push(token.to_string());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_forms_all_match() {
        for line in [
            "Action: CreateFile",
            "- Action: CreateFile",
            "**Action:** CreateFile",
            "**Action**: CreateFile",
            "__Action__: CreateFile",
            "\"Action\": CreateFile",
            "  * `Action`: CreateFile",
        ] {
            let (key, value) = split_key_line(line).unwrap_or_else(|| panic!("no match: {line}"));
            assert_eq!(PlanKey::from_name(key), Some(PlanKey::Action), "{line}");
            assert_eq!(unwrap_value(value), "CreateFile", "{line}");
        }
    }

    #[test]
    fn test_multi_word_keys() {
        let (key, _) = split_key_line("Test step: ls app").unwrap();
        assert_eq!(PlanKey::from_name(key), Some(PlanKey::TestStep));
        let (key, _) = split_key_line("**Depends on:** 1").unwrap();
        assert_eq!(PlanKey::from_name(key), Some(PlanKey::Dependencies));
        assert_eq!(FeatureKey::from_name("Depends on"), Some(FeatureKey::DependsOn));
    }

    #[test]
    fn test_unknown_key_is_not_a_plan_key() {
        let (key, _) = split_key_line("Note: keep it short").unwrap();
        assert_eq!(PlanKey::from_name(key), None);
    }

    #[test]
    fn test_generic_words_are_not_plan_keys() {
        for name in ["type", "path", "file", "command", "test", "spec", "details", "summary"] {
            assert_eq!(PlanKey::from_name(name), None, "{name}");
        }
    }

    #[test]
    fn test_margin_covers_indent_and_bullet() {
        assert_eq!(margin("Action: x"), "");
        assert_eq!(margin("- Action: x"), "- ");
        assert_eq!(margin("  * `Action`: x"), "  * ");
        assert_eq!(margin("**Action:** x"), "");
        assert_eq!(margin("    path: x"), "    ");
    }

    #[test]
    fn test_value_with_colon_is_kept() {
        let (_, value) = split_key_line("Target: python -c 'print(1)' && echo a:b").unwrap();
        assert_eq!(value, "python -c 'print(1)' && echo a:b");
    }

    #[test]
    fn test_unwrap_value_strips_nested_wrappers() {
        assert_eq!(unwrap_value("**`app/models.py`**"), "app/models.py");
        assert_eq!(unwrap_value("  \"ls -la\" "), "ls -la");
        assert_eq!(unwrap_value("plain"), "plain");
    }

    #[test]
    fn test_parse_id_list_variants() {
        assert_eq!(parse_id_list("1.1, 1.2"), vec!["1.1", "1.2"]);
        assert_eq!(parse_id_list("Task 1.1 and Task 2"), vec!["1.1", "2"]);
        assert_eq!(parse_id_list("[T1, T2]"), vec!["T1", "T2"]);
        assert_eq!(parse_id_list("#3; #4"), vec!["3", "4"]);
        assert!(parse_id_list("None").is_empty());
        assert!(parse_id_list("-").is_empty());
        assert!(parse_id_list("[]").is_empty());
    }
}

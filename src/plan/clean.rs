//! Pre-clean step for raw generation output.
//!
//! Removes code fences and any prose before the first task header so the
//! parser only sees task blocks.

use regex::Regex;
use std::sync::LazyLock;

static FENCE_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(```|~~~)[\w+\-]*\s*$").unwrap());

static FENCED_BLOCK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([\w+\-]*)[^\n]*\n(.*?)```").unwrap());

/// Strip framing artifacts from a plan response.
///
/// `is_header` identifies the first line worth keeping; when no line is a
/// header the whole (fence-stripped) text is kept.
pub fn pre_clean(raw: &str, is_header: impl Fn(&str) -> bool) -> String {
    let lines: Vec<&str> = raw
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !FENCE_LINE_REGEX.is_match(l))
        .collect();

    let start = lines.iter().position(|l| is_header(l)).unwrap_or(0);
    lines[start..].join("\n").trim().to_string()
}

/// First fenced code block in `text`, preferring one tagged with a shell
/// language when `prefer_shell` is set.
pub fn extract_code_block(text: &str, prefer_shell: bool) -> Option<String> {
    let blocks: Vec<(String, String)> = FENCED_BLOCK_REGEX
        .captures_iter(text)
        .map(|c| (c[1].to_lowercase(), c[2].trim_end().to_string()))
        .collect();

    if prefer_shell
        && let Some((_, body)) = blocks
            .iter()
            .find(|(lang, _)| matches!(lang.as_str(), "sh" | "bash" | "shell" | "zsh"))
    {
        return Some(body.clone());
    }

    blocks.into_iter().next().map(|(_, body)| body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_clean_drops_fences_and_preamble() {
        let raw = "Sure! Here is the plan:\n```markdown\n### Task 1: Setup\nAction: RunCommand\n```\n";
        let cleaned = pre_clean(raw, |l| l.contains("Task 1"));
        assert_eq!(cleaned, "### Task 1: Setup\nAction: RunCommand");
    }

    #[test]
    fn test_pre_clean_without_header_keeps_text() {
        let cleaned = pre_clean("Action: RunCommand\r\nTarget: ls\r\n", |_| false);
        assert_eq!(cleaned, "Action: RunCommand\nTarget: ls");
    }

    #[test]
    fn test_extract_code_block_prefers_shell() {
        let text = "Explanation\n```python\nprint(1)\n```\nthen\n```bash\npip install x\n```";
        assert_eq!(extract_code_block(text, true).as_deref(), Some("pip install x"));
        assert_eq!(extract_code_block(text, false).as_deref(), Some("print(1)"));
    }

    #[test]
    fn test_extract_code_block_none() {
        assert!(extract_code_block("no fences here", true).is_none());
    }
}

//! Built-in domain profiles.
//!
//! A profile carries the framework-specific heuristics the plan rules and
//! the scheduler apply: phase ranks, model-file detection, commands that
//! create their own directory, and known verification typos.

use regex::Regex;
use std::sync::LazyLock;

use crate::project::{Task, TaskAction};

/// Phase rank used to order eligible tasks.
pub mod rank {
    pub const SCAFFOLDING: u8 = 0;
    pub const DATA_MODEL: u8 = 1;
    pub const REQUEST_HANDLING: u8 = 2;
    pub const OTHER: u8 = 3;
    pub const PRESENTATION: u8 = 4;
    pub const TESTS: u8 = 5;
}

/// Maps a task target pattern to a phase rank.
#[derive(Debug, Clone)]
pub struct PhaseRule {
    pub pattern: Regex,
    pub rank: u8,
}

/// A command that creates a directory as a side effect.
///
/// The pattern's first capture group is the created directory.
#[derive(Debug, Clone)]
pub struct SelfCreatingRule {
    pub pattern: Regex,
}

/// Replacement for a typo the planner is known to produce.
#[derive(Debug, Clone)]
pub struct TypoFix {
    pub pattern: Regex,
    pub replacement: String,
}

/// Heuristics for one target framework.
#[derive(Debug, Clone)]
pub struct DomainProfile {
    pub name: String,
    pub phase_rules: Vec<PhaseRule>,
    /// Targets that define data-model entities.
    pub model_patterns: Vec<Regex>,
    /// Companion command inserted after a model task; `{dir}` is the
    /// target's parent directory, `{target}` the target itself.
    pub register_command: Option<String>,
    pub self_creating: Vec<SelfCreatingRule>,
    pub typo_fixes: Vec<TypoFix>,
    /// Verification run when the plan gives none.
    pub default_verification: String,
    /// Command that runs the feature tests; `None` skips test generation.
    pub test_command: Option<String>,
    /// Path for a generated test file; `{feature}` is the feature slug.
    pub test_file_pattern: Option<String>,
}

static CREATE_DIR_CMD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*mkdir\s+(?:-p\s+)?([^\s;&|]+)").expect("mkdir pattern is valid")
});

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in profile pattern is valid")
}

fn rule(pattern: &str, rank: u8) -> PhaseRule {
    PhaseRule {
        pattern: re(pattern),
        rank,
    }
}

fn fix(pattern: &str, replacement: &str) -> TypoFix {
    TypoFix {
        pattern: re(pattern),
        replacement: replacement.to_string(),
    }
}

fn common_typos() -> Vec<TypoFix> {
    vec![
        fix(r"\bpyhton3?\b", "python"),
        fix(r"\bpytohn3?\b", "python"),
        fix(r"\bpip\s+isntall\b", "pip install"),
        fix(r"\bnpm\s+tset\b", "npm test"),
        fix(r"\bnpm\s+isntall\b", "npm install"),
    ]
}

fn common_rules() -> Vec<PhaseRule> {
    vec![
        rule(r"(?i)(^|/)tests?(/|_|\.)|(\.|_)(test|spec)\.[a-z]+$", rank::TESTS),
        rule(
            r"(?i)\.(html|css|scss|jsx|tsx|vue)$|(^|/)(templates|static|public|components)/",
            rank::PRESENTATION,
        ),
    ]
}

impl DomainProfile {
    pub const NAMES: &'static [&'static str] = &["generic", "django", "node"];

    /// Look up a built-in profile by name (case-insensitive).
    pub fn builtin(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "generic" => Some(Self::generic()),
            "django" => Some(Self::django()),
            "node" => Some(Self::node()),
            _ => None,
        }
    }

    pub fn generic() -> Self {
        Self {
            name: "generic".to_string(),
            phase_rules: common_rules(),
            model_patterns: Vec::new(),
            register_command: None,
            self_creating: Vec::new(),
            typo_fixes: common_typos(),
            default_verification: "ls".to_string(),
            test_command: None,
            test_file_pattern: None,
        }
    }

    pub fn django() -> Self {
        let mut phase_rules = common_rules();
        phase_rules.extend([
            rule(r"django-admin\s+startproject|manage\.py\s+startapp", rank::SCAFFOLDING),
            rule(r"(^|/)(models\.py|models/)|makemigrations|migrate\b", rank::DATA_MODEL),
            rule(r"(^|/)(views|urls|forms|serializers|api)(\.py|/)", rank::REQUEST_HANDLING),
            rule(r"(^|/)admin\.py$", rank::OTHER),
        ]);
        let mut typo_fixes = common_typos();
        typo_fixes.extend([
            fix(r"\bmanage\s+\.py\b", "manage.py"),
            fix(r"\bmanange\.py\b", "manage.py"),
        ]);

        Self {
            name: "django".to_string(),
            phase_rules,
            model_patterns: vec![re(r"(^|/)models\.py$"), re(r"(^|/)models/[^/]+\.py$")],
            register_command: Some(
                "python manage.py makemigrations {dir} && python manage.py migrate".to_string(),
            ),
            self_creating: vec![
                SelfCreatingRule {
                    pattern: re(r"manage\.py\s+startapp\s+([A-Za-z_][\w]*)"),
                },
                SelfCreatingRule {
                    pattern: re(r"django-admin\s+startproject\s+([A-Za-z_][\w]*)(?:\s+\.)?"),
                },
            ],
            typo_fixes,
            default_verification: "ls".to_string(),
            test_command: Some("python manage.py test".to_string()),
            test_file_pattern: Some("tests/test_{feature}.py".to_string()),
        }
    }

    pub fn node() -> Self {
        let mut phase_rules = common_rules();
        phase_rules.extend([
            rule(r"npm\s+init|npx\s+create-|npm\s+create\s", rank::SCAFFOLDING),
            rule(r"(^|/)(models|schemas?|entities)/", rank::DATA_MODEL),
            rule(r"(^|/)(routes|controllers|handlers|api)/", rank::REQUEST_HANDLING),
        ]);

        Self {
            name: "node".to_string(),
            phase_rules,
            model_patterns: Vec::new(),
            register_command: None,
            self_creating: vec![
                SelfCreatingRule {
                    pattern: re(r"npx\s+create-[\w-]+(?:@\S+)?\s+([^\s;&|]+)"),
                },
                SelfCreatingRule {
                    pattern: re(r"npm\s+create\s+[\w-]+(?:@\S+)?\s+([^\s;&|]+)"),
                },
            ],
            typo_fixes: common_typos(),
            default_verification: "ls".to_string(),
            test_command: Some("npm test".to_string()),
            test_file_pattern: Some("tests/{feature}.test.js".to_string()),
        }
    }

    /// Phase rank for a task; lower runs first among eligible tasks.
    pub fn phase_rank(&self, task: &Task) -> u8 {
        if task.action == TaskAction::CreateDirectory {
            return rank::SCAFFOLDING;
        }
        self.phase_rules
            .iter()
            .find(|r| r.pattern.is_match(&task.target))
            .map(|r| r.rank)
            .unwrap_or(rank::OTHER)
    }

    pub fn is_model_file(&self, target: &str) -> bool {
        self.model_patterns.iter().any(|p| p.is_match(target))
    }

    /// Directory a command creates on its own, if any.
    pub fn created_directory(&self, command: &str) -> Option<String> {
        std::iter::once(&*CREATE_DIR_CMD)
            .chain(self.self_creating.iter().map(|r| &r.pattern))
            .find_map(|p| p.captures(command))
            .and_then(|c| c.get(1))
            .map(|m| normalize_dir(m.as_str()))
    }

    /// Apply every known typo fix to a command.
    pub fn correct_typos(&self, command: &str) -> String {
        self.typo_fixes
            .iter()
            .fold(command.to_string(), |acc, fix| {
                fix.pattern.replace_all(&acc, fix.replacement.as_str()).into_owned()
            })
    }

    /// Render the companion "register" command for a model file target.
    pub fn register_command_for(&self, target: &str) -> Option<String> {
        let template = self.register_command.as_ref()?;
        let dir = std::path::Path::new(target)
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        // models/ package: the app is one level further up
        let dir = if dir == "models" {
            std::path::Path::new(target)
                .parent()
                .and_then(|p| p.parent())
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        } else {
            dir
        };
        Some(
            template
                .replace("{dir}", &dir)
                .replace("{target}", target)
                .replace("  ", " ")
                .trim()
                .to_string(),
        )
    }

    /// Test file path for a feature, if this profile generates tests.
    pub fn test_file_for(&self, feature_name: &str) -> Option<String> {
        let slug: String = feature_name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>()
            .split('_')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        self.test_file_pattern
            .as_ref()
            .map(|p| p.replace("{feature}", &slug))
    }
}

/// Normalise a directory path for comparison (`./app/` -> `app`).
pub fn normalize_dir(dir: &str) -> String {
    let trimmed = dir.trim().trim_end_matches('/');
    trimmed.strip_prefix("./").unwrap_or(trimmed).to_string()
}

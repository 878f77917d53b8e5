//! Layered configuration for wright.
//!
//! Settings are read from `.wright/wright.toml`, then overridden by
//! environment variables, then by CLI arguments.
//!
//! # Configuration File Format
//!
//! ```toml
//! [generation]
//! provider = "http"
//! endpoint = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "WRIGHT_API_KEY"
//! temperature = 0.2
//!
//! [limits]
//! max_task_retries = 3
//! max_plan_attempts = 3
//!
//! [breaker]
//! identical_failures = 3
//! cycle_period = 2
//!
//! [sandbox]
//! command_timeout_secs = 600
//! deny = ["rm -rf /"]
//!
//! [[sandbox.substitutions]]
//! pattern = "^pip install (.+)$"
//! replacement = "python -m pip install $1"
//! reason = "use interpreter-bound pip"
//!
//! [review]
//! enabled = false
//!
//! [profile]
//! name = "django"
//! ```

mod profile;

pub use profile::{DomainProfile, PhaseRule, SelfCreatingRule, TypoFix, normalize_dir, rank};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which generation backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions` endpoint.
    #[default]
    Http,
    /// Local CLI that reads the prompt on stdin.
    Command,
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "command" | "cli" => Ok(Self::Command),
            _ => anyhow::bail!("Invalid provider '{}': expected 'http' or 'command'", s),
        }
    }
}

/// Generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSection {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "WRIGHT_API_KEY".to_string()
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_generation_timeout() -> u64 {
    180
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            command: default_command(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

/// Attempt caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_cap")]
    pub max_task_retries: u32,
    #[serde(default = "default_cap")]
    pub max_plan_attempts: u32,
    #[serde(default = "default_cap")]
    pub max_test_attempts: u32,
    /// Credential/network recoveries per generation call.
    #[serde(default = "default_cap")]
    pub max_upstream_retries: u32,
}

fn default_cap() -> u32 {
    3
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_task_retries: default_cap(),
            max_plan_attempts: default_cap(),
            max_test_attempts: default_cap(),
            max_upstream_retries: default_cap(),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_identical_failures")]
    pub identical_failures: usize,
    /// Length of the repeating cycle to detect; 0 disables cycle detection.
    #[serde(default = "default_cycle_period")]
    pub cycle_period: usize,
    #[serde(default = "default_history")]
    pub history: usize,
}

fn default_identical_failures() -> usize {
    3
}

fn default_cycle_period() -> usize {
    2
}

fn default_history() -> usize {
    8
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            identical_failures: default_identical_failures(),
            cycle_period: default_cycle_period(),
            history: default_history(),
        }
    }
}

/// A rewrite rule applied by the sandbox before running a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRule {
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub reason: String,
}

/// Sandbox policy for shell commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSection {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Substrings that reject a command outright.
    #[serde(default = "default_deny")]
    pub deny: Vec<String>,
    #[serde(default)]
    pub substitutions: Vec<SubstitutionRule>,
    /// Substrings that require explicit confirmation before running.
    #[serde(default = "default_confirm")]
    pub confirm: Vec<String>,
}

fn default_command_timeout() -> u64 {
    600
}

fn default_deny() -> Vec<String> {
    vec!["rm -rf /".to_string(), "mkfs".to_string(), ":(){".to_string()]
}

fn default_confirm() -> Vec<String> {
    vec!["sudo ".to_string(), "rm -rf".to_string()]
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            deny: default_deny(),
            substitutions: Vec::new(),
            confirm: default_confirm(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSection {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSection {
    #[serde(default = "default_profile")]
    pub name: String,
}

fn default_profile() -> String {
    "generic".to_string()
}

impl Default for ProfileSection {
    fn default() -> Self {
        Self {
            name: default_profile(),
        }
    }
}

/// The complete wright.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WrightToml {
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub review: ReviewSection,
    #[serde(default)]
    pub profile: ProfileSection,
}

impl WrightToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse wright.toml")
    }

    /// Load `.wright/wright.toml`, or defaults when it does not exist.
    pub fn load_or_default(wright_dir: &Path) -> Result<Self> {
        let config_path = wright_dir.join("wright.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize wright.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides using `lookup` as the variable source.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(model) = lookup("WRIGHT_MODEL") {
            self.generation.model = model;
        }
        if let Some(endpoint) = lookup("WRIGHT_ENDPOINT") {
            self.generation.endpoint = endpoint;
        }
        if let Some(provider) = lookup("WRIGHT_PROVIDER") {
            self.generation.provider = provider.parse()?;
        }
        if let Some(profile) = lookup("WRIGHT_PROFILE") {
            self.profile.name = profile;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if DomainProfile::builtin(&self.profile.name).is_none() {
            warnings.push(format!(
                "Unknown profile '{}': expected one of {}",
                self.profile.name,
                DomainProfile::NAMES.join(", ")
            ));
        }

        if self.limits.max_task_retries == 0 {
            warnings.push("max_task_retries is 0: failing tasks are never remediated".to_string());
        }

        if self.breaker.identical_failures > 0
            && (self.limits.max_task_retries as usize) < self.breaker.identical_failures
        {
            warnings.push(format!(
                "max_task_retries ({}) is below breaker.identical_failures ({}): \
                 the identical-failure breaker can never trip",
                self.limits.max_task_retries, self.breaker.identical_failures
            ));
        }

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            warnings.push(format!(
                "temperature {} is outside 0.0..=2.0",
                self.generation.temperature
            ));
        }

        for rule in &self.sandbox.substitutions {
            if let Err(e) = regex::Regex::new(&rule.pattern) {
                warnings.push(format!(
                    "Invalid substitution pattern '{}': {}",
                    rule.pattern, e
                ));
            }
        }

        warnings
    }
}

/// Merged configuration (file, then environment, then CLI).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub project_dir: PathBuf,
    /// Path to the `.wright` directory.
    pub wright_dir: PathBuf,
    pub toml: WrightToml,
    pub verbose: bool,
    /// Answer every confirmation with yes.
    pub yes: bool,
}

impl EngineConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let wright_dir = project_dir.join(".wright");
        let mut toml = WrightToml::load_or_default(&wright_dir)?;
        toml.apply_env(|key| std::env::var(key).ok())?;

        Ok(Self {
            project_dir,
            wright_dir,
            toml,
            verbose: false,
            yes: false,
        })
    }

    /// Create an EngineConfig with CLI overrides.
    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        yes: bool,
        profile: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.yes = yes;
        if let Some(profile) = profile {
            config.toml.profile.name = profile;
        }
        Ok(config)
    }

    /// Resolve the configured domain profile.
    pub fn profile(&self) -> Result<DomainProfile> {
        DomainProfile::builtin(&self.toml.profile.name).with_context(|| {
            format!(
                "Unknown profile '{}': expected one of {}",
                self.toml.profile.name,
                DomainProfile::NAMES.join(", ")
            )
        })
    }

    /// API key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.toml.generation.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn config_file(&self) -> PathBuf {
        self.wright_dir.join("wright.toml")
    }

    pub fn project_file(&self) -> PathBuf {
        self.wright_dir.join("project.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.wright_dir.join("logs")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = WrightToml::parse("").unwrap();
        assert_eq!(toml.limits.max_task_retries, 3);
        assert_eq!(toml.breaker.identical_failures, 3);
        assert_eq!(toml.breaker.cycle_period, 2);
        assert_eq!(toml.generation.provider, ProviderKind::Http);
        assert_eq!(toml.profile.name, "generic");
        assert!(!toml.review.enabled);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let content = r#"
[generation]
provider = "command"
command = "llm"
temperature = 0.5

[limits]
max_task_retries = 5

[[sandbox.substitutions]]
pattern = "^pip install (.+)$"
replacement = "python -m pip install $1"
reason = "interpreter-bound pip"

[profile]
name = "django"
"#;
        let toml = WrightToml::parse(content).unwrap();
        assert_eq!(toml.generation.provider, ProviderKind::Command);
        assert_eq!(toml.generation.command, "llm");
        assert_eq!(toml.limits.max_task_retries, 5);
        assert_eq!(toml.limits.max_plan_attempts, 3);
        assert_eq!(toml.sandbox.substitutions.len(), 1);
        assert_eq!(toml.profile.name, "django");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut toml = WrightToml::parse("[generation]\nmodel = \"file-model\"\n").unwrap();
        let env: HashMap<&str, &str> =
            HashMap::from([("WRIGHT_MODEL", "env-model"), ("WRIGHT_PROVIDER", "command")]);
        toml.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(toml.generation.model, "env-model");
        assert_eq!(toml.generation.provider, ProviderKind::Command);
    }

    #[test]
    fn test_env_invalid_provider_is_error() {
        let mut toml = WrightToml::default();
        let result = toml.apply_env(|k| (k == "WRIGHT_PROVIDER").then(|| "carrier-pigeon".into()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_warns_when_breaker_unreachable() {
        let toml = WrightToml::parse("[limits]\nmax_task_retries = 2\n").unwrap();
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("can never trip")));
    }

    #[test]
    fn test_validate_warns_on_unknown_profile_and_bad_pattern() {
        let content = r#"
[profile]
name = "cobol"

[[sandbox.substitutions]]
pattern = "(unclosed"
replacement = "x"
"#;
        let warnings = WrightToml::parse(content).unwrap().validate();
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wright.toml");
        let mut toml = WrightToml::default();
        toml.profile.name = "node".into();
        toml.save(&path).unwrap();

        let loaded = WrightToml::load(&path).unwrap();
        assert_eq!(loaded.profile.name, "node");
    }

    #[test]
    fn test_engine_config_cli_profile_override() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".wright")).unwrap();
        std::fs::write(
            dir.path().join(".wright/wright.toml"),
            "[profile]\nname = \"node\"\n",
        )
        .unwrap();

        let config = EngineConfig::with_cli_args(
            dir.path().to_path_buf(),
            true,
            false,
            Some("django".into()),
        )
        .unwrap();
        assert!(config.verbose);
        assert_eq!(config.profile().unwrap().name, "django");
        assert!(config.project_file().ends_with(".wright/project.json"));
    }
}

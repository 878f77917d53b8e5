//! Sandboxed command execution.
//!
//! Every command passes the policy before it is spawned:
//! 1. deny-list match -> rejected outright
//! 2. substitution rule match -> the replacement runs instead and is reported
//! 3. confirm-list match -> the user must approve it
//!
//! Commands run under `sh -c` in the given working directory. The child is
//! killed when the timeout fires or the cancellation token is triggered.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::interaction::UserPrompter;
use crate::engine_config::SandboxSection;
use crate::errors::ExecError;

/// A command the policy replaced with a safer alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub original: String,
    pub substitute: String,
    pub reason: String,
}

/// A substitution and how its replacement ended; `exit_code` is `None` when
/// the replacement never produced one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionRun {
    pub substitution: Substitution,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub substitution: Option<Substitution>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stable text describing a failed run, used for failure signatures.
    pub fn failure_payload(&self) -> String {
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let mut payload = format!("exit code {}", code);
        for stream in [self.stderr.trim(), self.stdout.trim()] {
            if !stream.is_empty() {
                payload.push('\n');
                payload.push_str(stream);
            }
        }
        payload
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecError>;
}

/// What the policy decided for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Reject(String),
    Substitute(Substitution),
    Confirm,
}

#[derive(Debug, Clone)]
struct CompiledSubstitution {
    pattern: Regex,
    replacement: String,
    reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SandboxPolicy {
    deny: Vec<String>,
    substitutions: Vec<CompiledSubstitution>,
    confirm: Vec<String>,
}

impl SandboxPolicy {
    pub fn from_section(section: &SandboxSection) -> Result<Self> {
        let substitutions = section
            .substitutions
            .iter()
            .map(|rule| {
                Ok(CompiledSubstitution {
                    pattern: Regex::new(&rule.pattern).with_context(|| {
                        format!("Invalid substitution pattern '{}'", rule.pattern)
                    })?,
                    replacement: rule.replacement.clone(),
                    reason: rule.reason.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            deny: section.deny.clone(),
            substitutions,
            confirm: section.confirm.clone(),
        })
    }

    pub fn evaluate(&self, command: &str) -> PolicyDecision {
        let trimmed = command.trim();

        if let Some(denied) = self.deny.iter().find(|d| trimmed.contains(d.as_str())) {
            return PolicyDecision::Reject(format!("matches denied pattern '{}'", denied));
        }

        for rule in &self.substitutions {
            if rule.pattern.is_match(trimmed) {
                let substitute = rule.pattern.replace(trimmed, rule.replacement.as_str());
                if substitute != trimmed {
                    return PolicyDecision::Substitute(Substitution {
                        original: trimmed.to_string(),
                        substitute: substitute.into_owned(),
                        reason: rule.reason.clone(),
                    });
                }
            }
        }

        if self.confirm.iter().any(|c| trimmed.contains(c.as_str())) {
            return PolicyDecision::Confirm;
        }

        PolicyDecision::Allow
    }
}

/// Runs commands through `sh -c` after applying the policy.
pub struct ShellExecutor {
    policy: SandboxPolicy,
    timeout: Duration,
    prompter: Option<Arc<dyn UserPrompter>>,
}

impl ShellExecutor {
    pub fn new(policy: SandboxPolicy, timeout_secs: u64) -> Self {
        Self {
            policy,
            timeout: Duration::from_secs(timeout_secs),
            prompter: None,
        }
    }

    /// Ask this prompter before running commands on the confirm list.
    pub fn with_prompter(mut self, prompter: Arc<dyn UserPrompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecError> {
        let (effective, substitution) = match self.policy.evaluate(command) {
            PolicyDecision::Reject(reason) => {
                tracing::warn!(command, reason = %reason, "command rejected by sandbox policy");
                return Err(ExecError::PolicyRejected {
                    command: command.to_string(),
                    reason,
                });
            }
            PolicyDecision::Substitute(sub) => (sub.substitute.clone(), Some(sub)),
            PolicyDecision::Confirm => {
                if let Some(prompter) = &self.prompter {
                    let question = format!("Run sensitive command `{}`?", command);
                    let approved = tokio::select! {
                        _ = cancel.cancelled() => return Err(ExecError::Cancelled),
                        answer = prompter.confirm(&question, false) => answer.unwrap_or(false),
                    };
                    if !approved {
                        return Err(ExecError::UserDeclined {
                            command: command.to_string(),
                        });
                    }
                }
                (command.to_string(), None)
            }
            PolicyDecision::Allow => (command.to_string(), None),
        };
        let fail = |err: ExecError| err.with_substitution(substitution.as_ref());

        if cancel.is_cancelled() {
            return Err(fail(ExecError::Cancelled));
        }

        tracing::debug!(command = %effective, cwd = %cwd.display(), "running command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&effective)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fail(ExecError::Io(e)))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(fail(ExecError::Cancelled)),
            result = timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(output) => output.map_err(|e| fail(ExecError::Io(e)))?,
                Err(_) => return Err(fail(ExecError::Timeout { secs: self.timeout.as_secs() })),
            },
        };

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            substitution,
        };
        tracing::debug!(command = %effective, exit_code = ?output.exit_code, "command finished");
        Ok(output)
    }
}

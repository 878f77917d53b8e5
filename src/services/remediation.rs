//! Automated repair of failing tasks.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::generation::{ChatMessage, GenerationService};
use super::sandbox::{CommandExecutor, SubstitutionRun};
use crate::plan::extract_code_block;
use crate::project::Task;

/// Everything the repair service gets to see about a failure.
#[derive(Debug, Clone)]
pub struct RepairRequest {
    pub feature_id: String,
    pub task: Task,
    /// The command or action description that failed.
    pub failing_command: String,
    /// One entry per failed attempt, oldest first.
    pub error_records: Vec<String>,
    /// Planning context snapshot (notes, artifacts, sandbox feedback).
    pub project_context: String,
}

/// What a repair attempt did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// The repair itself ran cleanly; the caller still re-verifies the task.
    pub repaired: bool,
    /// Sandbox substitutions made while running repair commands.
    pub substitutions: Vec<SubstitutionRun>,
}

impl RepairReport {
    pub fn new(repaired: bool) -> Self {
        Self {
            repaired,
            substitutions: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Remediator: Send + Sync {
    /// Try to repair the failure.
    async fn repair(&self, request: &RepairRequest, cancel: &CancellationToken) -> Result<RepairReport>;
}

const REPAIR_SYSTEM: &str = "You repair failing steps in a software project. \
Reply with exactly one fenced shell code block containing the commands that fix \
the failure. Commands run from the project root. Do not explain.";

/// Asks the generation service for a corrective shell command and runs it.
pub struct GenerationRemediator {
    generation: Arc<dyn GenerationService>,
    executor: Arc<dyn CommandExecutor>,
    root: PathBuf,
    temperature: f32,
}

impl GenerationRemediator {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        executor: Arc<dyn CommandExecutor>,
        root: impl Into<PathBuf>,
        temperature: f32,
    ) -> Self {
        Self {
            generation,
            executor,
            root: root.into(),
            temperature,
        }
    }

    fn build_prompt(request: &RepairRequest) -> String {
        let mut prompt = format!(
            "Task {} ({}) in feature {} failed.\n\nDescription: {}\nTarget: {}\nFailing step: {}\n",
            request.task.id,
            request.task.action,
            request.feature_id,
            request.task.description,
            request.task.target,
            request.failing_command,
        );
        if let Some(verify) = &request.task.verification_command {
            prompt.push_str(&format!("Verification: {}\n", verify));
        }
        prompt.push_str("\n## Errors\n");
        for (i, record) in request.error_records.iter().enumerate() {
            prompt.push_str(&format!("### Attempt {}\n{}\n", i + 1, record.trim()));
        }
        if !request.project_context.trim().is_empty() {
            prompt.push_str("\n");
            prompt.push_str(&request.project_context);
            prompt.push('\n');
        }
        prompt
    }
}

#[async_trait]
impl Remediator for GenerationRemediator {
    async fn repair(&self, request: &RepairRequest, cancel: &CancellationToken) -> Result<RepairReport> {
        let reply = self
            .generation
            .invoke(
                REPAIR_SYSTEM,
                &[ChatMessage::user(Self::build_prompt(request))],
                self.temperature,
            )
            .await?;

        let Some(fix) = extract_code_block(&reply, true) else {
            tracing::warn!(task = %request.task.id, "remediation reply contained no command");
            return Ok(RepairReport::new(false));
        };

        tracing::info!(task = %request.task.id, command = %fix, "running remediation");
        let mut report = RepairReport::new(false);
        match self.executor.run(&fix, &self.root, cancel).await {
            Ok(output) => {
                if !output.success() {
                    tracing::warn!(
                        task = %request.task.id,
                        exit_code = ?output.exit_code,
                        "remediation command failed"
                    );
                }
                report.repaired = output.success();
                if let Some(substitution) = output.substitution {
                    report.substitutions.push(SubstitutionRun {
                        substitution,
                        exit_code: output.exit_code,
                    });
                }
            }
            Err(err) => {
                let (err, substitution) = err.into_parts();
                tracing::warn!(task = %request.task.id, error = %err, "remediation command did not run");
                if let Some(substitution) = substitution {
                    report.substitutions.push(SubstitutionRun {
                        substitution,
                        exit_code: None,
                    });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_config::{SandboxSection, SubstitutionRule};
    use crate::errors::GenerationError;
    use crate::project::TaskAction;
    use crate::services::{SandboxPolicy, ShellExecutor};
    use tempfile::tempdir;

    struct Canned(String);

    #[async_trait]
    impl GenerationService for Canned {
        async fn invoke(
            &self,
            _system: &str,
            _conversation: &[ChatMessage],
            _temperature: f32,
        ) -> Result<String, GenerationError> {
            Ok(self.0.clone())
        }

        async fn update_credential(&self, _secret: &str) -> Result<()> {
            Ok(())
        }
    }

    fn request() -> RepairRequest {
        RepairRequest {
            feature_id: "f1".into(),
            task: Task::new("1", TaskAction::RunCommand, "make build")
                .with_verification("test -f built.txt"),
            failing_command: "make build".into(),
            error_records: vec!["exit code 2\nNo rule to make target".into()],
            project_context: String::new(),
        }
    }

    fn remediator(reply: &str, root: &std::path::Path) -> GenerationRemediator {
        GenerationRemediator::new(
            Arc::new(Canned(reply.to_string())),
            Arc::new(ShellExecutor::new(SandboxPolicy::default(), 10)),
            root,
            0.2,
        )
    }

    #[test]
    fn test_prompt_includes_errors() {
        let prompt = GenerationRemediator::build_prompt(&request());
        assert!(prompt.contains("Failing step: make build"));
        assert!(prompt.contains("### Attempt 1\nexit code 2"));
        assert!(prompt.contains("Verification: test -f built.txt"));
    }

    #[tokio::test]
    async fn test_successful_fix() {
        let dir = tempdir().unwrap();
        let fix = remediator("```sh\ntouch built.txt\n```", dir.path());
        let report = fix.repair(&request(), &CancellationToken::new()).await.unwrap();
        assert!(report.repaired);
        assert!(report.substitutions.is_empty());
        assert!(dir.path().join("built.txt").exists());
    }

    #[tokio::test]
    async fn test_failing_fix_reports_false() {
        let dir = tempdir().unwrap();
        let fix = remediator("```bash\nexit 3\n```", dir.path());
        assert!(!fix.repair(&request(), &CancellationToken::new()).await.unwrap().repaired);
    }

    #[tokio::test]
    async fn test_reply_without_command() {
        let dir = tempdir().unwrap();
        let fix = remediator("", dir.path());
        assert_eq!(
            fix.repair(&request(), &CancellationToken::new()).await.unwrap(),
            RepairReport::new(false)
        );
    }

    #[tokio::test]
    async fn test_substituted_fix_is_reported() {
        let dir = tempdir().unwrap();
        let section = SandboxSection {
            substitutions: vec![SubstitutionRule {
                pattern: "^pip install (.+)$".into(),
                replacement: "echo pip $1".into(),
                reason: "use interpreter-bound pip".into(),
            }],
            ..SandboxSection::default()
        };
        let fix = GenerationRemediator::new(
            Arc::new(Canned("```sh\npip install requests\n```".into())),
            Arc::new(ShellExecutor::new(SandboxPolicy::from_section(&section).unwrap(), 10)),
            dir.path(),
            0.2,
        );
        let report = fix.repair(&request(), &CancellationToken::new()).await.unwrap();
        assert!(report.repaired);
        assert_eq!(report.substitutions.len(), 1);
        assert_eq!(report.substitutions[0].substitution.substitute, "echo pip requests");
        assert_eq!(report.substitutions[0].exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_substitute_that_times_out_is_still_reported() {
        let dir = tempdir().unwrap();
        let section = SandboxSection {
            substitutions: vec![SubstitutionRule {
                pattern: "^pip install (.+)$".into(),
                replacement: "sleep 5".into(),
                reason: "use interpreter-bound pip".into(),
            }],
            ..SandboxSection::default()
        };
        let fix = GenerationRemediator::new(
            Arc::new(Canned("```sh\npip install requests\n```".into())),
            Arc::new(ShellExecutor::new(SandboxPolicy::from_section(&section).unwrap(), 1)),
            dir.path(),
            0.2,
        );
        let report = fix.repair(&request(), &CancellationToken::new()).await.unwrap();
        assert!(!report.repaired);
        assert_eq!(report.substitutions.len(), 1);
        assert_eq!(report.substitutions[0].exit_code, None);
    }
}

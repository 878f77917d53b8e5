//! Generation service clients.
//!
//! Two backends:
//! - `HttpGenerationService` talks to an OpenAI-compatible `/chat/completions`
//!   endpoint.
//! - `CommandGenerationService` pipes the rendered conversation into a local
//!   CLI on stdin and reads the reply from stdout.
//!
//! Both classify failures into `GenerationError` so the engine can tell an
//! expired credential or a flaky network apart from a broken request.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::engine_config::GenerationSection;
use crate::errors::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn invoke(
        &self,
        system: &str,
        conversation: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, GenerationError>;

    /// Replace the credential used for subsequent calls.
    async fn update_credential(&self, secret: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct HttpGenerationService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: RwLock<Option<String>>,
}

impl HttpGenerationService {
    pub fn new(section: &GenerationSection, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: section.endpoint.trim_end_matches('/').to_string(),
            model: section.model.clone(),
            api_key: RwLock::new(api_key),
        })
    }

    fn classify_send_error(err: reqwest::Error) -> GenerationError {
        if err.is_connect() || err.is_timeout() {
            GenerationError::Transient(err.to_string())
        } else {
            GenerationError::Other(anyhow::Error::new(err).context("Generation request failed"))
        }
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn invoke(
        &self,
        system: &str,
        conversation: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(ChatMessage {
            role: Role::System,
            content: system.to_string(),
        });
        messages.extend_from_slice(conversation);

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&body);
        if let Some(key) = self.api_key.read().await.as_deref() {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(Self::classify_send_error)?;
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let detail = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Authentication(format!("{}: {}", status, detail.trim())));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(GenerationError::Transient(format!("endpoint returned {}", status)));
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Generation endpoint returned {}: {}", status, detail.trim()).into());
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .context("Failed to parse generation response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Generation response contained no message"))?;

        tracing::debug!(model = %self.model, chars = content.len(), "generation complete");
        Ok(content)
    }

    async fn update_credential(&self, secret: &str) -> anyhow::Result<()> {
        *self.api_key.write().await = Some(secret.trim().to_string());
        Ok(())
    }
}

/// Runs a local generation CLI with the conversation on stdin.
pub struct CommandGenerationService {
    command: String,
    timeout: Duration,
    credential_env: String,
    credential: RwLock<Option<String>>,
}

impl CommandGenerationService {
    pub fn new(section: &GenerationSection, api_key: Option<String>) -> Self {
        Self {
            command: section.command.clone(),
            timeout: Duration::from_secs(section.timeout_secs),
            credential_env: section.api_key_env.clone(),
            credential: RwLock::new(api_key),
        }
    }
}

/// Flatten a conversation into a single prompt for CLI backends.
pub fn render_transcript(system: &str, conversation: &[ChatMessage]) -> String {
    let mut prompt = String::from(system.trim());
    for message in conversation {
        let heading = match message.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(&format!("\n\n## {}\n{}", heading, message.content.trim()));
    }
    prompt.push('\n');
    prompt
}

fn looks_like_auth_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    ["unauthorized", "authentication", "invalid api key", "401"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[async_trait]
impl GenerationService for CommandGenerationService {
    async fn invoke(
        &self,
        system: &str,
        conversation: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, GenerationError> {
        let prompt = render_transcript(system, conversation);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .env("WRIGHT_TEMPERATURE", temperature.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(key) = self.credential.read().await.as_deref() {
            cmd.env(&self.credential_env, key);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn generation command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to generation command")?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for generation command")?,
            Err(_) => {
                return Err(GenerationError::Transient(format!(
                    "generation command timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            if looks_like_auth_failure(&stderr) {
                return Err(GenerationError::Authentication(stderr.trim().to_string()));
            }
            return Err(anyhow::anyhow!(
                "Generation command failed ({}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )
            .into());
        }
        if stdout.trim().is_empty() {
            return Err(anyhow::anyhow!("Generation command produced no output").into());
        }
        Ok(stdout)
    }

    async fn update_credential(&self, secret: &str) -> anyhow::Result<()> {
        *self.credential.write().await = Some(secret.trim().to_string());
        Ok(())
    }
}

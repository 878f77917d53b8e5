//! User interaction: free text, file selection, confirmations and manual steps.
//!
//! `ConsolePrompter` drives dialoguer on a blocking thread so the worker
//! never stalls the runtime. `ScriptedPrompter` answers from a queue and is
//! used for `--yes` runs and tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::{Confirm, Input, Password, Select, theme::ColorfulTheme};
use std::collections::VecDeque;
use std::sync::Mutex;

#[async_trait]
pub trait UserPrompter: Send + Sync {
    /// Ask for a line of text. `None` means the user gave no answer.
    async fn ask_text(&self, prompt: &str, secret: bool) -> Result<Option<String>>;

    /// Pick one of `candidates`. `None` means the user dismissed the prompt.
    async fn select_file(&self, prompt: &str, candidates: &[String]) -> Result<Option<String>>;

    async fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;

    /// Show an instruction and wait until the user reports it done.
    async fn manual_step(&self, instruction: &str) -> Result<bool>;
}

/// Interactive terminal prompts.
#[derive(Debug, Default, Clone)]
pub struct ConsolePrompter;

impl ConsolePrompter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UserPrompter for ConsolePrompter {
    async fn ask_text(&self, prompt: &str, secret: bool) -> Result<Option<String>> {
        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || -> Result<String> {
            let theme = ColorfulTheme::default();
            if secret {
                Ok(Password::with_theme(&theme)
                    .with_prompt(prompt)
                    .allow_empty_password(true)
                    .interact()?)
            } else {
                Ok(Input::<String>::with_theme(&theme)
                    .with_prompt(prompt)
                    .allow_empty(true)
                    .interact_text()?)
            }
        })
        .await
        .context("Prompt task panicked")??;

        let answer = answer.trim().to_string();
        Ok((!answer.is_empty()).then_some(answer))
    }

    async fn select_file(&self, prompt: &str, candidates: &[String]) -> Result<Option<String>> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let prompt = prompt.to_string();
        let items = candidates.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .items(&items)
                .default(0)
                .interact_opt()?;
            Ok(selection.map(|i| items[i].clone()))
        })
        .await
        .context("Prompt task panicked")?
    }

    async fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            Ok(Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .default(default)
                .interact()?)
        })
        .await
        .context("Prompt task panicked")?
    }

    async fn manual_step(&self, instruction: &str) -> Result<bool> {
        println!();
        println!("  {}", console::style("Manual step required").yellow().bold());
        for line in textwrap::wrap(instruction, 76) {
            println!("    {}", line);
        }
        self.confirm("Done?", true).await
    }
}

/// Non-interactive prompter with canned answers.
///
/// Text prompts pop from `answers`; an empty queue yields `None`.
#[derive(Debug)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    confirm: bool,
    manual: bool,
}

impl ScriptedPrompter {
    /// Accept every confirmation and manual step.
    pub fn yes() -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            confirm: true,
            manual: true,
        }
    }

    /// Decline every confirmation and manual step.
    pub fn no() -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            confirm: false,
            manual: false,
        }
    }

    pub fn with_answers(self, answers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let Ok(mut queue) = self.answers.lock() {
            queue.extend(answers.into_iter().map(Into::into));
        }
        self
    }
}

#[async_trait]
impl UserPrompter for ScriptedPrompter {
    async fn ask_text(&self, prompt: &str, _secret: bool) -> Result<Option<String>> {
        let answer = self
            .answers
            .lock()
            .map_err(|e| anyhow::anyhow!("Answer queue poisoned: {}", e))?
            .pop_front();
        tracing::debug!(prompt, answered = answer.is_some(), "scripted text prompt");
        Ok(answer)
    }

    async fn select_file(&self, _prompt: &str, candidates: &[String]) -> Result<Option<String>> {
        Ok(candidates.first().cloned())
    }

    async fn confirm(&self, prompt: &str, _default: bool) -> Result<bool> {
        tracing::debug!(prompt, answer = self.confirm, "scripted confirmation");
        Ok(self.confirm)
    }

    async fn manual_step(&self, instruction: &str) -> Result<bool> {
        tracing::info!(instruction, "manual step (non-interactive)");
        Ok(self.manual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_answers_in_order() {
        let prompter = ScriptedPrompter::yes().with_answers(["first", "second"]);
        assert_eq!(prompter.ask_text("a", false).await.unwrap().as_deref(), Some("first"));
        assert_eq!(prompter.ask_text("b", true).await.unwrap().as_deref(), Some("second"));
        assert_eq!(prompter.ask_text("c", false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scripted_confirmations() {
        assert!(ScriptedPrompter::yes().confirm("go?", false).await.unwrap());
        assert!(!ScriptedPrompter::no().confirm("go?", true).await.unwrap());
        assert!(!ScriptedPrompter::no().manual_step("do it").await.unwrap());
    }

    #[tokio::test]
    async fn test_scripted_select_takes_first() {
        let prompter = ScriptedPrompter::yes();
        let files = vec!["a.py".to_string(), "b.py".to_string()];
        assert_eq!(
            prompter.select_file("pick", &files).await.unwrap().as_deref(),
            Some("a.py")
        );
        assert_eq!(prompter.select_file("pick", &[]).await.unwrap(), None);
    }
}

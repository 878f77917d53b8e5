//! In-memory collaborators for engine tests. Every fake counts its calls.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wright::config::Config;
use wright::engine_config::DomainProfile;
use wright::errors::{ExecError, GenerationError};
use wright::project::Project;
use wright::services::{
    ChatMessage, Collaborators, CommandExecutor, CommandOutput, GenerationService, LocalFs,
    ProjectStore, Remediator, RepairReport, RepairRequest, Substitution, SubstitutionRun,
    UserPrompter,
};
use wright::{Engine, EngineEvent};

/// Replies in order; once the queue is empty every call gets `fallback`.
pub struct FakeGeneration {
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    fallback: String,
    pub calls: AtomicUsize,
    pub credentials: Mutex<Vec<String>>,
}

impl FakeGeneration {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: "```\nplaceholder\n```".to_string(),
            calls: AtomicUsize::new(0),
            credentials: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, error: GenerationError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for FakeGeneration {
    async fn invoke(
        &self,
        _system: &str,
        _conversation: &[ChatMessage],
        _temperature: f32,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    async fn update_credential(&self, secret: &str) -> Result<()> {
        self.credentials.lock().unwrap().push(secret.to_string());
        Ok(())
    }
}

pub fn output(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(exit_code),
        substitution: None,
    }
}

/// Scripted command results; unknown commands succeed.
pub struct FakeExecutor {
    always: Mutex<HashMap<String, CommandOutput>>,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
    hangs: Mutex<Option<String>>,
    pub commands: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self {
            always: Mutex::new(HashMap::new()),
            cancel_on: Mutex::new(None),
            hangs: Mutex::new(None),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// `command` always fails with `stderr` and exit code 2.
    pub fn failing(self, command: &str, stderr: &str) -> Self {
        self.always
            .lock()
            .unwrap()
            .insert(command.to_string(), output(2, stderr));
        self
    }

    /// Cancel `token` when `command` runs, as a Ctrl-C would.
    pub fn cancel_on(&self, command: &str, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((command.to_string(), token));
    }

    /// `command` never finishes and ignores its cancellation token.
    pub fn hanging(self, command: &str) -> Self {
        *self.hangs.lock().unwrap() = Some(command.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == command)
            .count()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn run(
        &self,
        command: &str,
        _cwd: &Path,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecError> {
        self.commands.lock().unwrap().push(command.to_string());
        let hangs = self.hangs.lock().unwrap().as_deref() == Some(command);
        if hangs {
            std::future::pending::<()>().await;
        }
        let trigger = self.cancel_on.lock().unwrap().take();
        if let Some((target, token)) = trigger {
            if target == command {
                token.cancel();
                return Err(ExecError::Cancelled);
            }
            *self.cancel_on.lock().unwrap() = Some((target, token));
        }
        Ok(self
            .always
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_else(|| output(0, "")))
    }
}

pub struct FakeRemediator {
    result: bool,
    substitutions: Vec<SubstitutionRun>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<RepairRequest>>,
}

impl FakeRemediator {
    pub fn new(result: bool) -> Self {
        Self {
            result,
            substitutions: Vec::new(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Report that `original` was swapped for `substitute` while repairing.
    pub fn with_substitution(mut self, original: &str, substitute: &str, exit_code: Option<i32>) -> Self {
        self.substitutions.push(SubstitutionRun {
            substitution: Substitution {
                original: original.to_string(),
                substitute: substitute.to_string(),
                reason: "sandbox rule".to_string(),
            },
            exit_code,
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Remediator for FakeRemediator {
    async fn repair(
        &self,
        request: &RepairRequest,
        _cancel: &CancellationToken,
    ) -> Result<RepairReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        Ok(RepairReport {
            repaired: self.result,
            substitutions: self.substitutions.clone(),
        })
    }
}

pub struct FakePrompter {
    confirm: bool,
    answers: Mutex<VecDeque<String>>,
    pub calls: AtomicUsize,
}

impl FakePrompter {
    pub fn new(confirm: bool) -> Self {
        Self {
            confirm,
            answers: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answer(self, text: &str) -> Self {
        self.answers.lock().unwrap().push_back(text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserPrompter for FakePrompter {
    async fn ask_text(&self, _prompt: &str, _secret: bool) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answers.lock().unwrap().pop_front())
    }

    async fn select_file(&self, _prompt: &str, candidates: &[String]) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(candidates.first().cloned())
    }

    async fn confirm(&self, _prompt: &str, _default: bool) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.confirm)
    }

    async fn manual_step(&self, _instruction: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.confirm)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<Project>>,
    pub saves: AtomicUsize,
}

impl MemoryStore {
    pub fn with(project: Project) -> Self {
        Self {
            snapshot: Mutex::new(Some(project)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> Option<Project> {
        self.snapshot.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn save(&self, project: &Project) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.snapshot.lock().unwrap() = Some(project.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Project>> {
        Ok(self.snapshot())
    }
}

/// One project directory plus a full set of fakes.
pub struct Harness {
    pub dir: TempDir,
    pub generation: Arc<FakeGeneration>,
    pub executor: Arc<FakeExecutor>,
    pub remediator: Arc<FakeRemediator>,
    pub prompter: Arc<FakePrompter>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn new(generation: FakeGeneration) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            generation: Arc::new(generation),
            executor: Arc::new(FakeExecutor::new()),
            remediator: Arc::new(FakeRemediator::new(false)),
            prompter: Arc::new(FakePrompter::new(true)),
            store: Arc::new(MemoryStore::default()),
        }
    }

    pub fn with_executor(mut self, executor: FakeExecutor) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn with_remediator(mut self, remediator: FakeRemediator) -> Self {
        self.remediator = Arc::new(remediator);
        self
    }

    pub fn with_prompter(mut self, prompter: FakePrompter) -> Self {
        self.prompter = Arc::new(prompter);
        self
    }

    pub fn with_store(mut self, store: MemoryStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> Config {
        Config::for_root(self.dir.path(), DomainProfile::generic())
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            generation: self.generation.clone(),
            executor: self.executor.clone(),
            fs: Arc::new(LocalFs::new(self.dir.path())),
            remediator: self.remediator.clone(),
            prompter: self.prompter.clone(),
            store: self.store.clone(),
        }
    }

    pub fn engine(&self, config: Config, cancel: CancellationToken) -> Engine {
        Engine::new(config, self.collaborators(), cancel)
    }

    /// Engine plus the receiving end of its event stream.
    pub fn engine_with_events(
        &self,
        config: Config,
        cancel: CancellationToken,
    ) -> (Engine, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        (self.engine(config, cancel).with_events(tx), rx)
    }

    /// Total calls made to generation, executor, remediator and prompter.
    pub fn collaborator_calls(&self) -> usize {
        self.generation.calls()
            + self.executor.calls()
            + self.remediator.calls()
            + self.prompter.calls()
    }
}

pub fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub const ONE_FEATURE: &str = "Feature 1: Core\nDescription: the core of the app\nDepends on: none\n";

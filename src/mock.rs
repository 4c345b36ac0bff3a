/// In-memory backends for orchestrator tests.
///
/// `MockShell` echoes each written line and answers with canned output,
/// `MockModel` streams fixed chunks, `MockConfirmer` answers (or doesn't)
/// with a fixed decision. All of them record what they were asked.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::confirm::{Confirmation, Confirmer};
use crate::error::{ModelError, SpawnError};
use crate::model::{Completion, ModelBackend, PromptContext};
use crate::session::Geometry;
use crate::shell::{ShellBackend, ShellControl, ShellEvent, ShellHandle};

// ── Shell ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockShell {
    replies: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<Mutex<Vec<String>>>,
    resizes: Arc<Mutex<Vec<Geometry>>>,
    kills: Arc<Mutex<usize>>,
    spawns: Arc<Mutex<usize>>,
    events: Arc<Mutex<Option<mpsc::Sender<ShellEvent>>>>,
    fail_spawn: bool,
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail_spawn: true, ..Self::default() }
    }

    /// Output printed after the echo when `command` is written.
    pub fn reply(self, command: &str, output: &str) -> Self {
        self.replies.lock().insert(command.to_string(), output.to_string());
        self
    }

    /// Commands written so far, without the trailing newline.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    pub fn resizes(&self) -> Vec<Geometry> {
        self.resizes.lock().clone()
    }

    pub fn kills(&self) -> usize {
        *self.kills.lock()
    }

    pub fn spawns(&self) -> usize {
        *self.spawns.lock()
    }

    /// Push an event as if the shell produced it unprompted.
    pub fn inject(&self, event: ShellEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.try_send(event);
        }
    }
}

struct MockControl {
    tx: mpsc::Sender<ShellEvent>,
    replies: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<Mutex<Vec<String>>>,
    resizes: Arc<Mutex<Vec<Geometry>>>,
    kills: Arc<Mutex<usize>>,
}

impl ShellControl for MockControl {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(bytes);
        let command = text.trim_end_matches('\n').to_string();
        self.writes.lock().push(command.clone());

        let reply = self.replies.lock().get(&command).cloned().unwrap_or_default();
        let _ = self
            .tx
            .try_send(ShellEvent::Output(format!("{command}\r\n{reply}$ ").into_bytes()));
        if command == "exit" {
            let _ = self.tx.try_send(ShellEvent::Exited(Some(0)));
        }
        Ok(())
    }

    fn resize(&mut self, geometry: Geometry) -> std::io::Result<()> {
        self.resizes.lock().push(geometry);
        Ok(())
    }

    fn terminate(&mut self) {
        *self.kills.lock() += 1;
    }
}

#[async_trait]
impl ShellBackend for MockShell {
    async fn spawn(&self, cwd: &Path, _geometry: Geometry) -> Result<ShellHandle, SpawnError> {
        if self.fail_spawn {
            return Err(SpawnError::Process {
                shell: "mock".to_string(),
                reason: "spawn disabled".to_string(),
            });
        }
        if !cwd.is_dir() {
            return Err(SpawnError::MissingDirectory(cwd.display().to_string()));
        }
        *self.spawns.lock() += 1;

        let (tx, rx) = mpsc::channel(64);
        *self.events.lock() = Some(tx.clone());
        let control = MockControl {
            tx,
            replies: self.replies.clone(),
            writes: self.writes.clone(),
            resizes: self.resizes.clone(),
            kills: self.kills.clone(),
        };
        Ok(ShellHandle::new(Some(4242), rx, Box::new(control)))
    }
}

// ── Model ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockModel {
    chunks: Vec<String>,
    unreachable: bool,
    delay: Duration,
    prompts: Arc<Mutex<Vec<PromptContext>>>,
}

impl MockModel {
    pub fn replying(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self { unreachable: true, ..Self::default() }
    }

    /// Pause before every chunk.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn prompts(&self) -> Vec<PromptContext> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ModelBackend for MockModel {
    async fn complete(&self, ctx: PromptContext) -> Result<Completion, ModelError> {
        self.prompts.lock().push(ctx);
        if self.unreachable {
            return Err(ModelError::Unreachable("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        let chunks = self.chunks.clone();
        let delay = self.delay;
        let task = tokio::spawn(async move {
            for chunk in chunks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        Ok(Completion::new(rx, Some(task)))
    }
}

// ── Confirmer ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MockConfirmer {
    /// `None` never answers
    answer: Option<Confirmation>,
    asked: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockConfirmer {
    pub fn answering(answer: Confirmation) -> Self {
        Self { answer: Some(answer), asked: Arc::default() }
    }

    pub fn silent() -> Self {
        Self { answer: None, asked: Arc::default() }
    }

    pub fn asked(&self) -> Vec<(String, String)> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl Confirmer for MockConfirmer {
    async fn await_confirmation(&self, command: &str, reason: &str) -> Confirmation {
        self.asked.lock().push((command.to_string(), reason.to_string()));
        match self.answer {
            Some(answer) => answer,
            None => std::future::pending().await,
        }
    }
}

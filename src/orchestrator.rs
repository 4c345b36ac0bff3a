/// Dispatch orchestration: one actor per terminal session.
///
/// The orchestrator owns the session state, mode controller, safety gate,
/// history and both backends. Every piece of text goes through the same
/// cycle:
///
///   route (mode) → vet (safety gate, gated routes only) → confirm (if asked)
///   → write to shell → collect output → record → update cwd
///
/// `run` turns it into a task that merges three streams with `select!`:
/// shell output, commands from the UI (`SessionCommand`) and finished model
/// completions. Routing decisions are serialised inside that task, so history
/// order is dispatch order no matter how long the model takes.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::confirm::{Confirmation, Confirmer};
use crate::error::{DispatchError, ModelError, SessionError};
use crate::history::{CommandHistory, CommandHistoryItem};
use crate::mode::{AiMode, ModeController, Origin, Route, SuggestionKind};
use crate::model::{self, ModelBackend, PromptContext};
use crate::safety::{SafetyGate, SafetyVerdict};
use crate::session::{RunState, SessionState, Theme};
use crate::shell::{ShellBackend, ShellEvent, ShellHandle};
use crate::term;

const INBOX_SIZE: usize = 32;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Output is complete once the shell has been quiet this long
    pub settle: Duration,
    /// Upper bound on waiting for a command's output
    pub max_wait: Duration,
    pub confirm_timeout: Duration,
    /// Executed commands sent to the model as context
    pub history_context: usize,
    /// In auto mode, query the model after every command the user runs
    pub auto_suggest: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(150),
            max_wait: Duration::from_millis(2000),
            confirm_timeout: Duration::from_secs(60),
            history_context: 5,
            auto_suggest: true,
        }
    }
}

// ── Events, outcomes, commands ────────────────────────────────────────────────

/// Everything the UI layer gets told about.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started { pid: Option<u32>, cwd: PathBuf },
    /// Output that arrived while no command was being collected
    ShellOutput(String),
    Dispatched { id: Uuid, command: String, output: String, is_ai_generated: bool },
    /// Streamed model text, as it arrives
    SuggestionChunk(String),
    Suggestion { text: String, kind: SuggestionKind },
    AiUnavailable { reason: String },
    Rejected { command: String, reason: String },
    ConfirmationDeclined { command: String, outcome: Confirmation },
    CwdChanged(PathBuf),
    ModeChanged(AiMode),
    Notice(String),
    ShellExited(Option<u32>),
    Terminated,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Executed { id: Uuid, output: String },
    Blocked { reason: String },
    Declined(Confirmation),
    Suggested(String),
    Ignored,
}

#[derive(Debug)]
pub enum SessionCommand {
    UserText(String),
    Ask(String),
    SetMode(AiMode),
    Resize { cols: u16, rows: u16 },
    SetTheme(Theme),
    SetSyntaxHighlighting(bool),
    History { filter: Option<String>, reply: oneshot::Sender<Vec<CommandHistoryItem>> },
    Terminate,
}

struct ModelReply {
    result: Result<String, ModelError>,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct DispatchOrchestrator {
    state: SessionState,
    modes: ModeController,
    gate: SafetyGate,
    history: CommandHistory,
    shell: Arc<dyn ShellBackend>,
    handle: Option<ShellHandle>,
    model: Arc<dyn ModelBackend>,
    confirmer: Arc<dyn Confirmer>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    config: OrchestratorConfig,
    home: Option<PathBuf>,
    model_tx: mpsc::UnboundedSender<ModelReply>,
    model_rx: mpsc::UnboundedReceiver<ModelReply>,
    /// The in-flight auto suggestion, superseded by the next one
    auto_request: Option<CancellationToken>,
}

impl DispatchOrchestrator {
    pub fn new(
        shell: Arc<dyn ShellBackend>,
        model: Arc<dyn ModelBackend>,
        confirmer: Arc<dyn Confirmer>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (model_tx, model_rx) = mpsc::unbounded_channel();
        Self {
            state: SessionState::from_launch_dir(),
            modes: ModeController::default(),
            gate: SafetyGate::new(),
            history: CommandHistory::default(),
            shell,
            handle: None,
            model,
            confirmer,
            events,
            cancel: CancellationToken::new(),
            config: OrchestratorConfig::default(),
            home: std::env::var_os("HOME").map(PathBuf::from),
            model_tx,
            model_rx,
            auto_request: None,
        }
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }

    pub fn with_mode(mut self, mode: AiMode) -> Self {
        self.modes = ModeController::new(mode);
        self
    }

    pub fn with_gate(mut self, gate: SafetyGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn mode(&self) -> AiMode {
        self.modes.mode()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Spawn the shell and bind it. A spawn failure ends the session.
    pub async fn start(&mut self) -> Result<(), DispatchError> {
        match self.state.run_state() {
            RunState::Running => return Err(SessionError::AlreadyRunning.into()),
            RunState::Terminated => return Err(SessionError::Terminated.into()),
            RunState::Idle => {}
        }

        let spawned = self.shell.spawn(self.state.cwd(), self.state.geometry()).await;
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "shell spawn failed");
                self.emit(SessionEvent::Error(e.to_string()));
                self.state.terminate();
                return Err(e.into());
            }
        };

        self.state.start()?;
        self.emit(SessionEvent::Started {
            pid: handle.pid,
            cwd: self.state.cwd().to_path_buf(),
        });
        self.handle = Some(handle);
        Ok(())
    }

    /// Cancel outstanding model requests and confirmation waits, kill the
    /// shell. History is kept. Idempotent.
    pub fn terminate(&mut self) {
        if self.state.run_state() == RunState::Terminated && self.handle.is_none() {
            return;
        }
        self.cancel.cancel();
        if let Some(mut handle) = self.handle.take() {
            handle.terminate();
        }
        self.state.terminate();
        tracing::info!(commands = self.history.len(), "session terminated");
        self.emit(SessionEvent::Terminated);
    }

    pub fn set_mode(&mut self, mode: AiMode) {
        if let Some(pending) = self.auto_request.take() {
            pending.cancel();
        }
        self.modes.set_mode(mode);
        self.emit(SessionEvent::ModeChanged(mode));
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), DispatchError> {
        self.state.update_size(cols, rows)?;
        if let Some(handle) = self.handle.as_mut() {
            handle.resize(self.state.geometry())?;
        }
        Ok(())
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.state.set_theme(theme);
    }

    pub fn set_syntax_highlighting(&mut self, enabled: bool) {
        self.state.set_syntax_highlighting(enabled);
    }

    // ── Routing ────────────────────────────────────────────────────────────

    pub async fn submit_user(&mut self, text: &str) -> Result<DispatchOutcome, DispatchError> {
        self.submit(text, Origin::User).await
    }

    pub async fn submit_model_text(&mut self, text: &str) -> Result<DispatchOutcome, DispatchError> {
        self.submit(text, Origin::Model).await
    }

    pub async fn submit(&mut self, text: &str, origin: Origin) -> Result<DispatchOutcome, DispatchError> {
        let route = self.modes.route(origin);
        tracing::debug!(mode = %self.modes.mode(), ?origin, ?route, "routed");

        match route {
            Route::Ignore => Ok(DispatchOutcome::Ignored),
            Route::SuggestOnly => Ok(self.suggest(text)),
            Route::ExecuteDirect | Route::ExecuteGated => {
                let command = match origin {
                    Origin::User => text.trim().to_string(),
                    Origin::Model => match model::extract(text, SuggestionKind::Command) {
                        Ok(command) => command,
                        Err(e) => {
                            // Nothing runnable; the marker is the whole suggestion
                            self.emit(SessionEvent::AiUnavailable { reason: e.to_string() });
                            return Ok(DispatchOutcome::Ignored);
                        }
                    },
                };
                if command.is_empty() {
                    return Ok(DispatchOutcome::Ignored);
                }
                if !self.state.is_running() {
                    return Err(DispatchError::NotRunning);
                }
                let outcome = if route == Route::ExecuteGated {
                    self.gated(&command, origin).await?
                } else {
                    self.dispatch(&command, origin).await?
                };
                if origin == Origin::User && matches!(outcome, DispatchOutcome::Executed { .. }) {
                    self.auto_suggest(&command);
                }
                Ok(outcome)
            }
        }
    }

    fn suggest(&mut self, text: &str) -> DispatchOutcome {
        let kind = self.modes.mode().suggestion_kind();
        let text = match model::extract(text, kind) {
            Ok(text) => text,
            Err(e) => {
                self.emit(SessionEvent::AiUnavailable { reason: e.to_string() });
                return DispatchOutcome::Ignored;
            }
        };
        self.emit(SessionEvent::Suggestion { text: text.clone(), kind });
        DispatchOutcome::Suggested(text)
    }

    async fn gated(&mut self, command: &str, origin: Origin) -> Result<DispatchOutcome, DispatchError> {
        match self.gate.evaluate(command, self.state.cwd()) {
            SafetyVerdict::Safe => self.dispatch(command, origin).await,
            SafetyVerdict::Blocked { reason } => {
                tracing::warn!(command, %reason, "blocked by safety gate");
                self.history.record_rejected(command, &reason, origin.is_ai());
                self.emit(SessionEvent::Rejected {
                    command: command.to_string(),
                    reason: reason.clone(),
                });
                Ok(DispatchOutcome::Blocked { reason })
            }
            SafetyVerdict::NeedsConfirmation { reason } => match self.confirm(command, &reason).await {
                Confirmation::Approved => self.dispatch(command, origin).await,
                outcome => {
                    tracing::info!(command, outcome = outcome.as_str(), "confirmation declined");
                    self.history.record_declined(command, outcome, origin.is_ai());
                    self.emit(SessionEvent::ConfirmationDeclined {
                        command: command.to_string(),
                        outcome,
                    });
                    Ok(DispatchOutcome::Declined(outcome))
                }
            },
        }
    }

    /// Session cancellation counts as a rejection.
    async fn confirm(&mut self, command: &str, reason: &str) -> Confirmation {
        let wait = tokio::time::timeout(
            self.config.confirm_timeout,
            self.confirmer.await_confirmation(command, reason),
        );
        tokio::select! {
            _ = self.cancel.cancelled() => Confirmation::Rejected,
            answer = wait => answer.unwrap_or(Confirmation::TimedOut),
        }
    }

    async fn dispatch(&mut self, command: &str, origin: Origin) -> Result<DispatchOutcome, DispatchError> {
        // Anything printed before this command belongs to the UI, not to it
        self.drain_idle_output();
        let handle = self
            .handle
            .as_mut()
            .filter(|_| self.state.is_running())
            .ok_or(DispatchError::NotRunning)?;
        handle.write(format!("{command}\n").as_bytes())?;
        tracing::info!(command, ai = origin.is_ai(), "dispatched");

        let (raw, exit) = self.collect_output().await;
        let text = term::strip_ansi(&raw);
        let output = term::trim_prompt(term::trim_echo(&text, command)).trim_end().to_string();

        self.update_cwd(&raw, command);
        let id = self.history.record(command, &output, origin.is_ai());
        self.emit(SessionEvent::Dispatched {
            id,
            command: command.to_string(),
            output: output.clone(),
            is_ai_generated: origin.is_ai(),
        });

        if let Some(code) = exit {
            self.on_shell_exit(code);
        }
        Ok(DispatchOutcome::Executed { id, output })
    }

    /// Gather output until the shell goes quiet, `max_wait` passes, the shell
    /// exits or the session is cancelled. Returns the raw text and the exit
    /// status if the shell went away.
    async fn collect_output(&mut self) -> (String, Option<Option<u32>>) {
        let Some(handle) = self.handle.as_mut() else {
            return (String::new(), None);
        };
        let deadline = Instant::now() + self.config.max_wait;
        let mut raw = Vec::new();
        let mut exit = None;

        loop {
            // Before the first byte only the deadline applies
            let quiet = if raw.is_empty() { self.config.max_wait } else { self.config.settle };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                _ = tokio::time::sleep(quiet) => break,
                event = handle.events.recv() => match event {
                    Some(ShellEvent::Output(bytes)) => raw.extend_from_slice(&bytes),
                    Some(ShellEvent::Exited(code)) => {
                        exit = Some(code);
                        break;
                    }
                    None => {
                        exit = Some(None);
                        break;
                    }
                },
            }
        }
        (String::from_utf8_lossy(&raw).into_owned(), exit)
    }

    fn update_cwd(&mut self, raw: &str, command: &str) {
        let detected = term::detect_osc7_cwd(raw).or_else(|| {
            term::parse_cd_target(command)
                .and_then(|target| term::resolve_cd(target, self.state.cwd(), self.home.as_deref()))
        });
        if let Some(dir) = detected {
            if dir != self.state.cwd() {
                tracing::debug!(cwd = %dir.display(), "working directory changed");
                self.state.set_cwd(dir.clone());
                self.emit(SessionEvent::CwdChanged(dir));
            }
        }
    }

    // ── Shell events outside a dispatch ────────────────────────────────────

    fn drain_idle_output(&mut self) {
        loop {
            let Some(handle) = self.handle.as_mut() else { return };
            match handle.events.try_recv() {
                Ok(event) => self.handle_shell_event(Some(event)),
                Err(mpsc::error::TryRecvError::Empty) => return,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.handle_shell_event(None);
                    return;
                }
            }
        }
    }

    fn handle_shell_event(&mut self, event: Option<ShellEvent>) {
        match event {
            Some(ShellEvent::Output(bytes)) => {
                let raw = String::from_utf8_lossy(&bytes).into_owned();
                if let Some(dir) = term::detect_osc7_cwd(&raw) {
                    if dir != self.state.cwd() {
                        self.state.set_cwd(dir.clone());
                        self.emit(SessionEvent::CwdChanged(dir));
                    }
                }
                self.emit(SessionEvent::ShellOutput(raw));
            }
            Some(ShellEvent::Exited(code)) => self.on_shell_exit(code),
            None => self.on_shell_exit(None),
        }
    }

    fn on_shell_exit(&mut self, code: Option<u32>) {
        tracing::info!(?code, "shell exited");
        self.emit(SessionEvent::ShellExited(code));
        self.terminate();
    }

    // ── Model ──────────────────────────────────────────────────────────────

    /// Ask the model. The completion streams in the background; its final
    /// text comes back through the run loop and is routed as model text.
    /// Returns false when the current mode ignores model output.
    pub fn query_model(&mut self, query: &str) -> bool {
        if self.modes.route(Origin::Model) == Route::Ignore {
            self.emit(SessionEvent::Notice(format!(
                "AI is {}; switch modes to ask the model",
                self.modes.mode().display_name()
            )));
            return false;
        }

        self.spawn_query(query);
        true
    }

    /// In auto mode, follow a command the user ran with a suggestion. Its
    /// output reaches the model through the history context.
    fn auto_suggest(&mut self, command: &str) {
        if !self.config.auto_suggest || self.modes.mode() != AiMode::Auto || !self.state.is_running() {
            return;
        }
        if let Some(previous) = self.auto_request.take() {
            previous.cancel();
        }
        let query = format!("I just ran `{command}`. Suggest the most useful next command.");
        self.auto_request = Some(self.spawn_query(&query));
    }

    /// Start a completion on a child of the session token and return that
    /// child so the request can be cancelled on its own.
    fn spawn_query(&mut self, query: &str) -> CancellationToken {
        let ctx = PromptContext {
            query: query.to_string(),
            cwd: self.state.cwd().to_path_buf(),
            mode: self.modes.mode(),
            recent: self
                .history
                .recent(self.config.history_context)
                .into_iter()
                .map(|item| (item.command().to_string(), item.output().to_string()))
                .collect(),
        };

        let model = self.model.clone();
        let events = self.events.clone();
        let replies = self.model_tx.clone();
        let token = self.cancel.child_token();
        let cancelled = token.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancelled.cancelled() => Err(ModelError::Cancelled),
                result = stream_completion(model.as_ref(), ctx, &events) => result,
            };
            let _ = replies.send(ModelReply { result });
        });
        token
    }

    async fn on_model_reply(&mut self, reply: ModelReply) {
        match reply.result {
            Ok(text) => {
                if let Err(e) = self.submit_model_text(&text).await {
                    self.report(e);
                }
            }
            Err(ModelError::Cancelled) => tracing::debug!("model request cancelled"),
            Err(e) => {
                tracing::warn!(error = %e, "model unavailable");
                self.emit(SessionEvent::AiUnavailable { reason: e.to_string() });
            }
        }
    }

    fn report(&self, error: DispatchError) {
        tracing::warn!(error = %error, "command failed");
        self.emit(SessionEvent::Error(error.to_string()));
    }

    // ── Run loop ───────────────────────────────────────────────────────────

    /// Drive the session until it is terminated, the inbox closes or the
    /// shell exits. Returns the orchestrator so its history survives.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<SessionCommand>) -> Self {
        while self.state.is_running() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = next_shell_event(&mut self.handle) => self.handle_shell_event(event),
                command = inbox.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(reply) = self.model_rx.recv() => self.on_model_reply(reply).await,
            }
        }
        self.terminate();
        self
    }

    /// Returns false when the session should stop.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::UserText(text) => {
                if let Err(e) = self.submit_user(&text).await {
                    self.report(e);
                }
            }
            SessionCommand::Ask(query) => {
                self.query_model(&query);
            }
            SessionCommand::SetMode(mode) => self.set_mode(mode),
            SessionCommand::Resize { cols, rows } => {
                if let Err(e) = self.resize(cols, rows) {
                    self.report(e);
                }
            }
            SessionCommand::SetTheme(theme) => self.set_theme(theme),
            SessionCommand::SetSyntaxHighlighting(enabled) => self.set_syntax_highlighting(enabled),
            SessionCommand::History { filter, reply } => {
                let items = match filter {
                    Some(needle) => self.history.search(&needle).iter().cloned().collect(),
                    None => self.history.items().to_vec(),
                };
                let _ = reply.send(items);
            }
            SessionCommand::Terminate => return false,
        }
        true
    }
}

async fn next_shell_event(handle: &mut Option<ShellHandle>) -> Option<ShellEvent> {
    match handle {
        Some(handle) => handle.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn stream_completion(
    model: &dyn ModelBackend,
    ctx: PromptContext,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<String, ModelError> {
    let mut completion = model.complete(ctx).await?;
    let mut text = String::new();
    while let Some(chunk) = completion.next().await {
        let chunk = chunk?;
        let _ = events.send(SessionEvent::SuggestionChunk(chunk.clone()));
        text.push_str(&chunk);
    }
    Ok(text)
}

// ── Session handle ────────────────────────────────────────────────────────────

/// Cloneable front end to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<(), DispatchError> {
        self.tx.send(command).await.map_err(|_| DispatchError::NotRunning)
    }

    pub async fn submit_user(&self, text: impl Into<String>) -> Result<(), DispatchError> {
        self.send(SessionCommand::UserText(text.into())).await
    }

    pub async fn ask(&self, query: impl Into<String>) -> Result<(), DispatchError> {
        self.send(SessionCommand::Ask(query.into())).await
    }

    pub async fn set_mode(&self, mode: AiMode) -> Result<(), DispatchError> {
        self.send(SessionCommand::SetMode(mode)).await
    }

    pub async fn history(&self, filter: Option<String>) -> Result<Vec<CommandHistoryItem>, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::History { filter, reply }).await?;
        rx.await.map_err(|_| DispatchError::NotRunning)
    }

    /// Cancels in-flight work right away, even if the session task is busy
    /// waiting on a confirmation or a command's output.
    pub fn terminate(&self) {
        self.cancel.cancel();
        let _ = self.tx.try_send(SessionCommand::Terminate);
    }
}

/// Start the shell and move the orchestrator onto its own task.
pub async fn spawn_session(
    mut orchestrator: DispatchOrchestrator,
) -> Result<(SessionHandle, JoinHandle<DispatchOrchestrator>), DispatchError> {
    orchestrator.start().await?;
    let (tx, inbox) = mpsc::channel(INBOX_SIZE);
    let handle = SessionHandle { tx, cancel: orchestrator.cancel_token() };
    let task = tokio::spawn(orchestrator.run(inbox));
    Ok((handle, task))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

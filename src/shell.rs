/// Shell backend: a live process behind a pseudo-terminal.
///
/// The orchestrator only sees `ShellBackend` and `ShellHandle`. Output
/// arrives on the handle's event channel as raw byte chunks, followed by a
/// single `Exited` when the process goes away.
use std::io::{Read, Write};
use std::path::Path;
use std::thread;

use async_trait::async_trait;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc;

use crate::error::SpawnError;
use crate::session::Geometry;

const READ_BUF: usize = 4096;
const EVENT_QUEUE: usize = 256;

/// Emits the working directory as an OSC 7 sequence before every bash prompt.
const BASH_OSC7_HOOK: &str = r#"printf '\033]7;file://%s%s\007' "${HOSTNAME:-localhost}" "$PWD""#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Output(Vec<u8>),
    /// Exit code if the backend could collect it
    Exited(Option<u32>),
}

/// Backend-specific control surface behind a `ShellHandle`.
pub trait ShellControl: Send {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;
    fn resize(&mut self, geometry: Geometry) -> std::io::Result<()>;
    fn terminate(&mut self);
}

pub struct ShellHandle {
    pub pid: Option<u32>,
    pub events: mpsc::Receiver<ShellEvent>,
    control: Box<dyn ShellControl>,
    terminated: bool,
}

impl ShellHandle {
    pub fn new(pid: Option<u32>, events: mpsc::Receiver<ShellEvent>, control: Box<dyn ShellControl>) -> Self {
        Self { pid, events, control, terminated: false }
    }

    pub fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if self.terminated {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "shell terminated"));
        }
        self.control.write(bytes)
    }

    pub fn resize(&mut self, geometry: Geometry) -> std::io::Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.control.resize(geometry)
    }

    /// Idempotent.
    pub fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.control.terminate();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

#[async_trait]
pub trait ShellBackend: Send + Sync {
    async fn spawn(&self, cwd: &Path, geometry: Geometry) -> Result<ShellHandle, SpawnError>;
}

// ── PTY backend ───────────────────────────────────────────────────────────────

pub struct PtyShell {
    shell: String,
}

impl PtyShell {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }

    fn is_bash(&self) -> bool {
        Path::new(&self.shell)
            .file_name()
            .is_some_and(|n| n == "bash")
    }
}

struct PtyControl {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl ShellControl for PtyControl {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    fn resize(&mut self, geometry: Geometry) -> std::io::Result<()> {
        self.master
            .resize(pty_size(geometry))
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    fn terminate(&mut self) {
        // Already-dead children report an error here; nothing to do about it
        if let Err(e) = self.killer.kill() {
            tracing::debug!(error = %e, "pty kill");
        }
    }
}

fn pty_size(geometry: Geometry) -> PtySize {
    PtySize {
        rows: geometry.rows,
        cols: geometry.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

#[async_trait]
impl ShellBackend for PtyShell {
    async fn spawn(&self, cwd: &Path, geometry: Geometry) -> Result<ShellHandle, SpawnError> {
        if !cwd.is_dir() {
            return Err(SpawnError::MissingDirectory(cwd.display().to_string()));
        }

        let pair = native_pty_system()
            .openpty(pty_size(geometry))
            .map_err(|e| SpawnError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.cwd(cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        if self.is_bash() {
            cmd.env("PROMPT_COMMAND", BASH_OSC7_HOOK);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| SpawnError::Process {
            shell: self.shell.clone(),
            reason: e.to_string(),
        })?;
        // The reader only sees EOF once every slave handle is closed
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SpawnError::Pty(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        thread::spawn(move || {
            let mut buf = [0u8; READ_BUF];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.blocking_send(ShellEvent::Output(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                }
            }
            let code = child.wait().ok().map(|s| s.exit_code());
            let _ = tx.blocking_send(ShellEvent::Exited(code));
        });

        tracing::info!(shell = %self.shell, ?pid, cwd = %cwd.display(), "shell spawned");

        Ok(ShellHandle::new(
            pid,
            rx,
            Box::new(PtyControl { master: pair.master, writer, killer }),
        ))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

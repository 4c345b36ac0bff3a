/// Error taxonomy for the session and dispatch layer.
///
/// Every failure the orchestrator can hit maps onto one of these. Caller
/// mistakes (`InvalidGeometry`, `AlreadyRunning`) are rejected before any
/// state changes; `SpawnError` is fatal to the session; `ModelError` is
/// recovered by falling back to suggestion display.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid terminal geometry {cols}x{rows}: both dimensions must be positive")]
    InvalidGeometry { cols: u16, rows: u16 },
    #[error("session is already running")]
    AlreadyRunning,
    #[error("session was terminated; start a new session for a new shell")]
    Terminated,
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to open pty: {0}")]
    Pty(String),
    #[error("failed to start shell '{shell}': {reason}")]
    Process { shell: String, reason: String },
    #[error("working directory {0} does not exist")]
    MissingDirectory(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model backend unreachable: {0}")]
    Unreachable(String),
    #[error("model API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("model returned malformed output: {0}")]
    Malformed(String),
    #[error("model request cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        ModelError::Unreachable(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("no shell is attached to this session")]
    NotRunning,
    #[error("failed to write to shell: {0}")]
    Write(#[from] std::io::Error),
}

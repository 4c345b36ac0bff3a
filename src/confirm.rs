/// Human-in-the-loop confirmation for commands the safety gate flags.
///
/// The orchestrator owns the timeout and cancellation; a `Confirmer` only
/// has to produce an answer. `ChannelConfirmer` hands the request to the UI
/// layer over a channel and waits for its reply.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    Approved,
    Rejected,
    TimedOut,
}

impl Confirmation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confirmation::Approved => "approved",
            Confirmation::Rejected => "rejected",
            Confirmation::TimedOut => "timed out",
        }
    }
}

#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn await_confirmation(&self, command: &str, reason: &str) -> Confirmation;
}

// ── Channel-backed confirmer ──────────────────────────────────────────────────

/// A pending question for the UI. Answer it with `approve()` / `reject()`;
/// dropping it unanswered counts as a rejection.
#[derive(Debug)]
pub struct ConfirmRequest {
    pub command: String,
    pub reason: String,
    reply: oneshot::Sender<bool>,
}

impl ConfirmRequest {
    pub fn approve(self) {
        let _ = self.reply.send(true);
    }

    pub fn reject(self) {
        let _ = self.reply.send(false);
    }

    /// The asker stopped waiting (timeout or session end).
    pub fn is_stale(&self) -> bool {
        self.reply.is_closed()
    }
}

pub struct ChannelConfirmer {
    tx: mpsc::UnboundedSender<ConfirmRequest>,
}

impl ChannelConfirmer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConfirmRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Confirmer for ChannelConfirmer {
    async fn await_confirmation(&self, command: &str, reason: &str) -> Confirmation {
        let (reply, answer) = oneshot::channel();
        let request = ConfirmRequest {
            command: command.to_string(),
            reason: reason.to_string(),
            reply,
        };
        if self.tx.send(request).is_err() {
            tracing::warn!(command, "confirmation UI is gone; treating as rejected");
            return Confirmation::Rejected;
        }
        match answer.await {
            Ok(true) => Confirmation::Approved,
            Ok(false) | Err(_) => Confirmation::Rejected,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

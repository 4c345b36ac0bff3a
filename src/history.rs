/// Command history with provenance.
///
/// Append-only log of every dispatch decision that reached the execute path:
/// commands that ran, commands the safety gate rejected, and commands whose
/// confirmation was declined. Items are never edited after `record` — a
/// correction is a new item. Insertion order is dispatch order.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::confirm::Confirmation;

// ── Item ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Written to the shell
    Executed,
    /// Blocked by the safety gate; never reached the shell
    Rejected { reason: String },
    /// Needed confirmation and did not get it
    Declined { outcome: Confirmation },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHistoryItem {
    id: Uuid,
    command: String,
    output: String,
    timestamp: DateTime<Utc>,
    is_ai_generated: bool,
    status: DispatchStatus,
}

impl CommandHistoryItem {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn is_ai_generated(&self) -> bool {
        self.is_ai_generated
    }

    pub fn status(&self) -> &DispatchStatus {
        &self.status
    }

    pub fn was_executed(&self) -> bool {
        self.status == DispatchStatus::Executed
    }

    /// One-liner for listings.
    pub fn display_line(&self) -> String {
        let origin = if self.is_ai_generated { "ai  " } else { "user" };
        let marker = match &self.status {
            DispatchStatus::Executed => String::new(),
            DispatchStatus::Rejected { reason } => format!("  [rejected: {reason}]"),
            DispatchStatus::Declined { outcome } => format!("  [not run: {}]", outcome.as_str()),
        };
        format!(
            "{}  {origin}  {}{marker}",
            self.timestamp.format("%H:%M:%S"),
            self.command
        )
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CommandHistory {
    items: Vec<CommandHistoryItem>,
}

impl CommandHistory {
    /// Record a command that was written to the shell.
    pub fn record(&mut self, command: &str, output: &str, is_ai_generated: bool) -> Uuid {
        self.push(command, output, is_ai_generated, DispatchStatus::Executed)
    }

    /// Record a command the safety gate blocked.
    pub fn record_rejected(&mut self, command: &str, reason: &str, is_ai_generated: bool) -> Uuid {
        self.push(
            command,
            "",
            is_ai_generated,
            DispatchStatus::Rejected { reason: reason.to_string() },
        )
    }

    /// Record a command whose confirmation was rejected or timed out.
    pub fn record_declined(
        &mut self,
        command: &str,
        outcome: Confirmation,
        is_ai_generated: bool,
    ) -> Uuid {
        self.push(command, "", is_ai_generated, DispatchStatus::Declined { outcome })
    }

    fn push(&mut self, command: &str, output: &str, is_ai_generated: bool, status: DispatchStatus) -> Uuid {
        let id = Uuid::new_v4();
        self.items.push(CommandHistoryItem {
            id,
            command: command.to_string(),
            output: output.to_string(),
            timestamp: Utc::now(),
            is_ai_generated,
            status,
        });
        id
    }

    /// Lazy view over the items matching `predicate`, in insertion order.
    /// The view can be iterated any number of times.
    pub fn filter<P>(&self, predicate: P) -> HistoryView<'_, P>
    where
        P: Fn(&CommandHistoryItem) -> bool,
    {
        HistoryView { items: &self.items, predicate }
    }

    /// Items whose command text contains `needle`.
    pub fn search<'a>(
        &'a self,
        needle: &'a str,
    ) -> HistoryView<'a, impl Fn(&CommandHistoryItem) -> bool + 'a> {
        self.filter(move |item| item.command.contains(needle))
    }

    pub fn get(&self, id: Uuid) -> Option<&CommandHistoryItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// The last `n` executed items, oldest first — used as model context.
    pub fn recent(&self, n: usize) -> Vec<&CommandHistoryItem> {
        let mut out: Vec<&CommandHistoryItem> = self
            .items
            .iter()
            .rev()
            .filter(|i| i.was_executed())
            .take(n)
            .collect();
        out.reverse();
        out
    }

    pub fn items(&self) -> &[CommandHistoryItem] {
        &self.items
    }

    pub fn last(&self) -> Option<&CommandHistoryItem> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

// ── View ──────────────────────────────────────────────────────────────────────

pub struct HistoryView<'a, P> {
    items: &'a [CommandHistoryItem],
    predicate: P,
}

impl<'a, P> HistoryView<'a, P>
where
    P: Fn(&CommandHistoryItem) -> bool,
{
    /// Fresh pass over the matching items.
    pub fn iter(&self) -> impl Iterator<Item = &'a CommandHistoryItem> + '_ {
        self.items.iter().filter(move |item| (self.predicate)(*item))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CommandHistory {
        let mut h = CommandHistory::default();
        h.record("git status", "On branch main", false);
        h.record("ls -la", "total 0", true);
        h.record_rejected("rm -rf /", "deletes the filesystem root", true);
        h.record("git log --oneline", "abc123 init", false);
        h
    }

    #[test]
    fn test_record_returns_unique_ids() {
        let mut h = CommandHistory::default();
        let a = h.record("echo a", "a", false);
        let b = h.record("echo a", "a", false);
        assert_ne!(a, b);
        assert_eq!(h.len(), 2);
        assert_eq!(h.get(a).unwrap().command(), "echo a");
    }

    #[test]
    fn test_provenance_and_status() {
        let h = sample();
        let items = h.items();
        assert!(!items[0].is_ai_generated());
        assert!(items[1].is_ai_generated());
        assert!(items[0].was_executed());
        assert_eq!(
            items[2].status(),
            &DispatchStatus::Rejected { reason: "deletes the filesystem root".to_string() }
        );
        assert!(items[2].output().is_empty());
    }

    #[test]
    fn test_search_preserves_insertion_order() {
        let h = sample();
        let view = h.search("git");
        let commands: Vec<&str> = view.iter().map(|i| i.command()).collect();
        assert_eq!(commands, vec!["git status", "git log --oneline"]);
    }

    #[test]
    fn test_view_is_restartable() {
        let h = sample();
        let view = h.filter(|i| i.is_ai_generated());
        assert_eq!(view.count(), 2);
        let first: Vec<Uuid> = view.iter().map(|i| i.id()).collect();
        let second: Vec<Uuid> = view.iter().map(|i| i.id()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_recent_skips_non_executed() {
        let h = sample();
        let recent: Vec<&str> = h.recent(2).iter().map(|i| i.command()).collect();
        assert_eq!(recent, vec!["ls -la", "git log --oneline"]);
    }

    #[test]
    fn test_declined_entry() {
        let mut h = CommandHistory::default();
        h.record_declined("sudo reboot", Confirmation::TimedOut, false);
        let item = h.last().unwrap();
        assert!(!item.was_executed());
        assert!(item.display_line().contains("not run: timed out"));
    }

    #[test]
    fn test_clear() {
        let mut h = sample();
        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.search("git").count(), 0);
    }
}

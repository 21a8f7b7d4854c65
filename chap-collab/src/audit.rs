//! Append-only history of applied patches for one open file.
//!
//! Entries are kept in application order: local emissions interleaved with
//! remote receipts as they were applied, not sorted by origin timestamp.
//! The log is client-side only; reopening the history view replaces it with
//! the authoritative history from the content store.

use crate::patch::LogEntry;

#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Vec<LogEntry>,
    history_open: bool,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its index.
    pub fn append(&mut self, entry: LogEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_history_open(&self) -> bool {
        self.history_open
    }

    /// Open the history view with freshly fetched history.
    pub fn open_history(&mut self, history: Vec<LogEntry>) {
        self.entries = history;
        self.history_open = true;
    }

    /// Close the history view. The accumulated entries are discarded.
    pub fn close_history(&mut self) {
        self.entries.clear();
        self.history_open = false;
    }
}

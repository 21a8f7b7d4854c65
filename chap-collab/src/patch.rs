//! Range-based text edits and the log entries recorded for them.
//!
//! A [`Patch`] replaces the `[from, to)` range of the *pre-edit* buffer with
//! `inserted_text`. Positions are `{line, character}` pairs where
//! `character` counts UTF-16 code units, the unit browser-side editing
//! surfaces report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A `{line, character}` position in a text buffer.
///
/// Ordering is document order: line first, then character.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub const ZERO: Position = Position { line: 0, character: 0 };

    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.character)
    }
}

/// Provenance tag attached to every buffer mutation.
///
/// Serialized as the plain tag string (`"+input"`, `"setValue"`, ...).
/// Unknown tags round-trip through [`Origin::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Origin {
    Input,
    Delete,
    Paste,
    Cut,
    Undo,
    Redo,
    Drag,
    Compose,
    /// Full-buffer load. Never re-broadcast.
    SetValue,
    Other(String),
}

impl Origin {
    pub fn as_str(&self) -> &str {
        match self {
            Origin::Input => "+input",
            Origin::Delete => "+delete",
            Origin::Paste => "paste",
            Origin::Cut => "cut",
            Origin::Undo => "undo",
            Origin::Redo => "redo",
            Origin::Drag => "drag",
            Origin::Compose => "*compose",
            Origin::SetValue => "setValue",
            Origin::Other(tag) => tag,
        }
    }

    /// Whether this mutation replaced the whole buffer from a load.
    pub fn is_bulk_load(&self) -> bool {
        matches!(self, Origin::SetValue)
    }

    /// Whether a patch carrying this origin may be sent to peers.
    pub fn is_broadcastable(&self) -> bool {
        !self.is_bulk_load() && !self.as_str().is_empty()
    }
}

impl From<&str> for Origin {
    fn from(tag: &str) -> Self {
        match tag {
            "+input" => Origin::Input,
            "+delete" => Origin::Delete,
            "paste" => Origin::Paste,
            "cut" => Origin::Cut,
            "undo" => Origin::Undo,
            "redo" => Origin::Redo,
            "drag" => Origin::Drag,
            "*compose" => Origin::Compose,
            "setValue" => Origin::SetValue,
            other => Origin::Other(other.to_string()),
        }
    }
}

impl From<String> for Origin {
    fn from(tag: String) -> Self {
        Origin::from(tag.as_str())
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        match origin {
            Origin::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An atomic edit to the shared document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub origin: Origin,
    pub removed_text: String,
    pub inserted_text: String,
    pub from: Position,
    pub to: Position,
    /// Per-author monotonic edit clock.
    #[serde(default)]
    pub timestamp: u64,
}

impl Patch {
    /// Build a patch, swapping `from`/`to` if they arrive reversed.
    pub fn new(
        origin: Origin,
        from: Position,
        to: Position,
        removed_text: impl Into<String>,
        inserted_text: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        let (from, to) = if to < from { (to, from) } else { (from, to) };
        Self {
            origin,
            removed_text: removed_text.into(),
            inserted_text: inserted_text.into(),
            from,
            to,
            timestamp,
        }
    }

    /// Pure insertion at `at`.
    pub fn insert(origin: Origin, at: Position, text: impl Into<String>, timestamp: u64) -> Self {
        Self::new(origin, at, at, String::new(), text, timestamp)
    }

    /// A patch that neither removes nor inserts anything.
    pub fn is_noop(&self) -> bool {
        self.removed_text.is_empty() && self.inserted_text.is_empty()
    }
}

/// Immutable record of an applied patch, as shown in the history view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub username: String,
    /// Avatar reference of the author.
    #[serde(default)]
    pub image: Option<String>,
    pub patch: Patch,
    /// Wall-clock time of the edit, milliseconds since the Unix epoch.
    pub logged_at: u64,
}

impl LogEntry {
    pub fn new(username: impl Into<String>, image: Option<String>, patch: Patch) -> Self {
        Self {
            username: username.into(),
            image,
            patch,
            logged_at: unix_millis(),
        }
    }

    /// One-line description for history listings.
    pub fn summary(&self) -> String {
        let patch = &self.patch;
        match (patch.removed_text.is_empty(), patch.inserted_text.is_empty()) {
            (true, false) => format!(
                "{} inserted {:?} at {}",
                self.username, patch.inserted_text, patch.from
            ),
            (false, true) => format!(
                "{} removed {:?} at {}-{}",
                self.username, patch.removed_text, patch.from, patch.to
            ),
            _ => format!(
                "{} replaced {:?} with {:?} at {}-{}",
                self.username, patch.removed_text, patch.inserted_text, patch.from, patch.to
            ),
        }
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_document_order() {
        assert!(Position::new(0, 5) < Position::new(1, 0));
        assert!(Position::new(2, 1) < Position::new(2, 3));
        assert_eq!(Position::ZERO, Position::default());
    }

    #[test]
    fn test_patch_normalises_reversed_range() {
        let patch = Patch::new(
            Origin::Delete,
            Position::new(3, 2),
            Position::new(1, 0),
            "x",
            "",
            1,
        );
        assert_eq!(patch.from, Position::new(1, 0));
        assert_eq!(patch.to, Position::new(3, 2));
    }

    #[test]
    fn test_noop_detection() {
        let noop = Patch::insert(Origin::Input, Position::ZERO, "", 0);
        assert!(noop.is_noop());

        let typed = Patch::insert(Origin::Input, Position::ZERO, "a", 0);
        assert!(!typed.is_noop());
    }

    #[test]
    fn test_origin_tags() {
        assert_eq!(Origin::from("+input"), Origin::Input);
        assert_eq!(Origin::from("setValue"), Origin::SetValue);
        assert_eq!(Origin::from("remote-apply"), Origin::Other("remote-apply".into()));
        assert_eq!(String::from(Origin::Compose), "*compose");
    }

    #[test]
    fn test_origin_broadcastable() {
        assert!(Origin::Input.is_broadcastable());
        assert!(Origin::Other("custom".into()).is_broadcastable());
        assert!(!Origin::SetValue.is_broadcastable());
        assert!(!Origin::Other(String::new()).is_broadcastable());
    }

    #[test]
    fn test_patch_wire_field_names() {
        let patch = Patch::insert(Origin::Input, Position::new(0, 0), "hi", 4);
        let json = serde_json::to_value(&patch).unwrap();

        assert_eq!(json["origin"], "+input");
        assert_eq!(json["insertedText"], "hi");
        assert_eq!(json["removedText"], "");
        assert_eq!(json["from"]["line"], 0);
        assert_eq!(json["to"]["character"], 0);
        assert_eq!(json["timestamp"], 4);
    }

    #[test]
    fn test_log_entry_summary() {
        let patch = Patch::insert(Origin::Input, Position::new(2, 4), "fn", 1);
        let entry = LogEntry::new("alice", None, patch);
        assert_eq!(entry.summary(), "alice inserted \"fn\" at 2:4");
        assert!(entry.logged_at > 0);
    }
}

//! JSON wire protocol shared by clients and the relay.
//!
//! Every frame is a JSON object of the form
//! ```text
//! { "event": "code-editor:<name>", "payload": { ... } }
//! ```
//! Change payloads carry `{fileId, patch, logEntry}`; presence payloads
//! carry `{fileId, username, image, isActiveInTab, isLive,
//! lastSeenTimestamp, projectId}`. Presence fields are all optional on the
//! wire so that a malformed event still decodes and can be dropped by
//! [`PresenceEvent::validate`] instead of failing the whole connection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::patch::{LogEntry, Patch, Position};
use crate::tabs::PresenceRecord;

/// Identifier of a shared file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FileId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for FileId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A propagated edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub file_id: FileId,
    pub patch: Patch,
    pub log_entry: LogEntry,
}

/// A cursor move by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorEvent {
    pub file_id: FileId,
    pub username: String,
    pub position: Position,
}

/// Presence announcement as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceEvent {
    pub file_id: Option<FileId>,
    pub username: Option<String>,
    pub image: Option<String>,
    pub is_active_in_tab: Option<bool>,
    pub is_live: Option<bool>,
    pub last_seen_timestamp: Option<u64>,
    pub project_id: Option<String>,
}

impl PresenceEvent {
    pub fn from_record(record: &PresenceRecord, project_id: &str) -> Self {
        Self {
            file_id: Some(record.file_id.clone()),
            username: Some(record.username.clone()),
            image: record.image.clone(),
            is_active_in_tab: Some(record.is_active_in_tab),
            is_live: Some(record.is_live),
            last_seen_timestamp: Some(record.last_seen_timestamp),
            project_id: Some(project_id.to_string()),
        }
    }

    /// Check required fields and build a record.
    ///
    /// `image` is the only optional field.
    pub fn validate(&self) -> Result<PresenceRecord, ProtocolError> {
        let file_id = self
            .file_id
            .clone()
            .filter(|id| !id.as_str().is_empty())
            .ok_or(ProtocolError::MalformedPresence("fileId"))?;
        let username = self
            .username
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or(ProtocolError::MalformedPresence("username"))?;
        let is_active_in_tab = self
            .is_active_in_tab
            .ok_or(ProtocolError::MalformedPresence("isActiveInTab"))?;
        let is_live = self.is_live.ok_or(ProtocolError::MalformedPresence("isLive"))?;
        let last_seen_timestamp = self
            .last_seen_timestamp
            .ok_or(ProtocolError::MalformedPresence("lastSeenTimestamp"))?;
        if self.project_id.as_deref().map_or(true, str::is_empty) {
            return Err(ProtocolError::MalformedPresence("projectId"));
        }

        Ok(PresenceRecord {
            file_id,
            username,
            image: self.image.clone(),
            is_active_in_tab,
            is_live,
            last_seen_timestamp,
        })
    }
}

/// Every message exchanged between clients and the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum Frame {
    /// First frame of a connection: which project room and who.
    #[serde(rename = "code-editor:hello", rename_all = "camelCase")]
    Hello { project_id: String, username: String },

    #[serde(rename = "code-editor:change")]
    Change(ChangeEvent),

    #[serde(rename = "code-editor:cursor")]
    Cursor(CursorEvent),

    #[serde(rename = "code-editor:remove-cursor", rename_all = "camelCase")]
    RemoveCursor { file_id: FileId, username: String },

    /// Drop a user's cursor in every file.
    #[serde(rename = "code-editor:remove-user-specific-cursor")]
    RemoveUserCursor { username: String },

    /// Ask peers with the file open for their cursor maps.
    #[serde(rename = "code-editor:send-all-cursors", rename_all = "camelCase")]
    RequestCursors { file_id: FileId },

    #[serde(rename = "code-editor:get-all-users-cursors", rename_all = "camelCase")]
    CursorSnapshot {
        file_id: FileId,
        users: BTreeMap<String, Position>,
    },

    #[serde(rename = "code-editor:join-file")]
    JoinFile(PresenceEvent),

    #[serde(rename = "code-editor:leave-file", rename_all = "camelCase")]
    LeaveFile { file_id: FileId, username: String },

    #[serde(rename = "code-editor:user-joined")]
    UserJoined(PresenceEvent),

    #[serde(rename = "code-editor:user-left", rename_all = "camelCase")]
    UserLeft { file_id: FileId, username: String },

    #[serde(rename = "code-editor:remove-active-live-user")]
    RemoveActiveLiveUser { username: String },

    #[serde(rename = "code-editor:load-live-users", rename_all = "camelCase")]
    LoadLiveUsers { file_id: FileId },

    #[serde(rename = "code-editor:live-users", rename_all = "camelCase")]
    LiveUsers { all_users: Vec<PresenceEvent> },
}

/// Which subscribers a frame is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    /// Content or cursor traffic for one file.
    File(&'a FileId),
    /// Cursor traffic for every open file.
    AllFiles,
    /// Tab presence traffic.
    Presence,
    /// Client-to-relay requests.
    Control,
}

impl Frame {
    pub fn scope(&self) -> Scope<'_> {
        match self {
            Frame::Change(event) => Scope::File(&event.file_id),
            Frame::Cursor(event) => Scope::File(&event.file_id),
            Frame::RemoveCursor { file_id, .. }
            | Frame::RequestCursors { file_id }
            | Frame::CursorSnapshot { file_id, .. } => Scope::File(file_id),
            Frame::RemoveUserCursor { .. } => Scope::AllFiles,
            Frame::UserJoined(_)
            | Frame::UserLeft { .. }
            | Frame::RemoveActiveLiveUser { .. }
            | Frame::LiveUsers { .. } => Scope::Presence,
            Frame::Hello { .. }
            | Frame::JoinFile(_)
            | Frame::LeaveFile { .. }
            | Frame::LoadLiveUsers { .. } => Scope::Control,
        }
    }

    /// Wire event name, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "code-editor:hello",
            Frame::Change(_) => "code-editor:change",
            Frame::Cursor(_) => "code-editor:cursor",
            Frame::RemoveCursor { .. } => "code-editor:remove-cursor",
            Frame::RemoveUserCursor { .. } => "code-editor:remove-user-specific-cursor",
            Frame::RequestCursors { .. } => "code-editor:send-all-cursors",
            Frame::CursorSnapshot { .. } => "code-editor:get-all-users-cursors",
            Frame::JoinFile(_) => "code-editor:join-file",
            Frame::LeaveFile { .. } => "code-editor:leave-file",
            Frame::UserJoined(_) => "code-editor:user-joined",
            Frame::UserLeft { .. } => "code-editor:user-left",
            Frame::RemoveActiveLiveUser { .. } => "code-editor:remove-active-live-user",
            Frame::LoadLiveUsers { .. } => "code-editor:load-live-users",
            Frame::LiveUsers { .. } => "code-editor:live-users",
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Malformed presence event: missing {0}")]
    MalformedPresence(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Origin;

    fn presence(file: &str, user: &str, active: bool) -> PresenceEvent {
        PresenceEvent {
            file_id: Some(FileId::from(file)),
            username: Some(user.to_string()),
            image: None,
            is_active_in_tab: Some(active),
            is_live: Some(true),
            last_seen_timestamp: Some(1_700_000_000_000),
            project_id: Some("p1".to_string()),
        }
    }

    #[test]
    fn test_change_frame_wire_shape() {
        let patch = Patch::insert(Origin::Input, Position::ZERO, "a", 1);
        let frame = Frame::Change(ChangeEvent {
            file_id: FileId::from("F"),
            log_entry: LogEntry::new("alice", Some("avatar.png".into()), patch.clone()),
            patch,
        });

        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(json["event"], "code-editor:change");
        assert_eq!(json["payload"]["fileId"], "F");
        assert_eq!(json["payload"]["patch"]["insertedText"], "a");
        assert_eq!(json["payload"]["logEntry"]["username"], "alice");
        assert_eq!(json["payload"]["logEntry"]["image"], "avatar.png");
    }

    #[test]
    fn test_decode_foreign_change_frame() {
        let text = r#"{
            "event": "code-editor:change",
            "payload": {
                "fileId": "F",
                "patch": {
                    "origin": "+input",
                    "removedText": "",
                    "insertedText": "a",
                    "from": {"line": 0, "character": 0},
                    "to": {"line": 0, "character": 0}
                },
                "logEntry": {
                    "username": "bob",
                    "patch": {
                        "origin": "+input",
                        "removedText": "",
                        "insertedText": "a",
                        "from": {"line": 0, "character": 0},
                        "to": {"line": 0, "character": 0}
                    },
                    "loggedAt": 12
                }
            }
        }"#;

        match Frame::decode(text).unwrap() {
            Frame::Change(event) => {
                assert_eq!(event.patch.origin, Origin::Input);
                assert_eq!(event.patch.timestamp, 0);
                assert_eq!(event.log_entry.image, None);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_presence_wire_field_names() {
        let frame = Frame::UserJoined(presence("F1", "a", true));
        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(json["event"], "code-editor:user-joined");
        let payload = &json["payload"];
        assert_eq!(payload["fileId"], "F1");
        assert_eq!(payload["isActiveInTab"], true);
        assert_eq!(payload["isLive"], true);
        assert_eq!(payload["lastSeenTimestamp"], 1_700_000_000_000u64);
        assert_eq!(payload["projectId"], "p1");
    }

    #[test]
    fn test_presence_with_missing_fields_still_decodes() {
        let text = r#"{"event":"code-editor:user-joined","payload":{"username":"a"}}"#;
        let frame = Frame::decode(text).unwrap();
        let Frame::UserJoined(event) = frame else {
            panic!("expected user-joined");
        };
        assert_eq!(
            event.validate(),
            Err(ProtocolError::MalformedPresence("fileId"))
        );
    }

    #[test]
    fn test_presence_validation() {
        let good = presence("F1", "a", false);
        let record = good.validate().unwrap();
        assert_eq!(record.file_id, FileId::from("F1"));
        assert!(!record.is_active_in_tab);

        let mut no_project = good.clone();
        no_project.project_id = None;
        assert_eq!(
            no_project.validate(),
            Err(ProtocolError::MalformedPresence("projectId"))
        );

        let mut empty_name = good;
        empty_name.username = Some(String::new());
        assert_eq!(
            empty_name.validate(),
            Err(ProtocolError::MalformedPresence("username"))
        );
    }

    #[test]
    fn test_struct_variant_field_names() {
        let frame = Frame::RemoveCursor {
            file_id: FileId::from("F"),
            username: "a".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(json["payload"]["fileId"], "F");

        let live = Frame::LiveUsers { all_users: vec![] };
        let json: serde_json::Value = serde_json::from_str(&live.encode().unwrap()).unwrap();
        assert!(json["payload"]["allUsers"].is_array());
    }

    #[test]
    fn test_scopes() {
        let file = FileId::from("F");
        assert_eq!(
            Frame::RequestCursors { file_id: file.clone() }.scope(),
            Scope::File(&file)
        );
        assert_eq!(
            Frame::RemoveUserCursor { username: "a".into() }.scope(),
            Scope::AllFiles
        );
        assert_eq!(
            Frame::RemoveActiveLiveUser { username: "a".into() }.scope(),
            Scope::Presence
        );
        assert_eq!(
            Frame::LoadLiveUsers { file_id: file }.scope(),
            Scope::Control
        );
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            Frame::decode("{not json"),
            Err(ProtocolError::Deserialization(_))
        ));
        assert!(Frame::decode(r#"{"event":"code-editor:unknown","payload":{}}"#).is_err());
    }
}

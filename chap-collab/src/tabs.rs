//! Tab/file presence: who is viewing which file, and where their focus is.
//!
//! One [`PresenceRecord`] exists per (user, file) pair. A user's
//! `is_active_in_tab` flag is exclusive across all tabs: activating one
//! file deactivates that user's record everywhere else.
//!
//! ```text
//!   absent ── user_joined(inactive) ──► present-inactive
//!     ▲  ▲                                  │      ▲
//!     │  └──── user_left / remove ──────────┤      │ other tab activated
//!     │                                     ▼      │
//!     └─────── user_left / remove ──── present-active
//! ```

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::protocol::{FileId, Frame};

/// Presence of one user in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub file_id: FileId,
    pub username: String,
    pub image: Option<String>,
    pub is_active_in_tab: bool,
    pub is_live: bool,
    pub last_seen_timestamp: u64,
}

/// Derived per-(user, file) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Absent,
    PresentInactive,
    PresentActive,
}

/// An open file and the users present in it, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub file_id: FileId,
    pub users: Vec<PresenceRecord>,
}

impl Tab {
    fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            users: Vec::new(),
        }
    }

    pub fn user(&self, username: &str) -> Option<&PresenceRecord> {
        self.users.iter().find(|u| u.username == username)
    }

    /// Insert, or refresh the flags of an existing record.
    fn upsert(&mut self, record: PresenceRecord) {
        match self.users.iter_mut().find(|u| u.username == record.username) {
            Some(existing) => {
                existing.is_active_in_tab = record.is_active_in_tab;
                existing.is_live = record.is_live;
                existing.last_seen_timestamp = record.last_seen_timestamp;
                if existing.image.is_none() {
                    existing.image = record.image;
                }
            }
            None => self.users.push(record),
        }
    }
}

/// Registry of open tabs and the presence records within them.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    tabs: Vec<Tab>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tab. Returns `false` if it was already open.
    pub fn open_tab(&mut self, file_id: FileId) -> bool {
        if self.tab(&file_id).is_some() {
            return false;
        }
        self.tabs.push(Tab::new(file_id));
        true
    }

    pub fn close_tab(&mut self, file_id: &FileId) -> Option<Tab> {
        let index = self.tabs.iter().position(|t| &t.file_id == file_id)?;
        Some(self.tabs.remove(index))
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn tab(&self, file_id: &FileId) -> Option<&Tab> {
        self.tabs.iter().find(|t| &t.file_id == file_id)
    }

    fn tab_mut(&mut self, file_id: &FileId) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| &t.file_id == file_id)
    }

    pub fn state(&self, file_id: &FileId, username: &str) -> PresenceState {
        match self.tab(file_id).and_then(|t| t.user(username)) {
            None => PresenceState::Absent,
            Some(r) if r.is_active_in_tab => PresenceState::PresentActive,
            Some(_) => PresenceState::PresentInactive,
        }
    }

    /// The file a user is currently focused on, if any.
    pub fn active_tab_of(&self, username: &str) -> Option<&FileId> {
        self.tabs
            .iter()
            .find(|t| t.user(username).is_some_and(|r| r.is_active_in_tab))
            .map(|t| &t.file_id)
    }

    /// All records across tabs, tab by tab.
    pub fn records(&self) -> impl Iterator<Item = &PresenceRecord> {
        self.tabs.iter().flat_map(|t| t.users.iter())
    }

    /// A user joined (or re-announced) a file.
    ///
    /// An active join first clears the user's focus in every other tab.
    /// The record is only stored if the file's tab is open; callers that
    /// track every file open the tab first. Returns `true` if stored.
    pub fn user_joined(&mut self, record: PresenceRecord) -> bool {
        if record.is_active_in_tab {
            for tab in &mut self.tabs {
                for user in tab.users.iter_mut().filter(|u| u.username == record.username) {
                    user.is_active_in_tab = false;
                }
            }
        }

        let Some(tab) = self.tab_mut(&record.file_id) else {
            trace!("{} joined unopened {}", record.username, record.file_id);
            return false;
        };
        trace!(
            "{} joined {} (active: {})",
            record.username,
            record.file_id,
            record.is_active_in_tab
        );
        tab.upsert(record);
        true
    }

    /// Remove the record for one (file, user) pair.
    pub fn user_left(&mut self, file_id: &FileId, username: &str) -> bool {
        let Some(tab) = self.tab_mut(file_id) else {
            return false;
        };
        let before = tab.users.len();
        tab.users.retain(|u| u.username != username);
        before != tab.users.len()
    }

    /// Remove a fully disconnected user from every tab.
    ///
    /// Returns the number of records removed.
    pub fn remove_active_live_user(&mut self, username: &str) -> usize {
        let mut removed = 0;
        for tab in &mut self.tabs {
            let before = tab.users.len();
            tab.users.retain(|u| u.username != username);
            removed += before - tab.users.len();
        }
        removed
    }

    /// Bulk reconciliation.
    ///
    /// Records are upserted into tabs that are open; tabs not mentioned are
    /// left as they are and records for unopened files are ignored.
    /// Returns the number of records applied.
    pub fn load_live_users(&mut self, records: impl IntoIterator<Item = PresenceRecord>) -> usize {
        let mut applied = 0;
        for record in records {
            if let Some(tab) = self.tab_mut(&record.file_id) {
                tab.upsert(record);
                applied += 1;
            }
        }
        applied
    }

    /// Apply a presence frame. Malformed events are dropped.
    ///
    /// Returns `true` if the frame was a presence frame that changed or
    /// reconciled the registry.
    pub fn apply(&mut self, frame: &Frame) -> bool {
        match frame {
            Frame::UserJoined(event) => match event.validate() {
                Ok(record) => self.user_joined(record),
                Err(e) => {
                    debug!("Dropping user-joined: {e}");
                    false
                }
            },
            Frame::UserLeft { file_id, username } => self.user_left(file_id, username),
            Frame::RemoveActiveLiveUser { username } => {
                self.remove_active_live_user(username);
                true
            }
            Frame::LiveUsers { all_users } => {
                let records: Vec<PresenceRecord> = all_users
                    .iter()
                    .filter_map(|event| match event.validate() {
                        Ok(record) => Some(record),
                        Err(e) => {
                            debug!("Dropping live-users entry: {e}");
                            None
                        }
                    })
                    .collect();
                self.load_live_users(records);
                true
            }
            _ => false,
        }
    }
}

//! Routing decisions for one project room.
//!
//! A [`ProjectRoom`] holds the connected peers of a project and the
//! authoritative live-user table. It decides, for every inbound frame, what
//! goes out and to whom; it performs no I/O, so the WebSocket relay and the
//! in-process hub share it.

use log::{debug, warn};
use std::collections::HashMap;
use uuid::Uuid;

use crate::protocol::{Frame, PresenceEvent};
use crate::tabs::PresenceRegistry;

/// Recipients of an outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every peer except the one that sent the inbound frame.
    Others,
    Everyone,
    /// Only the peer that sent the inbound frame.
    Sender,
}

impl Target {
    pub fn includes(&self, sender: Uuid, recipient: Uuid) -> bool {
        match self {
            Target::Others => sender != recipient,
            Target::Everyone => true,
            Target::Sender => sender == recipient,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub target: Target,
    pub frame: Frame,
}

impl Outgoing {
    fn new(target: Target, frame: Frame) -> Self {
        Self { target, frame }
    }
}

pub struct ProjectRoom {
    project_id: String,
    peers: HashMap<Uuid, String>,
    live: PresenceRegistry,
}

impl ProjectRoom {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            peers: HashMap::new(),
            live: PresenceRegistry::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn join(&mut self, peer_id: Uuid, username: impl Into<String>) {
        self.peers.insert(peer_id, username.into());
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn username(&self, peer_id: &Uuid) -> Option<&str> {
        self.peers.get(peer_id).map(String::as_str)
    }

    pub fn live_users(&self) -> &PresenceRegistry {
        &self.live
    }

    /// Route one inbound frame from `peer_id`.
    pub fn handle(&mut self, peer_id: Uuid, frame: Frame) -> Vec<Outgoing> {
        if !self.peers.contains_key(&peer_id) {
            warn!("Frame {} from unknown peer {peer_id}", frame.event_name());
            return Vec::new();
        }

        match frame {
            Frame::Change(_)
            | Frame::Cursor(_)
            | Frame::RemoveCursor { .. }
            | Frame::RemoveUserCursor { .. }
            | Frame::RequestCursors { .. }
            | Frame::CursorSnapshot { .. } => vec![Outgoing::new(Target::Others, frame)],

            Frame::JoinFile(mut event) => {
                event.project_id = Some(self.project_id.clone());
                match event.validate() {
                    Ok(record) => {
                        self.live.open_tab(record.file_id.clone());
                        self.live.user_joined(record);
                        vec![Outgoing::new(Target::Everyone, Frame::UserJoined(event))]
                    }
                    Err(e) => {
                        debug!("Dropping join-file in {}: {e}", self.project_id);
                        Vec::new()
                    }
                }
            }

            Frame::LeaveFile { file_id, username } => {
                self.live.user_left(&file_id, &username);
                vec![Outgoing::new(
                    Target::Everyone,
                    Frame::UserLeft { file_id, username },
                )]
            }

            Frame::LoadLiveUsers { .. } => {
                let all_users = self
                    .live
                    .records()
                    .map(|r| PresenceEvent::from_record(r, &self.project_id))
                    .collect();
                vec![Outgoing::new(Target::Sender, Frame::LiveUsers { all_users })]
            }

            Frame::Hello { .. } => Vec::new(),

            Frame::UserJoined(_)
            | Frame::UserLeft { .. }
            | Frame::RemoveActiveLiveUser { .. }
            | Frame::LiveUsers { .. } => {
                debug!("Ignoring relay-only frame {} from {peer_id}", frame.event_name());
                Vec::new()
            }
        }
    }

    /// A connection closed.
    ///
    /// When it was the user's last connection, the user is removed from the
    /// live table and everyone is told to drop their presence and cursors.
    pub fn leave(&mut self, peer_id: Uuid) -> Vec<Outgoing> {
        let Some(username) = self.peers.remove(&peer_id) else {
            return Vec::new();
        };
        if self.peers.values().any(|name| *name == username) {
            return Vec::new();
        }

        self.live.remove_active_live_user(&username);
        vec![
            Outgoing::new(
                Target::Everyone,
                Frame::RemoveActiveLiveUser {
                    username: username.clone(),
                },
            ),
            Outgoing::new(Target::Everyone, Frame::RemoveUserCursor { username }),
        ]
    }
}

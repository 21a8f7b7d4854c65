//! Fan-out of routed frames to the connections of one project.
//!
//! Each project room owns one tokio broadcast channel. A frame is encoded
//! once, wrapped in an [`Envelope`] naming its sender and [`Target`], and
//! every connection task filters with [`Envelope::is_for`] before writing
//! it to its socket.

use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::Frame;
use crate::room::{Outgoing, ProjectRoom, Target};

/// An encoded frame in flight through a room.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: Uuid,
    pub target: Target,
    pub text: String,
}

impl Envelope {
    pub fn is_for(&self, peer_id: Uuid) -> bool {
        self.target.includes(self.sender, peer_id)
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// Broadcast channel plus routing state for one project room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Envelope>>,
    room: Mutex<ProjectRoom>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` is how many envelopes a slow connection may fall behind
    /// before it starts losing them.
    pub fn new(project_id: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            room: Mutex::new(ProjectRoom::new(project_id)),
            capacity,
            atomic_stats: AtomicBroadcastStats::default(),
        }
    }

    /// Register a connection and return its receiver.
    pub fn add_peer(
        &self,
        peer_id: Uuid,
        username: impl Into<String>,
    ) -> broadcast::Receiver<Arc<Envelope>> {
        let mut room = self.room.lock();
        room.join(peer_id, username);
        self.sender.subscribe()
    }

    /// Unregister a connection and announce the departure if it was the
    /// user's last one. Returns the number of envelopes sent.
    pub fn remove_peer(&self, peer_id: Uuid) -> usize {
        let outgoing = self.room.lock().leave(peer_id);
        self.publish(peer_id, outgoing)
    }

    /// Route an inbound frame. Returns the number of envelopes sent.
    pub fn handle(&self, peer_id: Uuid, frame: Frame) -> usize {
        let outgoing = self.room.lock().handle(peer_id, frame);
        self.publish(peer_id, outgoing)
    }

    fn publish(&self, sender: Uuid, outgoing: Vec<Outgoing>) -> usize {
        let mut sent = 0;
        for out in outgoing {
            let text = match out.frame.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Dropping {}: {e}", out.frame.event_name());
                    self.atomic_stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            let envelope = Arc::new(Envelope {
                sender,
                target: out.target,
                text,
            });
            // No receivers is not an error: the room may be empty.
            let _ = self.sender.send(envelope);
            self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
            sent += 1;
        }
        sent
    }

    /// Account for envelopes a lagging receiver missed.
    pub fn record_lagged(&self, missed: u64) {
        self.atomic_stats
            .messages_dropped
            .fetch_add(missed, Ordering::Relaxed);
    }

    pub fn peer_count(&self) -> usize {
        self.room.lock().peer_count()
    }

    pub fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.room.lock().username(peer_id).is_some()
    }

    /// Number of (user, file) presence records the room holds.
    pub fn live_record_count(&self) -> usize {
        self.room.lock().live_users().records().count()
    }

    pub fn project_id(&self) -> String {
        self.room.lock().project_id().to_string()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peer_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Project id → broadcast group.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    pub async fn get_or_create(&self, project_id: &str) -> Arc<BroadcastGroup> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(project_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(project_id, self.default_capacity)))
            .clone()
    }

    /// Join `project_id` as `peer_id`, creating the room if needed.
    ///
    /// The peer is added while the room table is write-locked, so
    /// [`RoomManager::remove_if_empty`] can never drop a room between lookup
    /// and join. Returns `None` if the room already holds `max_peers`
    /// connections.
    pub async fn join(
        &self,
        project_id: &str,
        peer_id: Uuid,
        username: impl Into<String>,
        max_peers: usize,
    ) -> Option<(Arc<BroadcastGroup>, broadcast::Receiver<Arc<Envelope>>)> {
        let mut rooms = self.rooms.write().await;
        let group = rooms
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(project_id, self.default_capacity)))
            .clone();

        if group.peer_count() >= max_peers {
            if group.peer_count() == 0 {
                rooms.remove(project_id);
            }
            return None;
        }
        let rx = group.add_peer(peer_id, username);
        Some((group, rx))
    }

    /// Drop a room with no connections left.
    pub async fn remove_if_empty(&self, project_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms.get(project_id).is_some_and(|room| room.peer_count() == 0) {
            rooms.remove(project_id);
            return true;
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_projects(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

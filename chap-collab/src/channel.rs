//! Change channel: outbound transport plus typed inbound subscriptions.
//!
//! ```text
//!                       ┌──────────────┐
//! FileSession ─publish─►│  Transport   │──► relay / hub ──► peers
//!                       └──────────────┘
//! peers ──► relay / hub ──► Router::route(frame)
//!                              │  Topic::File(id) | Topic::Presence
//!                              ├──► Subscription (FileSession for id)
//!                              └──► Subscription (Workspace)
//! ```
//!
//! Frames reach each matching subscriber in receipt order. Unsubscribing
//! drops the sender half, so a subscription sees nothing routed after
//! [`Router::unsubscribe`] returns. Nothing is acknowledged, retried or
//! de-duplicated.

use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::patch::{LogEntry, Patch};
use crate::protocol::{ChangeEvent, FileId, Frame, ProtocolError, Scope};
use crate::room::ProjectRoom;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Fire-and-forget outbound side of a connection.
pub trait Transport: Send + Sync {
    fn send(&self, frame: &Frame) -> Result<(), TransportError>;
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Content and cursor traffic for one file.
    File(FileId),
    /// Tab presence traffic.
    Presence,
}

impl Topic {
    pub fn matches(&self, frame: &Frame) -> bool {
        match (self, frame.scope()) {
            (Topic::File(id), Scope::File(target)) => id == target,
            (Topic::File(_), Scope::AllFiles) => true,
            (Topic::Presence, Scope::Presence) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Receiving half of a subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next buffered frame, without waiting.
    pub fn try_next(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next frame. `None` once unsubscribed and drained.
    pub async fn next(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

struct Subscriber {
    id: SubscriptionId,
    topic: Topic,
    tx: mpsc::UnboundedSender<Frame>,
}

/// Dispatches inbound frames to subscriptions by topic.
#[derive(Default)]
pub struct Router {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            id,
            topic: topic.clone(),
            tx,
        });
        trace!("Subscribed {id:?} to {topic:?}");
        Subscription { id, topic, rx }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    /// Deliver `frame` to every matching subscription.
    ///
    /// Subscriptions whose receiver was dropped are removed. Returns the
    /// number of deliveries.
    pub fn route(&self, frame: &Frame) -> usize {
        let mut delivered = 0;
        self.subscribers.lock().retain(|s| {
            if !s.topic.matches(frame) {
                return !s.tx.is_closed();
            }
            match s.tx.send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        if delivered == 0 {
            trace!("No subscriber for {}", frame.event_name());
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// A client's view of the shared channel.
#[derive(Clone)]
pub struct ChangeChannel {
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
}

impl ChangeChannel {
    pub fn new(transport: Arc<dyn Transport>, router: Arc<Router>) -> Self {
        Self { transport, router }
    }

    /// Send a patch to every other participant on `file_id`.
    pub fn publish(
        &self,
        file_id: &FileId,
        patch: Patch,
        log_entry: LogEntry,
    ) -> Result<(), TransportError> {
        self.transport.send(&Frame::Change(ChangeEvent {
            file_id: file_id.clone(),
            patch,
            log_entry,
        }))
    }

    pub fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        self.transport.send(frame)
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.router.subscribe(topic)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.router.unsubscribe(id)
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }
}

/// In-process relay: connects several channels without a network.
///
/// Routing decisions are the same [`ProjectRoom`] rules the WebSocket relay
/// uses; delivery is synchronous, so a frame is in every recipient's
/// subscription queue by the time `send` returns.
pub struct LocalHub {
    room: Mutex<ProjectRoom>,
    links: RwLock<HashMap<Uuid, Arc<Router>>>,
    frames_routed: AtomicU64,
}

impl LocalHub {
    pub fn new(project_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            room: Mutex::new(ProjectRoom::new(project_id)),
            links: RwLock::new(HashMap::new()),
            frames_routed: AtomicU64::new(0),
        })
    }

    /// Attach a new participant. Returns its peer id and channel.
    pub fn connect(self: &Arc<Self>, username: impl Into<String>) -> (Uuid, ChangeChannel) {
        let peer_id = Uuid::new_v4();
        let router = Arc::new(Router::new());
        let username = username.into();
        debug!("{username} connected to local hub as {peer_id}");

        self.room.lock().join(peer_id, username);
        self.links.write().insert(peer_id, router.clone());

        let link = HubLink {
            peer_id,
            hub: self.clone(),
        };
        (peer_id, ChangeChannel::new(Arc::new(link), router))
    }

    /// Detach a participant as if its connection dropped.
    pub fn disconnect(&self, peer_id: Uuid) {
        self.links.write().remove(&peer_id);
        let outgoing = self.room.lock().leave(peer_id);
        self.dispatch(peer_id, outgoing);
    }

    pub fn peer_count(&self) -> usize {
        self.links.read().len()
    }

    /// Total deliveries into participants' routers.
    pub fn frames_routed(&self) -> u64 {
        self.frames_routed.load(Ordering::Relaxed)
    }

    fn deliver(&self, from: Uuid, frame: Frame) -> Result<(), TransportError> {
        if !self.links.read().contains_key(&from) {
            return Err(TransportError::Closed);
        }
        let outgoing = self.room.lock().handle(from, frame);
        self.dispatch(from, outgoing);
        Ok(())
    }

    fn dispatch(&self, from: Uuid, outgoing: Vec<crate::room::Outgoing>) {
        let links = self.links.read();
        for out in outgoing {
            for (peer_id, router) in links.iter() {
                if out.target.includes(from, *peer_id) {
                    let n = router.route(&out.frame);
                    self.frames_routed.fetch_add(n as u64, Ordering::Relaxed);
                }
            }
        }
    }
}

struct HubLink {
    peer_id: Uuid,
    hub: Arc<LocalHub>,
}

impl Transport for HubLink {
    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        self.hub.deliver(self.peer_id, frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Origin, Position};
    use crate::protocol::CursorEvent;

    fn cursor(file: &str, user: &str) -> Frame {
        Frame::Cursor(CursorEvent {
            file_id: FileId::from(file),
            username: user.into(),
            position: Position::ZERO,
        })
    }

    #[test]
    fn test_topic_matching() {
        let f = Topic::File(FileId::from("F"));
        assert!(f.matches(&cursor("F", "a")));
        assert!(!f.matches(&cursor("G", "a")));
        assert!(f.matches(&Frame::RemoveUserCursor { username: "a".into() }));
        assert!(!f.matches(&Frame::RemoveActiveLiveUser { username: "a".into() }));
        assert!(Topic::Presence.matches(&Frame::RemoveActiveLiveUser { username: "a".into() }));
    }

    #[test]
    fn test_router_delivers_in_order() {
        let router = Router::new();
        let mut sub = router.subscribe(Topic::File(FileId::from("F")));

        router.route(&cursor("F", "a"));
        router.route(&cursor("G", "b"));
        router.route(&cursor("F", "c"));

        let names: Vec<String> = std::iter::from_fn(|| sub.try_next())
            .map(|frame| match frame {
                Frame::Cursor(e) => e.username,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_unsubscribe_is_deterministic() {
        let router = Router::new();
        let mut sub = router.subscribe(Topic::File(FileId::from("F")));
        assert!(router.unsubscribe(sub.id()));
        assert!(!router.unsubscribe(sub.id()));

        assert_eq!(router.route(&cursor("F", "a")), 0);
        assert!(sub.try_next().is_none());
        assert_eq!(router.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let router = Router::new();
        let sub = router.subscribe(Topic::Presence);
        drop(sub);
        router.route(&cursor("F", "a"));
        assert_eq!(router.subscriber_count(), 0);
    }

    #[test]
    fn test_hub_does_not_echo_to_sender() {
        let hub = LocalHub::new("p");
        let (_, alice) = hub.connect("alice");
        let (_, bob) = hub.connect("bob");
        let file = FileId::from("F");
        let mut alice_sub = alice.subscribe(Topic::File(file.clone()));
        let mut bob_sub = bob.subscribe(Topic::File(file.clone()));

        let patch = Patch::insert(Origin::Input, Position::ZERO, "x", 1);
        alice
            .publish(&file, patch.clone(), LogEntry::new("alice", None, patch))
            .unwrap();

        assert!(alice_sub.try_next().is_none());
        assert!(matches!(bob_sub.try_next(), Some(Frame::Change(_))));
        assert_eq!(hub.frames_routed(), 1);
    }

    #[test]
    fn test_hub_disconnect_announces_departure() {
        let hub = LocalHub::new("p");
        let (alice_id, alice) = hub.connect("alice");
        let (_, bob) = hub.connect("bob");
        let mut presence = bob.subscribe(Topic::Presence);
        let mut cursors = bob.subscribe(Topic::File(FileId::from("F")));

        hub.disconnect(alice_id);
        assert_eq!(hub.peer_count(), 1);
        assert!(matches!(
            presence.try_next(),
            Some(Frame::RemoveActiveLiveUser { .. })
        ));
        assert!(matches!(cursors.try_next(), Some(Frame::RemoveUserCursor { .. })));

        assert_eq!(
            alice.send(&cursor("F", "alice")),
            Err(TransportError::Closed)
        );
    }
}

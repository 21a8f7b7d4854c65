//! WebSocket relay with one room per project.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── ProjectRoom (peers, live users)
//!            ├── hello{projectId} ───┤
//! Client B ──┘                       └── BroadcastGroup ──┬──► Client A
//!                                          │              └──► Client B
//!                                          └── ContentStore::append_log (optional)
//! ```
//!
//! The first frame of every connection must be `code-editor:hello`.
//! Content and cursor frames are fanned out to the other connections of the
//! room and never echoed to the sender. Presence requests are answered
//! from the room's authoritative live-user table. A connection that falls
//! more than `broadcast_capacity` frames behind is closed rather than
//! left silently out of sync.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, Envelope, RoomManager};
use crate::protocol::Frame;
use crate::store::{ContentStore, FileStore, StoreError};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum connections per project room
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Directory for change-log persistence (None = not persisted)
    pub storage_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            storage_path: None,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    /// Connections closed because they fell too far behind their room.
    pub lagged_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub persisted_entries: u64,
}

pub struct RelayServer {
    config: RelayConfig,
    room_manager: Arc<RoomManager>,
    stats: Arc<RwLock<RelayStats>>,
    store: Option<Arc<dyn ContentStore>>,
}

impl RelayServer {
    /// Create a relay without persistence.
    pub fn new(config: RelayConfig) -> Self {
        let room_manager = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            room_manager,
            stats: Arc::new(RwLock::new(RelayStats::default())),
            store: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Create a relay, opening a [`FileStore`] if `storage_path` is set.
    pub async fn open(config: RelayConfig) -> Result<Self, StoreError> {
        let store = match &config.storage_path {
            Some(path) => {
                let store: Arc<dyn ContentStore> = Arc::new(FileStore::open(path.clone()).await?);
                info!("Persisting change logs under {}", path.display());
                Some(store)
            }
            None => None,
        };
        Ok(Self {
            store,
            ..Self::new(config)
        })
    }

    /// Persist every relayed change entry to `store`.
    pub fn with_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bind and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("New TCP connection from {addr}");

            let room_manager = self.room_manager.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            let store = self.store.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, room_manager, stats, config, store).await
                {
                    error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        room_manager: Arc<RoomManager>,
        stats: Arc<RwLock<RelayStats>>,
        config: RelayConfig,
        store: Option<Arc<dyn ContentStore>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let peer_id = Uuid::new_v4();
        let mut joined: Option<(Arc<BroadcastGroup>, String)> = None;
        let mut broadcast_rx: Option<broadcast::Receiver<Arc<Envelope>>> = None;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }

                            let frame = match Frame::decode(text.as_str()) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    warn!("Failed to decode frame from {addr}: {e}");
                                    continue;
                                }
                            };

                            match frame {
                                Frame::Hello { project_id, username } => {
                                    if joined.is_some() {
                                        debug!("Duplicate hello from {addr}");
                                        continue;
                                    }
                                    let Some((group, rx)) = room_manager
                                        .join(&project_id, peer_id, username.clone(), config.max_peers_per_room)
                                        .await
                                    else {
                                        warn!("Project {project_id} is full, rejecting {addr}");
                                        stats.write().await.rejected_connections += 1;
                                        let _ = ws_sender.send(Message::Close(None)).await;
                                        break;
                                    };
                                    broadcast_rx = Some(rx);
                                    info!("{username} joined project {project_id} from {addr}");
                                    joined = Some((group, project_id));
                                }
                                frame => {
                                    let Some((group, _)) = &joined else {
                                        warn!("{} before hello from {addr}", frame.event_name());
                                        continue;
                                    };
                                    if let (Frame::Change(event), Some(store)) = (&frame, &store) {
                                        match store.append_log(&event.file_id, &event.log_entry).await {
                                            Ok(()) => stats.write().await.persisted_entries += 1,
                                            Err(e) => warn!("Failed to persist change for {}: {e}", event.file_id),
                                        }
                                    }
                                    group.handle(peer_id, frame);
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }

                        Some(Err(e)) => {
                            error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                msg = async {
                    if let Some(ref mut rx) = broadcast_rx {
                        rx.recv().await
                    } else {
                        std::future::pending().await
                    }
                } => {
                    match msg {
                        Ok(envelope) => {
                            if !envelope.is_for(peer_id) {
                                continue;
                            }
                            if let Err(e) = ws_sender.send(Message::Text(envelope.text.clone().into())).await {
                                warn!("Failed to write to {addr}: {e}");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // Missed changes cannot be replayed; the client must reconnect.
                            warn!("Peer {peer_id} lagged by {n} frames, closing {addr}");
                            if let Some((group, _)) = &joined {
                                group.record_lagged(n);
                            }
                            stats.write().await.lagged_connections += 1;
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        if let Some((group, project_id)) = joined {
            group.remove_peer(peer_id);
            if room_manager.remove_if_empty(&project_id).await {
                info!("Room {project_id} removed (empty)");
            }
        }

        let mut s = stats.write().await;
        s.active_connections -= 1;
        s.active_rooms = room_manager.room_count().await;
        Ok(())
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.room_manager
    }

    pub fn store(&self) -> Option<&Arc<dyn ContentStore>> {
        self.store.as_ref()
    }
}

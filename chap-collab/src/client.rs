//! WebSocket connection to the relay.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - A [`ChangeChannel`] whose outbound side writes JSON text frames
//! - Inbound frames decoded and routed to subscriptions in receipt order
//!
//! There is no offline queue and no reconnection: frames sent while the
//! connection is down fail with [`TransportError::Closed`].

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::channel::{ChangeChannel, Router, Transport, TransportError};
use crate::protocol::Frame;
use crate::session::SessionConfig;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

struct WsLink {
    outgoing_tx: mpsc::UnboundedSender<Message>,
    state: Arc<RwLock<ConnectionState>>,
}

impl Transport for WsLink {
    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if *self.state.read() != ConnectionState::Connected {
            return Err(TransportError::Closed);
        }
        let text = frame.encode()?;
        self.outgoing_tx
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::Closed)
    }
}

pub struct RelayClient {
    url: String,
    channel: ChangeChannel,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl RelayClient {
    /// Connect and join the project room named in `config`.
    ///
    /// Spawns one task writing outbound frames and one routing inbound
    /// frames.
    pub async fn connect(
        url: impl Into<String>,
        config: &SessionConfig,
    ) -> Result<Self, TransportError> {
        let url = url.into();
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let router = Arc::new(Router::new());

        let hello = Frame::Hello {
            project_id: config.project_id.clone(),
            username: config.username.clone(),
        };
        outgoing_tx
            .send(Message::Text(hello.encode()?.into()))
            .map_err(|_| TransportError::Closed)?;

        // Writer task: forward outgoing channel to WebSocket
        let writer_state = state.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
            *writer_state.write() = ConnectionState::Disconnected;
        });

        // Reader task: decode and route incoming frames
        let reader_state = state.clone();
        let reader_router = router.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match Frame::decode(text.as_str()) {
                        Ok(frame) => {
                            reader_router.route(&frame);
                        }
                        Err(e) => warn!("Dropping undecodable frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *reader_state.write() = ConnectionState::Disconnected;
            debug!("Relay connection reader finished");
        });

        info!(
            "{} connected to {url} (project {})",
            config.username, config.project_id
        );

        let link = Arc::new(WsLink {
            outgoing_tx: outgoing_tx.clone(),
            state: state.clone(),
        });
        Ok(Self {
            url,
            channel: ChangeChannel::new(link, router),
            state,
            outgoing_tx,
            writer,
            reader,
        })
    }

    /// Channel for sessions and the workspace on this connection.
    pub fn channel(&self) -> ChangeChannel {
        self.channel.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close the connection. Frames sent afterwards fail.
    pub async fn disconnect(&mut self) {
        if self.connection_state() == ConnectionState::Connected {
            let _ = self.outgoing_tx.send(Message::Close(None));
        }
        *self.state.write() = ConnectionState::Disconnected;
        let _ = (&mut self.writer).await;
        self.reader.abort();
        info!("Disconnected from {}", self.url);
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_values() {
        assert_ne!(ConnectionState::Connected, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = RelayClient::connect(
            format!("ws://127.0.0.1:{port}"),
            &SessionConfig::new("alice", "p"),
        )
        .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn test_closed_link_rejects_frames() {
        let (outgoing_tx, _rx) = mpsc::unbounded_channel();
        let link = WsLink {
            outgoing_tx,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
        };
        let frame = Frame::RemoveUserCursor {
            username: "alice".into(),
        };
        assert_eq!(link.send(&frame), Err(TransportError::Closed));
    }
}

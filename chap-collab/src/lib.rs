//! # chap-collab: Real-time collaborative text sync for chap
//!
//! Keeps one logical document consistent across concurrently connected
//! editors by replaying range patches in receipt order, and tracks who is
//! looking where: per-file cursors and per-tab presence.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────┐    WebSocket     ┌──────────────┐
//! │ FileSession (per file)│ ◄──────────────► │ RelayServer  │
//! │  EditInterceptor      │    JSON frames   │  (central)   │
//! │  CursorTracker        │                  └──────┬───────┘
//! │  AuditLog, Debouncer  │                         │
//! └──────────┬────────────┘                  ┌──────┴───────┐
//!            │                               │ ProjectRoom  │
//! ┌──────────┴────────────┐                  │ live users,  │
//! │ Workspace             │                  │ fan-out      │
//! │  PresenceRegistry     │                  └──────────────┘
//! └───────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`patch`]: positions, origins, patches and log entries
//! - [`buffer`]: editing-surface boundary and a rope-backed buffer
//! - [`protocol`]: JSON wire frames
//! - [`channel`]: transport trait, typed subscriptions, in-process hub
//! - [`interceptor`]: local change → patch, with echo suppression
//! - [`session`]: one open file: apply, publish, log, save
//! - [`cursor`]: per-file cursor presence
//! - [`tabs`] / [`workspace`]: tab presence with single focus per user
//! - [`audit`]: per-file history view
//! - [`debounce`]: latest-wins delayed saves
//! - [`store`]: content store boundary
//! - [`room`] / [`broadcast`] / [`server`]: the relay
//! - [`client`]: WebSocket connection to the relay
//!
//! Convergence is best effort: patches are replayed at the positions they
//! were recorded with, so concurrent edits to overlapping ranges can leave
//! replicas different.

pub mod audit;
pub mod broadcast;
pub mod buffer;
pub mod channel;
pub mod client;
pub mod cursor;
pub mod debounce;
pub mod interceptor;
pub mod patch;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;
pub mod store;
pub mod tabs;
pub mod workspace;

// Re-exports for convenience
pub use audit::AuditLog;
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use buffer::{BufferChange, EditorSurface, TextBuffer};
pub use channel::{
    ChangeChannel, LocalHub, Router, Subscription, SubscriptionId, Topic, Transport,
    TransportError,
};
pub use client::{ConnectionState, RelayClient};
pub use cursor::{CursorColor, CursorIndicator, CursorTracker};
pub use debounce::{Debouncer, DEFAULT_SAVE_DELAY};
pub use interceptor::EditInterceptor;
pub use patch::{LogEntry, Origin, Patch, Position};
pub use protocol::{ChangeEvent, CursorEvent, FileId, Frame, PresenceEvent, ProtocolError};
pub use room::ProjectRoom;
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use session::{FileSession, Notice, SessionConfig};
pub use store::{ContentStore, FileStore, MemoryStore, StoreError};
pub use tabs::{PresenceRecord, PresenceRegistry, PresenceState, Tab};
pub use workspace::Workspace;

//! One open file: the editing surface wired to the change channel.
//!
//! ```text
//!   local edit ──► EditorSurface ──BufferChange──► on_buffer_change()
//!                                                    │ EditInterceptor
//!                                                    ├──► AuditLog::append
//!                                                    ├──► ChangeChannel::publish
//!                                                    └──► Debouncer (save)
//!
//!   Frame::Change ──► apply_remote()
//!                       begin_remote ─► replace_range ─► on_buffer_change (suppressed)
//!                       end_remote   ─► AuditLog::append(sender's entry)
//! ```
//!
//! A session is driven through `&mut self` from a single task, so local
//! emissions are strictly ordered and remote patches apply one at a time.
//! Inbound frames wait in the session's subscription until [`FileSession::pump`]
//! or [`FileSession::recv`] handles them.

use log::{debug, info, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audit::AuditLog;
use crate::buffer::{BufferChange, EditorSurface};
use crate::channel::{ChangeChannel, Subscription, Topic};
use crate::cursor::CursorTracker;
use crate::debounce::{Debouncer, DEFAULT_SAVE_DELAY};
use crate::interceptor::EditInterceptor;
use crate::patch::{LogEntry, Origin, Patch, Position};
use crate::protocol::{ChangeEvent, FileId, Frame};
use crate::store::{ContentStore, StoreError};

/// Per-user session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub username: String,
    /// Avatar reference attached to log entries and presence.
    pub avatar: Option<String>,
    pub project_id: String,
    /// Quiet window before the buffer is saved.
    pub save_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: "anonymous".to_string(),
            avatar: None,
            project_id: "default".to_string(),
            save_delay: DEFAULT_SAVE_DELAY,
        }
    }
}

impl SessionConfig {
    pub fn new(username: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            project_id: project_id.into(),
            ..Self::default()
        }
    }
}

/// Non-fatal faults reported to the user. Editing continues after each.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Notice {
    #[error("Could not load file: {0}")]
    FetchFailed(String),
    #[error("Could not save file: {0}")]
    SaveFailed(String),
    #[error("Could not load history: {0}")]
    HistoryFailed(String),
    #[error("Could not reach collaborators: {0}")]
    PublishFailed(String),
}

pub struct FileSession<E: EditorSurface> {
    file_id: FileId,
    config: SessionConfig,
    surface: E,
    channel: ChangeChannel,
    store: Arc<dyn ContentStore>,
    subscription: Option<Subscription>,
    interceptor: EditInterceptor,
    cursors: CursorTracker,
    audit: AuditLog,
    debouncer: Debouncer<FileId>,
    notices: mpsc::UnboundedSender<Notice>,
    closed: bool,
}

impl<E: EditorSurface> FileSession<E> {
    /// Open `file_id` on `surface`.
    ///
    /// Subscribes before fetching so frames sent while the content loads
    /// are queued and applied afterwards. The fetched content is loaded
    /// with [`Origin::SetValue`] and never re-broadcast; a fetch failure
    /// leaves the buffer empty and raises [`Notice::FetchFailed`].
    pub async fn open(
        file_id: FileId,
        config: SessionConfig,
        surface: E,
        channel: ChangeChannel,
        store: Arc<dyn ContentStore>,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let subscription = channel.subscribe(Topic::File(file_id.clone()));
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let cursors = CursorTracker::new(file_id.clone(), config.username.clone());
        let debouncer = Debouncer::new(config.save_delay);

        let mut session = Self {
            file_id,
            config,
            surface,
            channel,
            store,
            subscription: Some(subscription),
            interceptor: EditInterceptor::new(),
            cursors,
            audit: AuditLog::new(),
            debouncer,
            notices,
            closed: false,
        };

        let content = match session.store.fetch_content(&session.file_id).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to fetch {}: {e}", session.file_id);
                session.notify(Notice::FetchFailed(e.to_string()));
                String::new()
            }
        };
        let change = session.surface.set_value(&content);
        session.on_buffer_change(change);
        info!(
            "{} opened {} ({} bytes)",
            session.config.username,
            session.file_id,
            content.len()
        );

        let file_id = session.file_id.clone();
        session.send(&Frame::LoadLiveUsers {
            file_id: file_id.clone(),
        });
        session.send(&Frame::RequestCursors { file_id });

        (session, notice_rx)
    }

    /// Handle a change notification from the surface.
    ///
    /// Returns the emitted patch, or `None` when the change was suppressed.
    pub fn on_buffer_change(&mut self, change: BufferChange) -> Option<Patch> {
        let patch = self.interceptor.intercept(&change)?;
        let entry = LogEntry::new(
            self.config.username.clone(),
            self.config.avatar.clone(),
            patch.clone(),
        );

        self.audit.append(entry.clone());
        if let Err(e) = self.channel.publish(&self.file_id, patch.clone(), entry) {
            warn!("Failed to publish patch for {}: {e}", self.file_id);
            self.notify(Notice::PublishFailed(e.to_string()));
        }
        self.schedule_save();
        Some(patch)
    }

    /// Perform a local edit and report the cursor afterwards.
    pub fn local_edit(
        &mut self,
        text: &str,
        from: Position,
        to: Position,
        origin: Origin,
    ) -> Option<Patch> {
        if self.closed {
            return None;
        }
        let change = self.surface.replace_range(text, from, to, origin);
        let patch = self.on_buffer_change(change);
        let cursor = self.surface.cursor();
        self.publish_cursor(cursor);
        patch
    }

    /// Move the local cursor and publish it. Returns the clamped position.
    pub fn move_cursor(&mut self, position: Position) -> Position {
        let position = self.surface.set_cursor(position);
        if !self.closed {
            self.publish_cursor(position);
        }
        position
    }

    fn publish_cursor(&mut self, position: Position) {
        let event = self.cursors.update_local(position);
        self.send(&Frame::Cursor(event));
    }

    /// Handle one inbound frame. Returns `true` if it changed local state
    /// or was answered.
    pub fn handle_frame(&mut self, frame: Frame) -> bool {
        if self.closed {
            return false;
        }
        match frame {
            Frame::Change(event) => self.apply_remote(event),
            Frame::Cursor(event) => self.cursors.handle_remote(&event),
            Frame::RemoveCursor { file_id, username } => {
                file_id == self.file_id && self.cursors.remove(&username).is_some()
            }
            Frame::RemoveUserCursor { username } => self.cursors.remove(&username).is_some(),
            Frame::RequestCursors { file_id } if file_id == self.file_id => {
                let users = self.cursors.snapshot();
                self.send(&Frame::CursorSnapshot { file_id, users });
                true
            }
            Frame::CursorSnapshot { file_id, users } if file_id == self.file_id => {
                self.cursors.merge_snapshot(&users);
                true
            }
            other => {
                trace!("{} ignoring {}", self.file_id, other.event_name());
                false
            }
        }
    }

    /// Apply a peer's patch to the buffer.
    ///
    /// The buffer change this produces is fed back through the interceptor
    /// with `applying_remote` set, so it is logged once (as the sender's
    /// entry) and never re-published or saved from here.
    pub fn apply_remote(&mut self, event: ChangeEvent) -> bool {
        if self.closed || event.file_id != self.file_id {
            return false;
        }
        let patch = event.patch;
        if patch.origin.is_bulk_load() || patch.is_noop() {
            debug!("Skipping remote {} patch on {}", patch.origin.as_str(), self.file_id);
            return false;
        }

        self.interceptor.begin_remote();
        let change = self
            .surface
            .replace_range(&patch.inserted_text, patch.from, patch.to, patch.origin);
        let echoed = self.on_buffer_change(change);
        self.interceptor.end_remote();
        debug_assert!(echoed.is_none());

        self.audit.append(event.log_entry);
        true
    }

    /// Handle every frame already queued. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(frame) = self.subscription.as_mut().and_then(Subscription::try_next) {
            self.handle_frame(frame);
            handled += 1;
        }
        handled
    }

    /// Wait for the next frame and handle it.
    ///
    /// Returns `false` once the session is closed.
    pub async fn recv(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.next().await {
            Some(frame) => {
                self.handle_frame(frame);
                true
            }
            None => false,
        }
    }

    /// Replace the audit log with the authoritative history.
    pub async fn open_history(&mut self) -> Result<usize, StoreError> {
        match self.store.fetch_log(&self.file_id).await {
            Ok(history) => {
                let count = history.len();
                self.audit.open_history(history);
                Ok(count)
            }
            Err(e) => {
                warn!("Failed to load history for {}: {e}", self.file_id);
                self.notify(Notice::HistoryFailed(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn close_history(&mut self) {
        self.audit.close_history();
    }

    /// End the session.
    ///
    /// Pending saves are aborted, the local cursor is withdrawn and the
    /// subscription is released. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.interceptor.close();
        self.debouncer.shutdown();
        self.send(&self.cursors.departure());
        self.closed = true;

        if let Some(subscription) = self.subscription.take() {
            self.channel.unsubscribe(subscription.id());
        }
        self.cursors.clear();
        info!("{} closed {}", self.config.username, self.file_id);
    }

    fn schedule_save(&self) {
        let store = self.store.clone();
        let file_id = self.file_id.clone();
        let content = self.surface.value();
        let notices = self.notices.clone();

        self.debouncer.schedule(self.file_id.clone(), async move {
            match store.save_content(&file_id, &content).await {
                Ok(()) => debug!("Saved {file_id} ({} bytes)", content.len()),
                Err(e) => {
                    warn!("Failed to save {file_id}: {e}");
                    let _ = notices.send(Notice::SaveFailed(e.to_string()));
                }
            }
        });
    }

    fn send(&self, frame: &Frame) {
        if let Err(e) = self.channel.send(frame) {
            warn!("Failed to send {}: {e}", frame.event_name());
            self.notify(Notice::PublishFailed(e.to_string()));
        }
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn surface(&self) -> &E {
        &self.surface
    }

    pub fn value(&self) -> String {
        self.surface.value()
    }

    pub fn cursors(&self) -> &CursorTracker {
        &self.cursors
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn is_applying_remote(&self) -> bool {
        self.interceptor.is_applying_remote()
    }

    pub fn is_save_pending(&self) -> bool {
        self.debouncer.is_pending(&self.file_id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<E: EditorSurface> Drop for FileSession<E> {
    fn drop(&mut self) {
        self.close();
    }
}

//! Open tabs and who is looking at them.
//!
//! The [`Workspace`] owns the client's [`PresenceRegistry`], announces the
//! local user's tab activity and applies presence traffic from the relay.

use log::{debug, info};

use crate::channel::{ChangeChannel, Subscription, Topic, TransportError};
use crate::patch::unix_millis;
use crate::protocol::{FileId, Frame, PresenceEvent};
use crate::session::SessionConfig;
use crate::tabs::{PresenceRecord, PresenceRegistry, Tab};

pub struct Workspace {
    config: SessionConfig,
    channel: ChangeChannel,
    registry: PresenceRegistry,
    subscription: Option<Subscription>,
}

impl Workspace {
    pub fn new(config: SessionConfig, channel: ChangeChannel) -> Self {
        let subscription = channel.subscribe(Topic::Presence);
        Self {
            config,
            channel,
            registry: PresenceRegistry::new(),
            subscription: Some(subscription),
        }
    }

    /// Open a tab. The local user starts present but inactive in it.
    ///
    /// Returns `Ok(false)` if the tab was already open.
    pub fn open_tab(&mut self, file_id: FileId) -> Result<bool, TransportError> {
        if !self.registry.open_tab(file_id.clone()) {
            return Ok(false);
        }
        self.announce(file_id, false)?;
        Ok(true)
    }

    /// Focus a tab, opening it first if needed. The local user's other
    /// tabs become inactive.
    pub fn activate_tab(&mut self, file_id: FileId) -> Result<(), TransportError> {
        self.registry.open_tab(file_id.clone());
        self.announce(file_id, true)
    }

    /// Close a tab and tell peers the local user left it.
    pub fn close_tab(&mut self, file_id: &FileId) -> Result<Option<Tab>, TransportError> {
        let Some(tab) = self.registry.close_tab(file_id) else {
            return Ok(None);
        };
        self.channel.send(&Frame::LeaveFile {
            file_id: file_id.clone(),
            username: self.config.username.clone(),
        })?;
        debug!("{} closed tab {file_id}", self.config.username);
        Ok(Some(tab))
    }

    fn announce(&mut self, file_id: FileId, active: bool) -> Result<(), TransportError> {
        let record = PresenceRecord {
            file_id,
            username: self.config.username.clone(),
            image: self.config.avatar.clone(),
            is_active_in_tab: active,
            is_live: true,
            last_seen_timestamp: unix_millis(),
        };
        let event = PresenceEvent::from_record(&record, &self.config.project_id);
        self.registry.user_joined(record);
        self.channel.send(&Frame::JoinFile(event))
    }

    /// Apply one presence frame.
    pub fn handle_frame(&mut self, frame: &Frame) -> bool {
        self.registry.apply(frame)
    }

    /// Apply every presence frame already queued.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(frame) = self.subscription.as_mut().and_then(Subscription::try_next) {
            self.registry.apply(&frame);
            handled += 1;
        }
        handled
    }

    /// Wait for the next presence frame and apply it. `false` after shutdown.
    pub async fn recv(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.next().await {
            Some(frame) => {
                self.registry.apply(&frame);
                true
            }
            None => false,
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn channel(&self) -> &ChangeChannel {
        &self.channel
    }

    pub fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.channel.unsubscribe(subscription.id());
            info!("{} left the workspace", self.config.username);
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalHub;
    use crate::tabs::PresenceState;

    fn workspace(hub: &std::sync::Arc<LocalHub>, user: &str) -> Workspace {
        let (_, channel) = hub.connect(user);
        Workspace::new(SessionConfig::new(user, "p"), channel)
    }

    #[test]
    fn test_open_tab_is_present_inactive() {
        let hub = LocalHub::new("p");
        let mut ws = workspace(&hub, "alice");
        let f1 = FileId::from("F1");

        assert!(ws.open_tab(f1.clone()).unwrap());
        assert!(!ws.open_tab(f1.clone()).unwrap());
        assert_eq!(ws.registry().state(&f1, "alice"), PresenceState::PresentInactive);
    }

    #[test]
    fn test_activation_moves_focus() {
        let hub = LocalHub::new("p");
        let mut ws = workspace(&hub, "alice");
        let f1 = FileId::from("F1");
        let f2 = FileId::from("F2");

        ws.activate_tab(f1.clone()).unwrap();
        ws.activate_tab(f2.clone()).unwrap();
        ws.pump();

        assert_eq!(ws.registry().state(&f1, "alice"), PresenceState::PresentInactive);
        assert_eq!(ws.registry().state(&f2, "alice"), PresenceState::PresentActive);
        assert_eq!(ws.registry().active_tab_of("alice"), Some(&f2));
    }

    #[test]
    fn test_peer_sees_join_and_leave() {
        let hub = LocalHub::new("p");
        let mut alice = workspace(&hub, "alice");
        let mut bob = workspace(&hub, "bob");
        let f1 = FileId::from("F1");
        bob.open_tab(f1.clone()).unwrap();

        alice.activate_tab(f1.clone()).unwrap();
        bob.pump();
        assert_eq!(bob.registry().state(&f1, "alice"), PresenceState::PresentActive);

        alice.close_tab(&f1).unwrap();
        bob.pump();
        assert_eq!(bob.registry().state(&f1, "alice"), PresenceState::Absent);
    }

    #[test]
    fn test_peer_join_does_not_open_tabs() {
        let hub = LocalHub::new("p");
        let mut alice = workspace(&hub, "alice");
        let mut bob = workspace(&hub, "bob");
        let f1 = FileId::from("F1");
        bob.open_tab(f1.clone()).unwrap();
        alice.activate_tab(f1.clone()).unwrap();
        bob.pump();
        assert_eq!(bob.registry().state(&f1, "alice"), PresenceState::PresentActive);

        alice.activate_tab(FileId::from("SECRET")).unwrap();
        bob.pump();

        let tabs: Vec<&str> = bob.registry().tabs().iter().map(|t| t.file_id.as_str()).collect();
        assert_eq!(tabs, ["F1"]);
        assert_eq!(bob.registry().state(&f1, "alice"), PresenceState::PresentInactive);
        assert_eq!(bob.registry().active_tab_of("alice"), None);
    }

    #[test]
    fn test_shutdown_stops_delivery() {
        let hub = LocalHub::new("p");
        let mut ws = workspace(&hub, "alice");
        ws.shutdown();
        ws.shutdown();
        assert_eq!(ws.channel().router().subscriber_count(), 0);
        assert_eq!(ws.pump(), 0);
    }
}

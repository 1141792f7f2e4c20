//! Cross-tab broadcast channels.
//!
//! Sibling engine instances in one process (the analog of same-origin
//! browser tabs) mirror vote totals and auth changes through named broadcast
//! channels in a shared [`BusHub`]. Best-effort: an instance without a hub
//! silently no-ops.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{Session, VoteDirection};

const AUTH_CHANNEL: &str = "threadkit_auth";

/// Final vote totals mirrored to sibling tabs on the same page.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteBroadcast {
    pub comment_id: Uuid,
    pub vote_type: Option<VoteDirection>,
    pub upvotes: i64,
    pub downvotes: i64,
}

#[derive(Debug, Clone)]
pub enum BusMessage {
    Vote(VoteBroadcast),
    Login(Box<Session>),
    Logout,
}

/// Registry of named broadcast channels shared by every engine instance the
/// embedder creates.
#[derive(Default)]
pub struct BusHub {
    channels: DashMap<String, broadcast::Sender<BusMessage>>,
}

impl BusHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn channel(&self, name: &str) -> broadcast::Sender<BusMessage> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

/// One instance's handle onto the hub, scoped to a page URL.
#[derive(Clone)]
pub struct CrossTabBus {
    hub: Option<Arc<BusHub>>,
    vote_channel: String,
}

impl CrossTabBus {
    pub fn new(hub: Option<Arc<BusHub>>, page_url: &str) -> Self {
        Self {
            hub,
            vote_channel: format!("threadkit_page:{page_url}"),
        }
    }

    /// A bus that never delivers; for hosts without cross-tab support.
    pub fn disabled() -> Self {
        Self {
            hub: None,
            vote_channel: String::new(),
        }
    }

    pub fn publish_vote(&self, vote: VoteBroadcast) {
        if let Some(hub) = &self.hub {
            let _ = hub.channel(&self.vote_channel).send(BusMessage::Vote(vote));
        }
    }

    pub fn subscribe_votes(&self) -> Option<broadcast::Receiver<BusMessage>> {
        self.hub
            .as_ref()
            .map(|hub| hub.channel(&self.vote_channel).subscribe())
    }

    pub fn publish_login(&self, session: Session) {
        if let Some(hub) = &self.hub {
            let _ = hub
                .channel(AUTH_CHANNEL)
                .send(BusMessage::Login(Box::new(session)));
        }
    }

    pub fn publish_logout(&self) {
        if let Some(hub) = &self.hub {
            let _ = hub.channel(AUTH_CHANNEL).send(BusMessage::Logout);
        }
    }

    pub fn subscribe_auth(&self) -> Option<broadcast::Receiver<BusMessage>> {
        self.hub
            .as_ref()
            .map(|hub| hub.channel(AUTH_CHANNEL).subscribe())
    }
}

//! Typing indicator aggregation.
//!
//! Entries live for 3s from the last refresh and are pruned by a periodic
//! sweep driven by the connection task.

use std::collections::HashMap;

use uuid::Uuid;

use threadkit_client_common::types::{TypingUser, UserPublic};

/// How long a typing entry stays alive without a refresh.
pub const TYPING_TTL_MS: i64 = 3000;

#[derive(Debug, Default)]
pub struct TypingTracker {
    pages: HashMap<Uuid, HashMap<Uuid, TypingUser>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh an entry; the expiry restarts from `now_ms`.
    pub fn insert(&mut self, page_id: Uuid, user: &UserPublic, reply_to: Option<Uuid>, now_ms: i64) {
        self.pages.entry(page_id).or_default().insert(
            user.id,
            TypingUser {
                user_id: user.id,
                user_name: user.name.clone(),
                reply_to,
                expires_at: now_ms + TYPING_TTL_MS,
            },
        );
    }

    /// Drop expired entries; returns the pages whose lists changed.
    pub fn sweep(&mut self, now_ms: i64) -> Vec<Uuid> {
        let mut changed = Vec::new();
        self.pages.retain(|page_id, users| {
            let before = users.len();
            users.retain(|_, entry| entry.expires_at > now_ms);
            if users.len() != before {
                changed.push(*page_id);
            }
            !users.is_empty()
        });
        changed
    }

    /// Current typers on a page, unspecified order.
    pub fn typing_on(&self, page_id: Uuid) -> Vec<TypingUser> {
        self.pages
            .get(&page_id)
            .map(|users| users.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_page(&mut self, page_id: Uuid) {
        self.pages.remove(&page_id);
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}

//! Per-page presence aggregation.

use std::collections::HashMap;

use uuid::Uuid;

use threadkit_client_common::types::UserPublic;

#[derive(Debug, Default)]
pub struct PresenceTracker {
    pages: HashMap<Uuid, Vec<UserPublic>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full replacement, sent by the server on subscribe.
    pub fn replace(&mut self, page_id: Uuid, users: Vec<UserPublic>) {
        self.pages.insert(page_id, users);
    }

    /// Delta: a user joined. Duplicate joins refresh the stored snapshot.
    pub fn join(&mut self, page_id: Uuid, user: UserPublic) {
        let users = self.pages.entry(page_id).or_default();
        match users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user,
            None => users.push(user),
        }
    }

    /// Delta: a user left.
    pub fn leave(&mut self, page_id: Uuid, user_id: Uuid) {
        if let Some(users) = self.pages.get_mut(&page_id) {
            users.retain(|u| u.id != user_id);
        }
    }

    pub fn users_on(&self, page_id: Uuid) -> Vec<UserPublic> {
        self.pages.get(&page_id).cloned().unwrap_or_default()
    }

    pub fn clear_page(&mut self, page_id: Uuid) {
        self.pages.remove(&page_id);
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserPublic {
        UserPublic {
            id: Uuid::now_v7(),
            name: name.to_string(),
            avatar_url: None,
            karma: 0,
        }
    }

    #[test]
    fn test_replace_then_deltas() {
        let mut tracker = PresenceTracker::new();
        let page_id = Uuid::now_v7();
        let alice = user("alice");
        let bob = user("bob");

        tracker.replace(page_id, vec![alice.clone()]);
        assert_eq!(tracker.users_on(page_id).len(), 1);

        tracker.join(page_id, bob.clone());
        assert_eq!(tracker.users_on(page_id).len(), 2);

        tracker.leave(page_id, alice.id);
        let users = tracker.users_on(page_id);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, bob.id);
    }

    #[test]
    fn test_duplicate_join_is_refresh() {
        let mut tracker = PresenceTracker::new();
        let page_id = Uuid::now_v7();
        let mut alice = user("alice");

        tracker.join(page_id, alice.clone());
        alice.karma = 9;
        tracker.join(page_id, alice.clone());

        let users = tracker.users_on(page_id);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].karma, 9);
    }
}

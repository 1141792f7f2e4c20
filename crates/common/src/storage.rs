//! Durable key-value boundary for session material.
//!
//! The engine stores at most four values: session token, refresh token, the
//! cached user profile, and the viewer's last-chosen sort order. Browser
//! hosts back this with local storage; non-browser hosts use the file or
//! in-memory implementations here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::types::{AuthUser, Session, SortOrder};

/// Storage keys, all prefixed `threadkit_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKey {
    Token,
    RefreshToken,
    User,
    Sort,
}

impl StorageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::Token => "threadkit_token",
            StorageKey::RefreshToken => "threadkit_refresh_token",
            StorageKey::User => "threadkit_user",
            StorageKey::Sort => "threadkit_sort",
        }
    }
}

/// Synchronous persistence boundary. Implementations must tolerate
/// concurrent access from multiple engine instances; last writer wins.
pub trait TokenStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

// ============================================================================
// Typed helpers
// ============================================================================

/// Persist a session across the token, refresh-token, and user keys.
pub fn save_session(storage: &dyn TokenStorage, session: &Session) {
    storage.set(StorageKey::Token.as_str(), &session.token);
    match &session.refresh_token {
        Some(refresh) => storage.set(StorageKey::RefreshToken.as_str(), refresh),
        None => storage.remove(StorageKey::RefreshToken.as_str()),
    }
    if let Ok(user_json) = serde_json::to_string(&session.user) {
        storage.set(StorageKey::User.as_str(), &user_json);
    }
}

/// Rehydrate a session; `None` unless both a token and a parseable user
/// snapshot are present.
pub fn load_session(storage: &dyn TokenStorage) -> Option<Session> {
    let token = storage.get(StorageKey::Token.as_str())?;
    let user: AuthUser = serde_json::from_str(&storage.get(StorageKey::User.as_str())?).ok()?;
    Some(Session {
        token,
        refresh_token: storage.get(StorageKey::RefreshToken.as_str()),
        user,
    })
}

pub fn clear_session(storage: &dyn TokenStorage) {
    storage.remove(StorageKey::Token.as_str());
    storage.remove(StorageKey::RefreshToken.as_str());
    storage.remove(StorageKey::User.as_str());
}

pub fn save_sort(storage: &dyn TokenStorage, sort: SortOrder) {
    storage.set(StorageKey::Sort.as_str(), sort.as_str());
}

pub fn load_sort(storage: &dyn TokenStorage) -> Option<SortOrder> {
    SortOrder::parse(&storage.get(StorageKey::Sort.as_str())?)
}

// ============================================================================
// Implementations
// ============================================================================

/// Process-local storage; the stub for contexts without durable storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().expect("storage lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .expect("storage lock")
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.write().expect("storage lock").remove(key);
    }
}

/// JSON-file-backed storage for native hosts. The whole map is rewritten on
/// every mutation; the value set is tiny.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl FileStorage {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            values: RwLock::new(values),
        }
    }

    fn flush(&self, values: &HashMap<String, String>) {
        match serde_json::to_string_pretty(values) {
            Ok(raw) => {
                if let Err(err) = std::fs::write(&self.path, raw) {
                    tracing::warn!(path = %self.path.display(), %err, "failed to persist storage");
                }
            }
            Err(err) => tracing::warn!(%err, "failed to serialize storage"),
        }
    }
}

impl TokenStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().expect("storage lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.write().expect("storage lock");
        values.insert(key.to_string(), value.to_string());
        self.flush(&values);
    }

    fn remove(&self, key: &str) {
        let mut values = self.values.write().expect("storage lock");
        values.remove(key);
        self.flush(&values);
    }
}

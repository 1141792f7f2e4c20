//! Policy layer binding socket events to the store.
//!
//! Echo suppression drops inbound events that mirror writes this client
//! already applied optimistically; everything else is routed to the store —
//! immediately in `auto` mode, or through per-parent pending buckets in
//! `banner` mode (additions only; edits, deletes, votes and pins always
//! apply immediately).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use threadkit_client_common::RealTimeMode;
use threadkit_client_common::wire::WireComment;
use threadkit_client_ws::SocketEvent;

use crate::store::CommentStore;

/// Short-lived set of locally-originated comment ids. Entries expire after
/// the TTL so a swallowed server echo cannot poison the set forever.
#[derive(Clone)]
pub struct EchoSet {
    cache: moka::sync::Cache<Uuid, ()>,
}

impl EchoSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: moka::sync::Cache::builder()
                .max_capacity(1024)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Record a completed local write.
    pub fn record(&self, id: Uuid) {
        self.cache.insert(id, ());
    }

    /// Consume a matching entry: true exactly once per recorded id.
    pub fn take(&self, id: Uuid) -> bool {
        self.cache.remove(&id).is_some()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.cache.contains_key(&id)
    }
}

pub struct Reconciler {
    store: Arc<CommentStore>,
    mode: RealTimeMode,
    echo: EchoSet,
    /// Banner-mode buffers, partitioned by parent (`None` = root bucket).
    pending: Mutex<HashMap<Option<Uuid>, Vec<WireComment>>>,
}

impl Reconciler {
    pub fn new(store: Arc<CommentStore>, mode: RealTimeMode) -> Arc<Self> {
        let echo = store.echo_set();
        Arc::new(Self {
            store,
            mode,
            echo,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn mode(&self) -> RealTimeMode {
        self.mode
    }

    /// Buffered root-level additions awaiting the viewer's opt-in.
    pub fn pending_root_count(&self) -> usize {
        self.pending_count(None)
    }

    pub fn pending_count(&self, parent: Option<Uuid>) -> usize {
        self.pending
            .lock()
            .expect("pending lock")
            .get(&parent)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Drain one bucket, applying its events in arrival order. Buckets are
    /// independent: draining the root bucket leaves per-parent buckets
    /// untouched.
    pub fn load_pending(&self, parent: Option<Uuid>) {
        let buffered = self
            .pending
            .lock()
            .expect("pending lock")
            .remove(&parent)
            .unwrap_or_default();
        for wire in buffered {
            self.store.add_comment(wire);
        }
    }

    /// Route one socket event. Events for other pages are ignored.
    pub fn handle_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::CommentAdded { page_id, comment } => {
                if !self.is_current_page(page_id) {
                    return;
                }
                if self.echo.take(comment.i) {
                    tracing::debug!(comment_id = %comment.i, "echo suppressed");
                    return;
                }
                match self.mode {
                    RealTimeMode::Auto => {
                        let comment_id = comment.i;
                        let nests = comment
                            .pid
                            .map(|pid| self.store.contains(pid))
                            .unwrap_or(false);
                        let inserted = self.store.add_comment(comment);
                        if inserted && nests {
                            // Chat mode keeps the chronological stream intact
                            // by echoing the reply at top level.
                            self.store.add_reference(comment_id);
                        }
                    }
                    RealTimeMode::Banner => {
                        if self.store.contains(comment.i) {
                            return;
                        }
                        let mut pending = self.pending.lock().expect("pending lock");
                        let bucket = pending.entry(comment.pid).or_default();
                        if !bucket.iter().any(|buffered| buffered.i == comment.i) {
                            bucket.push(comment);
                        }
                    }
                }
            }
            SocketEvent::CommentEdited {
                page_id,
                comment_id,
                text,
                text_html,
            } => {
                if self.is_current_page(page_id) {
                    self.store.apply_edit(comment_id, &text, &text_html);
                }
            }
            SocketEvent::CommentDeleted {
                page_id,
                comment_id,
            } => {
                if self.is_current_page(page_id) {
                    self.store.apply_delete(comment_id);
                }
            }
            SocketEvent::VoteUpdated {
                page_id,
                comment_id,
                upvotes,
                downvotes,
            } => {
                if self.is_current_page(page_id) {
                    self.store.apply_vote(comment_id, upvotes, downvotes);
                }
            }
            SocketEvent::PinUpdated {
                page_id,
                comment_id,
                pinned,
                pinned_at,
            } => {
                if self.is_current_page(page_id) {
                    self.store.apply_pin(comment_id, pinned, pinned_at);
                }
            }
            // Presence, typing, notifications and lifecycle events are
            // observed on the socket directly.
            _ => {}
        }
    }

    /// Consume a socket event stream until it closes.
    pub fn run(self: Arc<Self>, mut events: broadcast::Receiver<SocketEvent>) -> JoinHandle<()> {
        let reconciler = self;
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => reconciler.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "socket event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn is_current_page(&self, page_id: Uuid) -> bool {
        match self.store.page_id() {
            Some(current) => current == page_id,
            None => {
                tracing::debug!(%page_id, "event before first fetch ignored");
                false
            }
        }
    }
}

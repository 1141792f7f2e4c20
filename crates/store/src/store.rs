//! Authoritative in-memory model for one `(project, page_url)` pair.
//!
//! Mutations are optimistic: applied locally, confirmed (or rolled back) when
//! the HTTP round trip settles. Every mutation emits a full snapshot on the
//! broadcast channel. The lock is never held across an await, so socket
//! events interleave freely with in-flight writes; reconciliation is
//! id-based in both directions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use threadkit_client_common::crosstab::{CrossTabBus, VoteBroadcast};
use threadkit_client_common::storage::{load_session, load_sort, save_sort};
use threadkit_client_common::types::{
    Comment, CommentStatus, ReportReason, SortOrder, VoteDirection, now_millis,
};
use threadkit_client_common::wire::{
    CreateCommentRequest, DeleteCommentRequest, PinRequest, ReportRequest, UpdateCommentRequest,
    VoteRequest, WireComment,
};
use threadkit_client_common::{BusMessage, Error, ErrorKind, Result, TokenStorage};
use threadkit_client_http::ApiClient;
use threadkit_client_http::transport::Fetched;

use crate::reconciler::EchoSet;
use crate::tree::{CommentTree, RemoveMode, editable};

/// TTL for locally-originated ids in the echo-suppression set.
const ECHO_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Loading,
    Ready,
    Error(ErrorKind),
}

/// Immutable view handed to subscribers. `version` increments once per
/// emission.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub status: StoreStatus,
    pub comments: Vec<Comment>,
    pub total: usize,
    pub pageviews: Option<i64>,
    pub sort: SortOrder,
    pub page_id: Option<Uuid>,
    pub version: u64,
}

struct Inner {
    status: StoreStatus,
    tree: CommentTree,
    page_id: Option<Uuid>,
    pageviews: Option<i64>,
    etag: Option<String>,
    version: u64,
}

pub struct CommentStore {
    api: ApiClient,
    storage: Arc<dyn TokenStorage>,
    bus: CrossTabBus,
    page_url: String,
    echo: EchoSet,
    inner: Mutex<Inner>,
    events: broadcast::Sender<StoreSnapshot>,
}

impl CommentStore {
    pub fn new(
        api: ApiClient,
        storage: Arc<dyn TokenStorage>,
        bus: CrossTabBus,
        page_url: impl Into<String>,
    ) -> Arc<Self> {
        let sort = load_sort(storage.as_ref()).unwrap_or_default();
        let (events, _) = broadcast::channel(64);

        let store = Arc::new(Self {
            api,
            storage,
            bus,
            page_url: page_url.into(),
            echo: EchoSet::new(ECHO_TTL),
            inner: Mutex::new(Inner {
                status: StoreStatus::Loading,
                tree: CommentTree::new(sort),
                page_id: None,
                pageviews: None,
                etag: None,
                version: 0,
            }),
            events,
        });

        // Mirror vote totals broadcast by sibling tabs on this page.
        if let Some(rx) = store.bus.subscribe_votes() {
            let weak = Arc::downgrade(&store);
            tokio::spawn(async move {
                let mut rx = rx;
                while let Ok(message) = rx.recv().await {
                    let Some(store) = weak.upgrade() else { break };
                    if let BusMessage::Vote(vote) = message {
                        store.apply_remote_vote(vote);
                    }
                }
            });
        }

        store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreSnapshot> {
        self.events.subscribe()
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn page_id(&self) -> Option<Uuid> {
        self.inner.lock().expect("store lock").page_id
    }

    pub fn sort(&self) -> SortOrder {
        self.inner.lock().expect("store lock").tree.sort()
    }

    /// The suppression set shared with the reconciler.
    pub fn echo_set(&self) -> EchoSet {
        self.echo.clone()
    }

    pub fn contains(&self, comment_id: Uuid) -> bool {
        self.inner.lock().expect("store lock").tree.contains(comment_id)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock().expect("store lock");
        Self::build_snapshot(&inner)
    }

    fn build_snapshot(inner: &Inner) -> StoreSnapshot {
        StoreSnapshot {
            status: inner.status,
            comments: inner.tree.snapshot(),
            total: inner.tree.total_count(),
            pageviews: inner.pageviews,
            sort: inner.tree.sort(),
            page_id: inner.page_id,
            version: inner.version,
        }
    }

    fn emit(&self, inner: &mut Inner) {
        inner.version += 1;
        let _ = self.events.send(Self::build_snapshot(inner));
    }

    // === Fetch ===

    /// Pull the page snapshot and swap the tree atomically. Conditional when
    /// an ETag from a previous fetch is held.
    pub async fn fetch(&self) -> Result<()> {
        let (sort, etag) = {
            let mut inner = self.inner.lock().expect("store lock");
            inner.status = StoreStatus::Loading;
            self.emit(&mut inner);
            (inner.tree.sort(), inner.etag.clone())
        };

        match self
            .api
            .get_comments(&self.page_url, sort, etag.as_deref())
            .await
        {
            Ok(Fetched::Fresh { value, etag }) => {
                let page_id = value.page_id;
                let pageviews = value.pageviews;
                let roots = value.inflate(&self.page_url);

                let mut inner = self.inner.lock().expect("store lock");
                inner.tree = CommentTree::from_roots(roots, sort);
                inner.page_id = Some(page_id);
                inner.pageviews = pageviews;
                inner.etag = etag;
                inner.status = StoreStatus::Ready;
                self.emit(&mut inner);
                Ok(())
            }
            Ok(Fetched::NotModified) => {
                let mut inner = self.inner.lock().expect("store lock");
                inner.status = StoreStatus::Ready;
                self.emit(&mut inner);
                Ok(())
            }
            Err(err) => {
                let mut inner = self.inner.lock().expect("store lock");
                inner.status = StoreStatus::Error(err.kind);
                self.emit(&mut inner);
                Err(err)
            }
        }
    }

    // === Mutations ===

    /// Optimistic post: a temp node appears immediately and is swapped for
    /// the server's node on success. Exactly two snapshots are emitted on
    /// the happy path. Returns the server-assigned id.
    pub async fn post(&self, text: &str, parent_id: Option<Uuid>) -> Result<Uuid> {
        let temp_id = Uuid::now_v7();
        let now = now_millis();

        let parent_path = {
            let mut inner = self.inner.lock().expect("store lock");
            let parent_path = match parent_id {
                Some(parent) => inner
                    .tree
                    .path_of(parent)
                    .ok_or_else(|| Error::validation("unknown parent comment"))?,
                None => Vec::new(),
            };

            let (author_id, author_name, author_avatar, author_karma) =
                match load_session(self.storage.as_ref()) {
                    Some(session) => (
                        session.user.id,
                        session.user.name,
                        session.user.avatar_url,
                        session.user.karma,
                    ),
                    None => (Uuid::nil(), "Anonymous".to_string(), None, 0),
                };

            let temp = Comment {
                id: temp_id,
                page_id: inner.page_id.unwrap_or_default(),
                page_url: self.page_url.clone(),
                parent_id,
                author_id,
                author_name,
                author_avatar,
                author_karma,
                text: text.to_string(),
                text_html: String::new(),
                created_at: now,
                updated_at: now,
                pinned: false,
                pinned_at: None,
                upvotes: 0,
                downvotes: 0,
                user_vote: None,
                status: CommentStatus::Approved,
                depth: 0,
                children: Vec::new(),
                reply_reference_id: None,
            };
            inner.tree.insert(temp);
            self.emit(&mut inner);
            parent_path
        };

        let request = CreateCommentRequest {
            page_url: self.page_url.clone(),
            content: text.to_string(),
            parent_path,
        };

        match self.api.create_comment(&request).await {
            Ok(response) => {
                let server_id = response.comment.i;
                let mut inner = self.inner.lock().expect("store lock");
                inner.tree.remove(temp_id, RemoveMode::Detach);
                if inner.tree.contains(server_id) {
                    // The socket echo outran the HTTP response; that insert
                    // is authoritative and nothing is left to suppress.
                } else {
                    let page_id = inner.page_id.unwrap_or_default();
                    let comment =
                        response
                            .comment
                            .inflate(page_id, &self.page_url, 0, parent_id);
                    inner.tree.insert(comment);
                    self.echo.record(server_id);
                }
                self.emit(&mut inner);
                Ok(server_id)
            }
            Err(err) => {
                let mut inner = self.inner.lock().expect("store lock");
                inner.tree.remove(temp_id, RemoveMode::Detach);
                self.emit(&mut inner);
                Err(err)
            }
        }
    }

    /// Optimistic text replacement; reverts on failure.
    pub async fn edit(&self, comment_id: Uuid, text: &str) -> Result<()> {
        let now = now_millis();
        let (path, old_text, old_html, old_updated) = {
            let mut inner = self.inner.lock().expect("store lock");
            let node = inner
                .tree
                .find(comment_id)
                .ok_or_else(|| Error::new(ErrorKind::NotFound, "comment not found"))?;
            if !editable(node.status) {
                return Err(Error::validation("comment is deleted"));
            }
            let old = (node.text.clone(), node.text_html.clone(), node.updated_at);
            let path = inner.tree.path_of(comment_id).expect("node just found");

            inner.tree.update(comment_id, |c| {
                c.text = text.to_string();
                c.updated_at = now;
            });
            self.emit(&mut inner);
            (path, old.0, old.1, old.2)
        };

        let request = UpdateCommentRequest {
            page_url: self.page_url.clone(),
            content: text.to_string(),
            path,
        };

        match self.api.update_comment(comment_id, &request).await {
            Ok(updated) => {
                let mut inner = self.inner.lock().expect("store lock");
                inner.tree.update(comment_id, |c| {
                    c.text = updated.t;
                    c.text_html = updated.h;
                    c.updated_at = updated.m;
                });
                self.emit(&mut inner);
                Ok(())
            }
            Err(err) => {
                let mut inner = self.inner.lock().expect("store lock");
                inner.tree.update(comment_id, |c| {
                    c.text = old_text;
                    c.text_html = old_html;
                    c.updated_at = old_updated;
                });
                self.emit(&mut inner);
                Err(err)
            }
        }
    }

    /// Optimistic soft-delete; reverts on failure.
    pub async fn delete(&self, comment_id: Uuid) -> Result<()> {
        let (path, old_text, old_html, old_status, old_updated) = {
            let mut inner = self.inner.lock().expect("store lock");
            let node = inner
                .tree
                .find(comment_id)
                .ok_or_else(|| Error::new(ErrorKind::NotFound, "comment not found"))?;
            let old = (
                node.text.clone(),
                node.text_html.clone(),
                node.status,
                node.updated_at,
            );
            let path = inner.tree.path_of(comment_id).expect("node just found");

            inner.tree.remove(comment_id, RemoveMode::Soft);
            self.emit(&mut inner);
            (path, old.0, old.1, old.2, old.3)
        };

        let request = DeleteCommentRequest {
            page_url: self.page_url.clone(),
            path,
        };

        match self.api.delete_comment(comment_id, &request).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut inner = self.inner.lock().expect("store lock");
                inner.tree.update(comment_id, |c| {
                    c.text = old_text;
                    c.text_html = old_html;
                    c.status = old_status;
                    c.updated_at = old_updated;
                });
                self.emit(&mut inner);
                Err(err)
            }
        }
    }

    /// Three-way vote toggle. The local prediction is overwritten by the
    /// server's final counts, which are also mirrored to sibling tabs.
    pub async fn vote(&self, comment_id: Uuid, direction: VoteDirection) -> Result<()> {
        let (path, old_up, old_down, old_vote) = {
            let mut inner = self.inner.lock().expect("store lock");
            let node = inner
                .tree
                .find(comment_id)
                .ok_or_else(|| Error::new(ErrorKind::NotFound, "comment not found"))?;
            let old = (node.upvotes, node.downvotes, node.user_vote);
            let path = inner.tree.path_of(comment_id).expect("node just found");

            let (up_delta, down_delta, new_vote): (i64, i64, Option<VoteDirection>) =
                match (old.2, direction) {
                    (None, VoteDirection::Up) => (1, 0, Some(VoteDirection::Up)),
                    (None, VoteDirection::Down) => (0, 1, Some(VoteDirection::Down)),
                    (Some(VoteDirection::Up), VoteDirection::Up) => (-1, 0, None),
                    (Some(VoteDirection::Down), VoteDirection::Down) => (0, -1, None),
                    (Some(VoteDirection::Up), VoteDirection::Down) => {
                        (-1, 1, Some(VoteDirection::Down))
                    }
                    (Some(VoteDirection::Down), VoteDirection::Up) => {
                        (1, -1, Some(VoteDirection::Up))
                    }
                };

            inner.tree.update(comment_id, |c| {
                c.upvotes = (c.upvotes + up_delta).max(0);
                c.downvotes = (c.downvotes + down_delta).max(0);
                c.user_vote = new_vote;
            });
            self.emit(&mut inner);
            (path, old.0, old.1, old.2)
        };

        let request = VoteRequest {
            page_url: self.page_url.clone(),
            direction,
            path,
        };

        match self.api.vote_comment(comment_id, &request).await {
            Ok(result) => {
                {
                    let mut inner = self.inner.lock().expect("store lock");
                    inner.tree.update(comment_id, |c| {
                        c.upvotes = result.upvotes;
                        c.downvotes = result.downvotes;
                        c.user_vote = result.user_vote;
                    });
                    self.emit(&mut inner);
                }
                self.bus.publish_vote(VoteBroadcast {
                    comment_id,
                    vote_type: result.user_vote,
                    upvotes: result.upvotes,
                    downvotes: result.downvotes,
                });
                Ok(())
            }
            Err(err) => {
                let mut inner = self.inner.lock().expect("store lock");
                inner.tree.update(comment_id, |c| {
                    c.upvotes = old_up;
                    c.downvotes = old_down;
                    c.user_vote = old_vote;
                });
                self.emit(&mut inner);
                Err(err)
            }
        }
    }

    /// Moderator pin toggle; the root path is supplied to the server for
    /// O(depth) lookup.
    pub async fn pin(&self, comment_id: Uuid) -> Result<()> {
        let (path, old_pinned, old_pinned_at) = {
            let mut inner = self.inner.lock().expect("store lock");
            let node = inner
                .tree
                .find(comment_id)
                .ok_or_else(|| Error::new(ErrorKind::NotFound, "comment not found"))?;
            let old = (node.pinned, node.pinned_at);
            let path = inner.tree.path_of(comment_id).expect("node just found");

            let now = now_millis();
            inner.tree.update(comment_id, |c| {
                c.pinned = !c.pinned;
                c.pinned_at = c.pinned.then_some(now);
            });
            self.emit(&mut inner);
            (path, old.0, old.1)
        };

        let request = PinRequest {
            page_url: self.page_url.clone(),
            path,
        };

        match self.api.pin_comment(comment_id, &request).await {
            Ok(result) => {
                let mut inner = self.inner.lock().expect("store lock");
                inner.tree.update(comment_id, |c| {
                    c.pinned = result.pinned;
                    c.pinned_at = result.pinned_at;
                });
                self.emit(&mut inner);
                Ok(())
            }
            Err(err) => {
                let mut inner = self.inner.lock().expect("store lock");
                inner.tree.update(comment_id, |c| {
                    c.pinned = old_pinned;
                    c.pinned_at = old_pinned_at;
                });
                self.emit(&mut inner);
                Err(err)
            }
        }
    }

    /// Flag a comment for moderation. No local mutation.
    pub async fn report(
        &self,
        comment_id: Uuid,
        reason: ReportReason,
        details: Option<String>,
    ) -> Result<()> {
        let path = self
            .inner
            .lock()
            .expect("store lock")
            .tree
            .path_of(comment_id)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "comment not found"))?;

        self.api
            .report_comment(
                comment_id,
                &ReportRequest {
                    page_url: self.page_url.clone(),
                    reason,
                    details,
                    path,
                },
            )
            .await
    }

    /// Re-sort in place and persist the choice.
    pub fn set_sort(&self, sort: SortOrder) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.tree.set_sort(sort);
        save_sort(self.storage.as_ref(), sort);
        self.emit(&mut inner);
    }

    // === Socket-side appliers ===

    /// Apply an inbound addition. De-duplicated by id; returns whether the
    /// tree changed (duplicates emit nothing).
    pub fn add_comment(&self, wire: WireComment) -> bool {
        let mut inner = self.inner.lock().expect("store lock");
        if inner.tree.contains(wire.i) {
            return false;
        }
        let page_id = inner.page_id.unwrap_or_default();
        let parent = wire.pid;
        let comment = wire.inflate(page_id, &self.page_url, 0, parent);
        let inserted = inner.tree.insert(comment);
        if inserted {
            self.emit(&mut inner);
        }
        inserted
    }

    /// Chat mode: surface a threaded reply as a top-level echo pointing back
    /// at the original.
    pub fn add_reference(&self, threaded_id: Uuid) -> Option<Uuid> {
        let mut inner = self.inner.lock().expect("store lock");
        let original = inner.tree.find(threaded_id)?.clone();

        let mut reference = original;
        reference.id = Uuid::now_v7();
        reference.parent_id = None;
        reference.children = Vec::new();
        reference.depth = 0;
        reference.reply_reference_id = Some(threaded_id);
        let reference_id = reference.id;

        inner.tree.insert(reference);
        self.emit(&mut inner);
        Some(reference_id)
    }

    /// Inbound edit; deletes are terminal so late edits on deleted nodes are
    /// discarded.
    pub fn apply_edit(&self, comment_id: Uuid, text: &str, text_html: &str) {
        let mut inner = self.inner.lock().expect("store lock");
        let Some(node) = inner.tree.find(comment_id) else {
            return;
        };
        if !editable(node.status) {
            tracing::debug!(%comment_id, "edit on deleted comment discarded");
            return;
        }
        let now = now_millis();
        inner.tree.update(comment_id, |c| {
            c.text = text.to_string();
            c.text_html = text_html.to_string();
            c.updated_at = now;
        });
        self.emit(&mut inner);
    }

    /// Inbound delete: soft, children preserved.
    pub fn apply_delete(&self, comment_id: Uuid) {
        let mut inner = self.inner.lock().expect("store lock");
        if inner.tree.remove(comment_id, RemoveMode::Soft) {
            self.emit(&mut inner);
        }
    }

    /// Inbound vote totals. The viewer's own vote marker is untouched; the
    /// broadcast does not know it.
    pub fn apply_vote(&self, comment_id: Uuid, upvotes: i64, downvotes: i64) {
        let mut inner = self.inner.lock().expect("store lock");
        let found = inner.tree.update(comment_id, |c| {
            c.upvotes = upvotes.max(0);
            c.downvotes = downvotes.max(0);
        });
        if found {
            self.emit(&mut inner);
        }
    }

    /// Inbound pin state.
    pub fn apply_pin(&self, comment_id: Uuid, pinned: bool, pinned_at: Option<i64>) {
        let mut inner = self.inner.lock().expect("store lock");
        let found = inner.tree.update(comment_id, |c| {
            c.pinned = pinned;
            c.pinned_at = pinned_at;
        });
        if found {
            self.emit(&mut inner);
        }
    }

    /// Mirror of a sibling tab's vote: final counts plus this viewer's vote
    /// marker, no HTTP. Idempotent against our own broadcast.
    fn apply_remote_vote(&self, vote: VoteBroadcast) {
        let mut inner = self.inner.lock().expect("store lock");
        let Some(node) = inner.tree.find(vote.comment_id) else {
            return;
        };
        if node.upvotes == vote.upvotes
            && node.downvotes == vote.downvotes
            && node.user_vote == vote.vote_type
        {
            return;
        }
        inner.tree.update(vote.comment_id, |c| {
            c.upvotes = vote.upvotes;
            c.downvotes = vote.downvotes;
            c.user_vote = vote.vote_type;
        });
        self.emit(&mut inner);
    }
}

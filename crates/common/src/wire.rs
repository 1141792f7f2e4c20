//! Compact wire format for the comment tree.
//!
//! The server ships single-letter keys to keep snapshot payloads small; the
//! engine inflates them into canonical [`Comment`]s before anything else
//! touches them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Comment, CommentStatus, ReportReason, SortOrder, VoteDirection};

// ============================================================================
// Tree Wire Types
// ============================================================================

/// One comment as it appears on the wire. `s` is absent for approved
/// comments, `v` is absent when the viewer has not voted or is anonymous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireComment {
    pub i: Uuid,
    pub a: Uuid,
    pub n: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default)]
    pub k: i64,
    pub t: String,
    pub h: String,
    #[serde(default)]
    pub u: i64,
    #[serde(default)]
    pub d: i64,
    pub c: i64,
    pub m: i64,
    #[serde(default)]
    pub r: Vec<WireComment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<CommentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<VoteDirection>,
}

impl WireComment {
    /// Status with the absent-means-approved rule applied.
    pub fn effective_status(&self) -> CommentStatus {
        self.s.unwrap_or(CommentStatus::Approved)
    }

    /// Inflate into a canonical comment rooted at `depth`, descending into
    /// replies. `parent_id` on the wire is advisory; nesting wins.
    pub fn inflate(self, page_id: Uuid, page_url: &str, depth: u32, parent: Option<Uuid>) -> Comment {
        let status = self.effective_status();
        let id = self.i;
        Comment {
            id,
            page_id,
            page_url: page_url.to_string(),
            parent_id: parent,
            author_id: self.a,
            author_name: self.n,
            author_avatar: self.p,
            author_karma: self.k,
            text: self.t,
            text_html: self.h,
            created_at: self.c,
            updated_at: self.m,
            pinned: false,
            pinned_at: None,
            upvotes: self.u,
            downvotes: self.d,
            user_vote: self.v,
            status,
            depth,
            children: self
                .r
                .into_iter()
                .map(|reply| reply.inflate(page_id, page_url, depth + 1, Some(id)))
                .collect(),
            reply_reference_id: None,
        }
    }
}

/// Pinned marker in the snapshot response: comment id + pin time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnedEntry {
    pub i: Uuid,
    pub at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCommentsResponse {
    pub page_id: Uuid,
    pub tree: Vec<WireComment>,
    pub total: i64,
    #[serde(default)]
    pub pinned: Vec<PinnedEntry>,
    #[serde(default)]
    pub pageviews: Option<i64>,
}

impl GetCommentsResponse {
    /// Inflate the whole snapshot, applying pin markers to root comments.
    pub fn inflate(self, page_url: &str) -> Vec<Comment> {
        let page_id = self.page_id;
        let pinned = self.pinned;
        self.tree
            .into_iter()
            .map(|wire| {
                let mut root = wire.inflate(page_id, page_url, 0, None);
                if let Some(entry) = pinned.iter().find(|p| p.i == root.id) {
                    root.pinned = true;
                    root.pinned_at = Some(entry.at);
                }
                root
            })
            .collect()
    }
}

// ============================================================================
// Mutation Bodies
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommentRequest {
    pub page_url: String,
    /// Markdown source.
    pub content: String,
    /// Path from root to the parent; empty for a root comment.
    #[serde(default)]
    pub parent_path: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommentResponse {
    pub comment: WireComment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCommentRequest {
    pub page_url: String,
    pub content: String,
    /// Path from root to the target, ending with the target id.
    pub path: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCommentRequest {
    pub page_url: String,
    pub path: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub page_url: String,
    pub direction: VoteDirection,
    pub path: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub upvotes: i64,
    pub downvotes: i64,
    pub user_vote: Option<VoteDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinRequest {
    pub page_url: String,
    pub path: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinResponse {
    pub pinned: bool,
    #[serde(default)]
    pub pinned_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub page_url: String,
    pub reason: ReportReason,
    #[serde(default)]
    pub details: Option<String>,
    pub path: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_json() -> serde_json::Value {
        serde_json::json!({
            "page_id": "018f0000-0000-7000-8000-000000000001",
            "tree": [{
                "i": "018f0000-0000-7000-8000-0000000000aa",
                "a": "018f0000-0000-7000-8000-0000000000ab",
                "n": "alice",
                "k": 12,
                "t": "root",
                "h": "<p>root</p>",
                "u": 2,
                "d": 1,
                "c": 1000,
                "m": 1000,
                "r": [{
                    "i": "018f0000-0000-7000-8000-0000000000bb",
                    "a": "018f0000-0000-7000-8000-0000000000ab",
                    "n": "alice",
                    "t": "reply",
                    "h": "<p>reply</p>",
                    "c": 2000,
                    "m": 2500,
                    "s": "pending",
                    "v": "up"
                }]
            }],
            "total": 2,
            "pinned": [{"i": "018f0000-0000-7000-8000-0000000000aa", "at": 3000}],
            "pageviews": 41
        })
    }

    #[test]
    fn test_inflate_snapshot() {
        let resp: GetCommentsResponse = serde_json::from_value(wire_json()).unwrap();
        let comments = resp.inflate("/a");
        assert_eq!(comments.len(), 1);

        let root = &comments[0];
        assert_eq!(root.depth, 0);
        assert_eq!(root.parent_id, None);
        assert_eq!(root.author_karma, 12);
        assert!(root.pinned);
        assert_eq!(root.pinned_at, Some(3000));
        assert_eq!(root.status, CommentStatus::Approved);

        let reply = &root.children[0];
        assert_eq!(reply.depth, 1);
        assert_eq!(reply.parent_id, Some(root.id));
        assert_eq!(reply.status, CommentStatus::Pending);
        assert_eq!(reply.user_vote, Some(VoteDirection::Up));
        assert!(reply.edited());
        assert_eq!(reply.page_url, "/a");
    }

    #[test]
    fn test_absent_status_is_approved() {
        let wire: WireComment = serde_json::from_value(serde_json::json!({
            "i": "018f0000-0000-7000-8000-0000000000cc",
            "a": "018f0000-0000-7000-8000-0000000000ab",
            "n": "bob",
            "t": "x",
            "h": "<p>x</p>",
            "c": 1,
            "m": 1
        }))
        .unwrap();
        assert_eq!(wire.effective_status(), CommentStatus::Approved);
        assert!(wire.r.is_empty());
    }
}

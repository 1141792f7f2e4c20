use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel text a soft-deleted comment carries in place of its source.
pub const DELETED_TEXT: &str = "[deleted]";

/// Current wall-clock time as a millisecond epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// User Types
// ============================================================================

/// The viewer's identity as held by the auth state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub social_links: HashMap<String, String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    /// False until the account has chosen a handle; gates the
    /// username-required auth state.
    pub username_set: bool,
    #[serde(default)]
    pub karma: i64,
}

/// Public author snapshot carried by presence and notification events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPublic {
    pub id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub karma: i64,
}

/// A bearer session. Tokens are opaque strings; the engine never inspects
/// them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub token: String,
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

// ============================================================================
// Auth Method Types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethodKind {
    Otp,
    Oauth,
    Web3,
    Anonymous,
}

/// One login method the site has enabled, as returned by `GET /auth/methods`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthMethod {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AuthMethodKind,
}

// ============================================================================
// Comment Types
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    #[default]
    Approved,
    Pending,
    Rejected,
    Deleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

/// A fully inflated comment node. `children` are owned; a child appears in
/// exactly one parent's list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: Uuid,
    pub page_id: Uuid,
    pub page_url: String,
    pub parent_id: Option<Uuid>,
    pub author_id: Uuid,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub author_karma: i64,
    pub text: String,
    pub text_html: String,
    /// Millisecond epochs.
    pub created_at: i64,
    pub updated_at: i64,
    pub pinned: bool,
    pub pinned_at: Option<i64>,
    pub upvotes: i64,
    pub downvotes: i64,
    pub user_vote: Option<VoteDirection>,
    pub status: CommentStatus,
    /// Nesting level from root (root = 0); maintained by the tree.
    pub depth: u32,
    pub children: Vec<Comment>,
    /// Chat mode surfaces a reply both inside its thread and as a top-level
    /// echo; the echo points back at the threaded copy.
    pub reply_reference_id: Option<Uuid>,
}

impl Comment {
    pub fn edited(&self) -> bool {
        self.updated_at > self.created_at
    }

    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }

    /// `min(up, down) * (up + down)`: higher means more contested.
    pub fn controversy(&self) -> i64 {
        self.upvotes.min(self.downvotes) * (self.upvotes + self.downvotes)
    }

    /// Soft-delete in place: sentinel text, children preserved.
    pub fn mark_deleted(&mut self) {
        self.status = CommentStatus::Deleted;
        self.text = DELETED_TEXT.to_string();
        self.text_html = String::new();
        self.updated_at = now_millis();
    }
}

// ============================================================================
// Sort Orders
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    New,
    Old,
    Top,
    Controversial,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::New => "new",
            SortOrder::Old => "old",
            SortOrder::Top => "top",
            SortOrder::Controversial => "controversial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(SortOrder::New),
            "old" => Some(SortOrder::Old),
            "top" => Some(SortOrder::Top),
            "controversial" => Some(SortOrder::Controversial),
            _ => None,
        }
    }
}

// ============================================================================
// Presence / Typing Types
// ============================================================================

/// Ephemeral typing indicator entry, pruned by a clock sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct TypingUser {
    pub user_id: Uuid,
    pub user_name: String,
    pub reply_to: Option<Uuid>,
    /// Millisecond epoch after which the entry is expired.
    pub expires_at: i64,
}

// ============================================================================
// Report Types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
    Spam,
    Harassment,
    HateSpeech,
    Misinformation,
    Other,
}

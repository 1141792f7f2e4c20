//! Typed API surface over [`Transport`].
//!
//! Paths and body shapes mirror the server's route tables; the comment wire
//! bodies live in `threadkit-client-common::wire` because the store inflates
//! them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use threadkit_client_common::types::{AuthMethod, AuthUser, SortOrder};
use threadkit_client_common::wire::{
    CreateCommentRequest, CreateCommentResponse, DeleteCommentRequest, GetCommentsResponse,
    PinRequest, PinResponse, ReportRequest, UpdateCommentRequest, VoteRequest, VoteResponse,
    WireComment,
};
use threadkit_client_common::Result;

use crate::transport::{Fetched, Transport};

// ============================================================================
// Auth Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AuthMethodsResponse {
    pub methods: Vec<AuthMethod>,
}

/// Where a one-time code goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpTarget {
    Email(String),
    Phone(String),
}

impl OtpTarget {
    fn split(&self) -> (Option<String>, Option<String>) {
        match self {
            OtpTarget::Email(email) => (Some(email.clone()), None),
            OtpTarget::Phone(phone) => (None, Some(phone.clone())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SendOtpRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub code: String,
    /// Username; required for new accounts.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

#[derive(Debug, Serialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
    /// The full message the wallet must sign.
    pub message: String,
    pub issued_at: String,
    pub expiration_time: String,
}

#[derive(Debug, Serialize)]
pub struct Web3VerifyRequest {
    pub address: String,
    pub message: String,
    pub signature: String,
}

// ============================================================================
// User Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: AuthUser,
    #[serde(default)]
    pub unread_notifications: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct UpdateMeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_links: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct CheckUsernameRequest {
    username: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckUsernameResponse {
    pub available: bool,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct ApiClient {
    transport: Transport,
}

impl ApiClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    // === Comments ===

    /// Fetch the page snapshot, conditionally when an ETag is known.
    pub async fn get_comments(
        &self,
        page_url: &str,
        sort: SortOrder,
        etag: Option<&str>,
    ) -> Result<Fetched<GetCommentsResponse>> {
        let query = [
            ("page_url", page_url.to_string()),
            ("sort", sort.as_str().to_string()),
        ];
        self.transport
            .get_conditional("/comments", &query, etag)
            .await
    }

    pub async fn create_comment(&self, req: &CreateCommentRequest) -> Result<CreateCommentResponse> {
        self.transport.post("/comments", req).await
    }

    pub async fn update_comment(
        &self,
        comment_id: Uuid,
        req: &UpdateCommentRequest,
    ) -> Result<WireComment> {
        self.transport
            .put(&format!("/comments/{comment_id}"), req)
            .await
    }

    pub async fn delete_comment(&self, comment_id: Uuid, req: &DeleteCommentRequest) -> Result<()> {
        self.transport
            .delete(&format!("/comments/{comment_id}"), req)
            .await
    }

    pub async fn vote_comment(&self, comment_id: Uuid, req: &VoteRequest) -> Result<VoteResponse> {
        self.transport
            .post(&format!("/comments/{comment_id}/vote"), req)
            .await
    }

    pub async fn pin_comment(&self, comment_id: Uuid, req: &PinRequest) -> Result<PinResponse> {
        self.transport
            .post(&format!("/comments/{comment_id}/pin"), req)
            .await
    }

    pub async fn report_comment(&self, comment_id: Uuid, req: &ReportRequest) -> Result<()> {
        self.transport
            .post_no_content(&format!("/comments/{comment_id}/report"), req)
            .await
    }

    // === Auth ===

    pub async fn auth_methods(&self) -> Result<Vec<AuthMethod>> {
        let response: AuthMethodsResponse = self.transport.get("/auth/methods", &[]).await?;
        Ok(response.methods)
    }

    pub async fn send_otp(&self, target: &OtpTarget) -> Result<()> {
        let (email, phone) = target.split();
        self.transport
            .post_no_content("/auth/send-otp", &SendOtpRequest { email, phone })
            .await
    }

    pub async fn verify_otp(
        &self,
        target: &OtpTarget,
        code: &str,
        name: Option<&str>,
    ) -> Result<AuthResponse> {
        let (email, phone) = target.split();
        self.transport
            .post(
                "/auth/verify-otp",
                &VerifyOtpRequest {
                    email,
                    phone,
                    code: code.to_string(),
                    name: name.map(|n| n.to_string()),
                },
            )
            .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse> {
        self.transport
            .post(
                "/auth/refresh",
                &RefreshRequest {
                    refresh_token: refresh_token.to_string(),
                },
            )
            .await
    }

    pub async fn logout(&self) -> Result<()> {
        self.transport
            .post_no_content("/auth/logout", &serde_json::json!({}))
            .await
    }

    pub async fn ethereum_nonce(&self, address: &str) -> Result<NonceResponse> {
        self.transport
            .get("/auth/ethereum/nonce", &[("address", address.to_string())])
            .await
    }

    pub async fn ethereum_verify(&self, req: &Web3VerifyRequest) -> Result<AuthResponse> {
        self.transport.post("/auth/ethereum/verify", req).await
    }

    // === Users ===

    pub async fn me(&self) -> Result<MeResponse> {
        self.transport.get("/users/me", &[]).await
    }

    pub async fn update_me(&self, req: &UpdateMeRequest) -> Result<MeResponse> {
        self.transport.put("/users/me", req).await
    }

    pub async fn check_username(&self, username: &str) -> Result<CheckUsernameResponse> {
        self.transport
            .post(
                "/users/check-username",
                &CheckUsernameRequest {
                    username: username.to_string(),
                },
            )
            .await
    }
}

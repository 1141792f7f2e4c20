//! In-process HTTP API mock for driving the store.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use uuid::Uuid;

use threadkit_client_common::ClientConfig;

#[derive(Default)]
struct VoteState {
    upvotes: i64,
    downvotes: i64,
    user_vote: Option<String>,
}

#[derive(Clone)]
struct ApiState {
    page_id: Uuid,
    tree: Arc<Mutex<serde_json::Value>>,
    votes: Arc<Mutex<HashMap<Uuid, VoteState>>>,
    pins: Arc<Mutex<HashMap<Uuid, bool>>>,
    vote_requests: Arc<AtomicUsize>,
}

pub struct MockApi {
    pub addr: SocketAddr,
    pub page_id: Uuid,
    pub vote_requests: Arc<AtomicUsize>,
    tree: Arc<Mutex<serde_json::Value>>,
}

impl MockApi {
    pub async fn spawn() -> Self {
        let page_id = Uuid::now_v7();
        let tree = Arc::new(Mutex::new(serde_json::json!([])));
        let vote_requests = Arc::new(AtomicUsize::new(0));

        let state = ApiState {
            page_id,
            tree: tree.clone(),
            votes: Arc::new(Mutex::new(HashMap::new())),
            pins: Arc::new(Mutex::new(HashMap::new())),
            vote_requests: vote_requests.clone(),
        };

        let app = Router::new()
            .route("/comments", get(get_comments).post(create_comment))
            .route("/comments/{id}", put(update_comment).delete(delete_comment))
            .route("/comments/{id}/vote", post(vote_comment))
            .route("/comments/{id}/pin", post(pin_comment))
            .route("/comments/{id}/report", post(report_comment))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            page_id,
            vote_requests,
            tree,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new("tk_pub_test").with_api_url(format!("http://{}", self.addr))
    }

    /// Replace the snapshot tree served by `GET /comments`.
    pub fn set_tree(&self, tree: serde_json::Value) {
        *self.tree.lock().unwrap() = tree;
    }

    /// Typed wire comment for injecting socket events.
    pub fn typed_wire_comment(
        id: Uuid,
        text: &str,
        created_at: i64,
    ) -> threadkit_client_common::wire::WireComment {
        serde_json::from_value(Self::wire_comment(id, text, created_at)).unwrap()
    }

    /// Compact wire comment for snapshots and socket events.
    pub fn wire_comment(id: Uuid, text: &str, created_at: i64) -> serde_json::Value {
        serde_json::json!({
            "i": id,
            "a": Uuid::nil(),
            "n": "alice",
            "t": text,
            "h": format!("<p>{text}</p>"),
            "u": 0,
            "d": 0,
            "c": created_at,
            "m": created_at
        })
    }
}

async fn get_comments(State(state): State<ApiState>) -> axum::Json<serde_json::Value> {
    let tree = state.tree.lock().unwrap().clone();
    let total = tree.as_array().map(|a| a.len()).unwrap_or(0);
    axum::Json(serde_json::json!({
        "page_id": state.page_id,
        "tree": tree,
        "total": total,
        "pinned": [],
        "pageviews": 7
    }))
}

async fn create_comment(
    State(_state): State<ApiState>,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> (StatusCode, axum::Json<serde_json::Value>) {
    let content = body["content"].as_str().unwrap_or_default().to_string();
    if content == "reject me" {
        return (
            StatusCode::FORBIDDEN,
            axum::Json(serde_json::json!({ "error": "Posting is disabled", "code": "FORBIDDEN" })),
        );
    }

    // Tests that need a predetermined id pass `id=<uuid>` as the content.
    let id = content
        .strip_prefix("id=")
        .and_then(|raw| raw.parse::<Uuid>().ok())
        .unwrap_or_else(Uuid::now_v7);

    let mut comment = MockApi::wire_comment(id, &content, now_ms());
    if let Some(parent) = body["parent_path"].as_array().and_then(|p| p.last()) {
        comment["pid"] = parent.clone();
    }
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "comment": comment })),
    )
}

async fn update_comment(
    State(_state): State<ApiState>,
    Path(id): Path<Uuid>,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> axum::Json<serde_json::Value> {
    let content = body["content"].as_str().unwrap_or_default();
    let mut comment = MockApi::wire_comment(id, content, now_ms());
    comment["m"] = serde_json::json!(now_ms() + 1);
    axum::Json(comment)
}

async fn delete_comment(Path(_id): Path<Uuid>) -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn vote_comment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> axum::Json<serde_json::Value> {
    state.vote_requests.fetch_add(1, Ordering::SeqCst);
    let direction = body["direction"].as_str().unwrap_or_default().to_string();

    let mut votes = state.votes.lock().unwrap();
    let entry = votes.entry(id).or_default();

    match (entry.user_vote.as_deref(), direction.as_str()) {
        (None, "up") => {
            entry.upvotes += 1;
            entry.user_vote = Some("up".into());
        }
        (None, "down") => {
            entry.downvotes += 1;
            entry.user_vote = Some("down".into());
        }
        (Some("up"), "up") => {
            entry.upvotes -= 1;
            entry.user_vote = None;
        }
        (Some("down"), "down") => {
            entry.downvotes -= 1;
            entry.user_vote = None;
        }
        (Some("up"), "down") => {
            entry.upvotes -= 1;
            entry.downvotes += 1;
            entry.user_vote = Some("down".into());
        }
        (Some("down"), "up") => {
            entry.downvotes -= 1;
            entry.upvotes += 1;
            entry.user_vote = Some("up".into());
        }
        _ => {}
    }

    axum::Json(serde_json::json!({
        "upvotes": entry.upvotes.max(0),
        "downvotes": entry.downvotes.max(0),
        "user_vote": entry.user_vote
    }))
}

async fn pin_comment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> axum::Json<serde_json::Value> {
    let mut pins = state.pins.lock().unwrap();
    let pinned = !pins.get(&id).copied().unwrap_or(false);
    pins.insert(id, pinned);
    axum::Json(serde_json::json!({
        "pinned": pinned,
        "pinned_at": pinned.then(now_ms)
    }))
}

async fn report_comment(Path(_id): Path<Uuid>) -> StatusCode {
    StatusCode::NO_CONTENT
}

fn now_ms() -> i64 {
    threadkit_client_common::types::now_millis()
}

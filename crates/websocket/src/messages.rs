//! JSON-RPC 2.0 message types for WebSocket communication.
//!
//! All messages use JSON-RPC 2.0 notification format (no `id` field, no
//! response correlation): outbound frames are built here, inbound frames are
//! parsed into typed [`ServerEvent`]s.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use threadkit_client_common::types::UserPublic;
use threadkit_client_common::wire::WireComment;

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// JSON-RPC 2.0 notification frame sent to the server.
#[derive(Debug, Clone, Serialize)]
pub struct ClientFrame {
    jsonrpc: &'static str,
    method: &'static str,
    params: serde_json::Value,
}

impl ClientFrame {
    fn new(method: &'static str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Subscribe to a page's real-time events.
    pub fn subscribe(page_id: Uuid) -> Self {
        Self::new("subscribe", serde_json::json!({ "page_id": page_id }))
    }

    /// Unsubscribe from a page.
    pub fn unsubscribe(page_id: Uuid) -> Self {
        Self::new("unsubscribe", serde_json::json!({ "page_id": page_id }))
    }

    /// Typing indicator (sent every ~1s while typing, debounced client-side).
    pub fn typing(page_id: Uuid, reply_to: Option<Uuid>) -> Self {
        Self::new(
            "typing",
            serde_json::json!({ "page_id": page_id, "reply_to": reply_to }),
        )
    }

    /// Heartbeat.
    pub fn ping() -> Self {
        Self::new("ping", serde_json::json!({}))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// Raw JSON-RPC frame from the server.
#[derive(Debug, Deserialize)]
pub struct RpcFrame {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Parsed server notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected {
        user_id: Option<Uuid>,
    },
    Presence {
        page_id: Uuid,
        users: Vec<UserPublic>,
    },
    UserJoined {
        page_id: Uuid,
        user: UserPublic,
    },
    UserLeft {
        page_id: Uuid,
        user_id: Uuid,
    },
    Typing {
        page_id: Uuid,
        user: UserPublic,
        reply_to: Option<Uuid>,
    },
    CommentAdded {
        page_id: Uuid,
        comment: WireComment,
    },
    CommentEdited {
        page_id: Uuid,
        comment_id: Uuid,
        text: String,
        text_html: String,
    },
    CommentDeleted {
        page_id: Uuid,
        comment_id: Uuid,
    },
    VoteUpdated {
        page_id: Uuid,
        comment_id: Uuid,
        upvotes: i64,
        downvotes: i64,
    },
    PinUpdated {
        page_id: Uuid,
        comment_id: Uuid,
        pinned: bool,
        pinned_at: Option<i64>,
    },
    Notification {
        payload: serde_json::Value,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    /// Parse a JSON-RPC frame into a typed event.
    pub fn from_rpc(frame: RpcFrame) -> Result<Self, &'static str> {
        if frame.jsonrpc != "2.0" {
            return Err("Invalid JSON-RPC version");
        }

        fn params<T: serde::de::DeserializeOwned>(
            value: serde_json::Value,
        ) -> Result<T, &'static str> {
            serde_json::from_value(value).map_err(|_| "Invalid params")
        }

        match frame.method.as_str() {
            "connected" => {
                #[derive(Deserialize)]
                struct Params {
                    user_id: Option<Uuid>,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::Connected { user_id: p.user_id })
            }
            "presence" => {
                #[derive(Deserialize)]
                struct Params {
                    page_id: Uuid,
                    users: Vec<UserPublic>,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::Presence {
                    page_id: p.page_id,
                    users: p.users,
                })
            }
            "user_joined" => {
                #[derive(Deserialize)]
                struct Params {
                    page_id: Uuid,
                    user: UserPublic,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::UserJoined {
                    page_id: p.page_id,
                    user: p.user,
                })
            }
            "user_left" => {
                #[derive(Deserialize)]
                struct Params {
                    page_id: Uuid,
                    user_id: Uuid,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::UserLeft {
                    page_id: p.page_id,
                    user_id: p.user_id,
                })
            }
            "typing" => {
                #[derive(Deserialize)]
                struct Params {
                    page_id: Uuid,
                    user: UserPublic,
                    #[serde(default)]
                    reply_to: Option<Uuid>,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::Typing {
                    page_id: p.page_id,
                    user: p.user,
                    reply_to: p.reply_to,
                })
            }
            "new_comment" => {
                #[derive(Deserialize)]
                struct Params {
                    page_id: Uuid,
                    comment: WireComment,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::CommentAdded {
                    page_id: p.page_id,
                    comment: p.comment,
                })
            }
            "edit_comment" => {
                #[derive(Deserialize)]
                struct Params {
                    page_id: Uuid,
                    comment_id: Uuid,
                    content: String,
                    content_html: String,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::CommentEdited {
                    page_id: p.page_id,
                    comment_id: p.comment_id,
                    text: p.content,
                    text_html: p.content_html,
                })
            }
            "delete_comment" => {
                #[derive(Deserialize)]
                struct Params {
                    page_id: Uuid,
                    comment_id: Uuid,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::CommentDeleted {
                    page_id: p.page_id,
                    comment_id: p.comment_id,
                })
            }
            "vote_update" => {
                #[derive(Deserialize)]
                struct Params {
                    page_id: Uuid,
                    comment_id: Uuid,
                    upvotes: i64,
                    downvotes: i64,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::VoteUpdated {
                    page_id: p.page_id,
                    comment_id: p.comment_id,
                    upvotes: p.upvotes,
                    downvotes: p.downvotes,
                })
            }
            "pin_update" => {
                #[derive(Deserialize)]
                struct Params {
                    page_id: Uuid,
                    comment_id: Uuid,
                    pinned: bool,
                    #[serde(default)]
                    pinned_at: Option<i64>,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::PinUpdated {
                    page_id: p.page_id,
                    comment_id: p.comment_id,
                    pinned: p.pinned,
                    pinned_at: p.pinned_at,
                })
            }
            "notification" => Ok(ServerEvent::Notification {
                payload: frame.params,
            }),
            "pong" => Ok(ServerEvent::Pong),
            "error" => {
                #[derive(Deserialize)]
                struct Params {
                    code: String,
                    message: String,
                }
                let p: Params = params(frame.params)?;
                Ok(ServerEvent::Error {
                    code: p.code,
                    message: p.message,
                })
            }
            _ => Err("Unknown method"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_json() {
        let page_id: Uuid = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        let json = ClientFrame::subscribe(page_id).to_json().unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"subscribe\""));
        assert!(json.contains("550e8400-e29b-41d4-a716-446655440000"));
    }

    #[test]
    fn test_typing_frame_carries_reply_to() {
        let page_id = Uuid::now_v7();
        let reply_to = Uuid::now_v7();
        let json = ClientFrame::typing(page_id, Some(reply_to)).to_json().unwrap();
        assert!(json.contains(&reply_to.to_string()));
    }

    #[test]
    fn test_parse_new_comment() {
        let frame: RpcFrame = serde_json::from_str(
            r#"{
                "jsonrpc": "2.0",
                "method": "new_comment",
                "params": {
                    "page_id": "550e8400-e29b-41d4-a716-446655440000",
                    "comment": {
                        "i": "660e8400-e29b-41d4-a716-446655440001",
                        "a": "770e8400-e29b-41d4-a716-446655440002",
                        "n": "alice",
                        "t": "hi",
                        "h": "<p>hi</p>",
                        "c": 1000,
                        "m": 1000
                    }
                }
            }"#,
        )
        .unwrap();

        match ServerEvent::from_rpc(frame).unwrap() {
            ServerEvent::CommentAdded { page_id, comment } => {
                assert_eq!(page_id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
                assert_eq!(comment.n, "alice");
            }
            other => panic!("expected CommentAdded, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_edit_uses_wire_field_names() {
        let frame: RpcFrame = serde_json::from_str(
            r#"{
                "jsonrpc": "2.0",
                "method": "edit_comment",
                "params": {
                    "page_id": "550e8400-e29b-41d4-a716-446655440000",
                    "comment_id": "660e8400-e29b-41d4-a716-446655440001",
                    "content": "edited",
                    "content_html": "<p>edited</p>"
                }
            }"#,
        )
        .unwrap();

        match ServerEvent::from_rpc(frame).unwrap() {
            ServerEvent::CommentEdited { text, text_html, .. } => {
                assert_eq!(text, "edited");
                assert_eq!(text_html, "<p>edited</p>");
            }
            other => panic!("expected CommentEdited, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_wrong_version() {
        let frame = RpcFrame {
            jsonrpc: "1.0".to_string(),
            method: "pong".to_string(),
            params: serde_json::Value::Null,
        };
        assert!(ServerEvent::from_rpc(frame).is_err());
    }

    #[test]
    fn test_rejects_unknown_method() {
        let frame = RpcFrame {
            jsonrpc: "2.0".to_string(),
            method: "mystery".to_string(),
            params: serde_json::Value::Null,
        };
        assert_eq!(ServerEvent::from_rpc(frame), Err("Unknown method"));
    }

    #[test]
    fn test_parse_error_event() {
        let frame: RpcFrame = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"error","params":{"code":"rate_limit","message":"Too many messages"}}"#,
        )
        .unwrap();
        match ServerEvent::from_rpc(frame).unwrap() {
            ServerEvent::Error { code, .. } => assert_eq!(code, "rate_limit"),
            other => panic!("expected Error, got {other:?}"),
        }
    }
}

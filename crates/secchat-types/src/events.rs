use serde::{Deserialize, Serialize};

use crate::models::User;

/// Inbound WebSocket frame. Which fields are meaningful depends on `kind`;
/// `payload` is only read for `auth`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
}

/// Payload of an `auth` frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub password_hash: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Server-authored control frames. Chat broadcasts are sent as a bare
/// [`crate::models::Message`] instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    AuthSuccess { user_id: String, message: String },

    Error { message: String },

    /// Current presence list
    Users { users: Vec<User> },

    Typing { user_id: String, user_name: String },

    Recall {
        id: String,
        user_id: String,
        user_name: String,
        timestamp: i64,
    },

    Read {
        message_id: String,
        user_id: String,
        timestamp: i64,
    },

    Pong { version: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

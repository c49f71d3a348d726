use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::now_millis;

/// Sender id reserved for server-authored messages.
pub const SYSTEM_SENDER_ID: &str = "system";
pub const SYSTEM_SENDER_NAME: &str = "System";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    System,
    Recall,
    Read,
    Typing,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::System => "system",
            Self::Recall => "recall",
            Self::Read => "read",
            Self::Typing => "typing",
        }
    }

    /// Recall, read and typing are transient signals and never get their own row.
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Text | Self::Image | Self::System)
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "system" => Ok(Self::System),
            "recall" => Ok(Self::Recall),
            "read" => Ok(Self::Read),
            "typing" => Ok(Self::Typing),
            other => Err(format!("unknown message type: {}", other)),
        }
    }
}

/// A chat user. `online` is always recomputed from the live hub and is
/// meaningless when read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: i64,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: String::new(),
            online: true,
            last_seen: now_millis(),
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = avatar.into();
        self
    }

    /// Refresh `last_seen`; called on every save.
    pub fn touch(&mut self) {
        self.last_seen = now_millis();
    }
}

/// A persisted chat message. `content` is opaque and may be ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub from: String,
    pub from_name: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub recalled: bool,
}

impl Message {
    pub fn new(
        kind: MessageType,
        from: impl Into<String>,
        from_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_message_id(),
            kind,
            from: from.into(),
            from_name: from_name.into(),
            content: content.into(),
            timestamp: now_millis(),
            reply_to: None,
            mentions: Vec::new(),
            recalled: false,
        }
    }

    /// Server-authored notice such as join/leave.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageType::System, SYSTEM_SENDER_ID, SYSTEM_SENDER_NAME, content)
    }

    pub fn joined(user_name: &str) -> Self {
        Self::system(format!("{} joined the chat", user_name))
    }

    pub fn left(user_name: &str) -> Self {
        Self::system(format!("{} left the chat", user_name))
    }
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Database row types. These map directly to SQLite rows.
/// Distinct from secchat-types models to keep the DB layer independent.
use anyhow::{Result, anyhow};

use secchat_types::models::{Message, User};

pub struct MessageRow {
    pub id: String,
    pub kind: String,
    pub from_id: String,
    pub from_name: String,
    pub content: String,
    pub timestamp: i64,
    pub reply_to: Option<String>,
    pub mentions: Option<String>,
    pub recalled: bool,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let kind = self
            .kind
            .parse()
            .map_err(|e: String| anyhow!("message {}: {}", self.id, e))?;

        let mentions = match self.mentions.as_deref() {
            None | Some("") | Some("null") => Vec::new(),
            Some(raw) => serde_json::from_str(raw)?,
        };

        Ok(Message {
            id: self.id,
            kind,
            from: self.from_id,
            from_name: self.from_name,
            content: self.content,
            timestamp: self.timestamp,
            reply_to: self.reply_to.filter(|r| !r.is_empty()),
            mentions,
            recalled: self.recalled,
        })
    }
}

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub last_seen: Option<i64>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            avatar: row.avatar.unwrap_or_default(),
            // never trusted from storage
            online: false,
            last_seen: row.last_seen.unwrap_or_default(),
        }
    }
}

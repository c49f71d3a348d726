use anyhow::{Result, ensure};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use secchat_types::models::{Message, User};

use crate::models::{MessageRow, UserRow};
use crate::{Database, MessageStore};

impl MessageStore for Database {
    // -- Messages --

    fn save_message(&self, msg: &Message) -> Result<()> {
        ensure!(
            msg.kind.is_persisted(),
            "{} messages are transient and never stored",
            msg.kind.as_str()
        );
        let mentions = serde_json::to_string(&msg.mentions)?;

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, type, from_id, from_name, content, timestamp, reply_to, mentions, recalled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    msg.id,
                    msg.kind.as_str(),
                    msg.from,
                    msg.from_name,
                    msg.content,
                    msg.timestamp,
                    msg.reply_to,
                    mentions,
                    msg.recalled,
                ],
            )?;
            Ok(())
        })
    }

    fn get_messages(&self, before_ms: i64, limit: u32) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| query_messages_before(conn, before_ms, limit))?;

        // Newest-first from the query; callers want chronological order.
        let mut messages: Vec<Message> = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                row.into_message()
                    .map_err(|e| warn!("Skipping corrupt message row '{}': {}", id, e))
                    .ok()
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    fn recall_message(&self, id: &str) -> Result<()> {
        let changed = self.with_conn_mut(|conn| {
            Ok(conn.execute("UPDATE messages SET recalled = 1 WHERE id = ?1", [id])?)
        })?;
        if changed == 0 {
            debug!("Recall of unknown message '{}' ignored", id);
        }
        Ok(())
    }

    // -- Users --

    fn save_user(&self, user: &User) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, avatar, last_seen) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    avatar = excluded.avatar,
                    last_seen = excluded.last_seen",
                rusqlite::params![user.id, user.name, user.avatar, user.last_seen],
            )?;
            Ok(())
        })
    }

    fn get_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, avatar, last_seen FROM users ORDER BY id")?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(User::from).collect())
        })
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, avatar, last_seen FROM users WHERE id = ?1",
                    [id],
                    map_user_row,
                )
                .optional()?;
            Ok(row.map(User::from))
        })
    }
}

fn query_messages_before(conn: &Connection, before_ms: i64, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, type, from_id, from_name, content, timestamp, reply_to, mentions, recalled
         FROM messages
         WHERE timestamp < ?1
         ORDER BY timestamp DESC, rowid DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![before_ms, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                kind: row.get(1)?,
                from_id: row.get(2)?,
                from_name: row.get(3)?,
                content: row.get(4)?,
                timestamp: row.get(5)?,
                reply_to: row.get(6)?,
                mentions: row.get(7)?,
                recalled: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        avatar: row.get(2)?,
        last_seen: row.get(3)?,
    })
}

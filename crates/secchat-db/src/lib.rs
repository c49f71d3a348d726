pub mod handle;
pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use secchat_types::models::{Message, User};

pub use handle::StoreHandle;

/// Persistence contract the relay core relies on. Implementations must
/// serialize concurrent writers themselves.
pub trait MessageStore: Send + Sync {
    fn save_message(&self, msg: &Message) -> Result<()>;

    /// Messages strictly older than `before_ms`, at most `limit`, in
    /// ascending timestamp order.
    fn get_messages(&self, before_ms: i64, limit: u32) -> Result<Vec<Message>>;

    /// Mark a message recalled. Idempotent; an unknown id is not an error.
    fn recall_message(&self, id: &str) -> Result<()>;

    /// Upsert by user id.
    fn save_user(&self, user: &User) -> Result<()>;

    fn get_users(&self) -> Result<Vec<User>>;

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.get_users()?.into_iter().find(|u| u.id == id))
    }
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}

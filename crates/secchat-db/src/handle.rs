use std::sync::Arc;

use anyhow::Result;

use secchat_types::models::{Message, User};

use crate::MessageStore;

/// Cloneable async front for a [`MessageStore`]. Every call runs on the
/// blocking pool so SQLite never stalls the async runtime.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn MessageStore>,
}

impl StoreHandle {
    pub fn new(store: impl MessageStore + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub fn from_arc(store: Arc<dyn MessageStore>) -> Self {
        Self { inner: store }
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MessageStore) -> Result<T> + Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    pub async fn save_message(&self, msg: Message) -> Result<()> {
        self.run(move |s| s.save_message(&msg)).await
    }

    pub async fn get_messages(&self, before_ms: i64, limit: u32) -> Result<Vec<Message>> {
        self.run(move |s| s.get_messages(before_ms, limit)).await
    }

    pub async fn recall_message(&self, id: String) -> Result<()> {
        self.run(move |s| s.recall_message(&id)).await
    }

    pub async fn save_user(&self, user: User) -> Result<()> {
        self.run(move |s| s.save_user(&user)).await
    }

    pub async fn get_users(&self) -> Result<Vec<User>> {
        self.run(|s| s.get_users()).await
    }

    pub async fn get_user(&self, id: String) -> Result<Option<User>> {
        self.run(move |s| s.get_user(&id)).await
    }
}

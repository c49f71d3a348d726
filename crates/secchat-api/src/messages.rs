use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use tracing::error;

use secchat_types::api::MessagesResponse;
use secchat_types::now_millis;

use crate::AppState;
use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Raw query values. Both are parsed leniently: anything unusable falls back
/// to the default instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    pub before: Option<String>,
    pub limit: Option<String>,
}

impl MessageQuery {
    /// Cursor in epoch ms, defaulting to `now`.
    fn before(&self, now: i64) -> i64 {
        self.before
            .as_deref()
            .and_then(|b| b.trim().parse().ok())
            .unwrap_or(now)
    }

    fn limit(&self) -> u32 {
        self.limit
            .as_deref()
            .and_then(|l| l.trim().parse::<u32>().ok())
            .filter(|l| (1..=MAX_PAGE_SIZE).contains(l))
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

/// GET /api/messages?before=<ms>&limit=<n>
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let before = query.before(now_millis());
    let limit = query.limit();

    let messages = state.store.get_messages(before, limit).await.map_err(|e| {
        error!("Failed to load messages before {}: {}", before, e);
        ApiError::Internal("Failed to retrieve messages")
    })?;

    let has_more = messages.len() == limit as usize;
    Ok(Json(MessagesResponse { messages, has_more }))
}

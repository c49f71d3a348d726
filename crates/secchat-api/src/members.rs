use axum::Json;
use axum::extract::State;
use tracing::error;

use secchat_gateway::presence::annotate_members;
use secchat_types::api::MembersResponse;

use crate::AppState;
use crate::error::ApiError;

/// GET /api/members: every known user, `online` taken from the live hub.
pub async fn list_members(State(state): State<AppState>) -> Result<Json<MembersResponse>, ApiError> {
    let stored = state.store.get_users().await.map_err(|e| {
        error!("Failed to load users: {}", e);
        ApiError::Internal("Failed to retrieve members")
    })?;

    let online = state.hub.online_ids().await.map_err(|e| {
        error!("Failed to read online users: {}", e);
        ApiError::Internal("Failed to retrieve members")
    })?;

    Ok(Json(MembersResponse {
        members: annotate_members(stored, &online),
    }))
}

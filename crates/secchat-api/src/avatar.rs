use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use tracing::{error, info};

use secchat_types::api::{AvatarUpdateRequest, AvatarUpdateResponse};

use crate::AppState;
use crate::error::ApiError;

/// POST /api/avatar: persist a user's avatar and refresh everyone's
/// presence list.
pub async fn update_avatar(
    State(state): State<AppState>,
    body: Result<Json<AvatarUpdateRequest>, JsonRejection>,
) -> Result<Json<AvatarUpdateResponse>, ApiError> {
    let Json(req) = body.map_err(|_| ApiError::BadRequest("Invalid request body"))?;
    if req.user_id.is_empty() || req.avatar.is_empty() {
        return Err(ApiError::BadRequest("Missing userId or avatar"));
    }

    let mut user = state
        .store
        .get_user(req.user_id.clone())
        .await
        .map_err(|e| {
            error!("Failed to load user {}: {}", req.user_id, e);
            ApiError::Internal("Failed to get users")
        })?
        .ok_or(ApiError::NotFound("User not found"))?;

    user.avatar = req.avatar.clone();
    user.touch();
    state.store.save_user(user).await.map_err(|e| {
        error!("Failed to save avatar for {}: {}", req.user_id, e);
        ApiError::Internal("Failed to update user")
    })?;

    info!(user_id = %req.user_id, "avatar updated");
    state.hub.update_avatar(&req.user_id, &req.avatar);
    state.hub.broadcast_presence();

    Ok(Json(AvatarUpdateResponse {
        success: true,
        avatar: req.avatar,
    }))
}

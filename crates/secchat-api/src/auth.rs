use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use tracing::{debug, warn};

use secchat_types::api::{AuthRequest, AuthResponse};

use crate::AppState;

fn reply(status: StatusCode, success: bool, message: &str) -> (StatusCode, Json<AuthResponse>) {
    (
        status,
        Json(AuthResponse {
            success,
            message: Some(message.to_string()),
        }),
    )
}

/// POST /api/auth: lets a client check the shared password before opening
/// the socket.
pub async fn verify_password(
    State(state): State<AppState>,
    body: Result<Json<AuthRequest>, JsonRejection>,
) -> (StatusCode, Json<AuthResponse>) {
    let Ok(Json(req)) = body else {
        debug!("Rejected auth request with unreadable body");
        return reply(StatusCode::BAD_REQUEST, false, "Invalid request body");
    };

    if !state.auth.verify(&req.password_hash) {
        warn!("HTTP auth check failed");
        return reply(StatusCode::UNAUTHORIZED, false, "Invalid password");
    }

    reply(StatusCode::OK, true, "Authentication successful")
}

use serde::{Deserialize, Serialize};

use crate::models::{Message, User};

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub password_hash: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// -- Messages --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
    /// True iff the page is full; a heuristic, not an exact count.
    pub has_more: bool,
}

// -- Members --

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub members: Vec<User>,
}

// -- Avatar --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarUpdateRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Serialize)]
pub struct AvatarUpdateResponse {
    pub success: bool,
    pub avatar: String,
}

// -- Uploads --

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub filename: String,
}

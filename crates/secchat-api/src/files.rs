use std::path::Path;

use axum::Json;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use chrono::Local;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use secchat_types::api::UploadResponse;

use crate::AppState;
use crate::error::ApiError;

/// 10 MB upload limit
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Request body cap for the multipart envelope around one file.
pub const MAX_UPLOAD_BODY: usize = MAX_UPLOAD_SIZE + 64 * 1024;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// `len` characters of `[a-z0-9]` from the thread-local CSPRNG.
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// Extension of the client's file name including the dot, or empty. Only
/// alphanumeric extensions survive so the stored name stays a plain file.
fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

fn stored_name(client_name: Option<&str>) -> String {
    format!(
        "{}_{}{}",
        Local::now().format("%Y%m%d%H%M%S"),
        random_suffix(8),
        client_name.map(extension_of).unwrap_or_default()
    )
}

/// POST /api/upload: multipart field `file`, saved under the upload
/// directory with a generated name.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut saved = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Malformed upload: {}", e);
        ApiError::BadRequest("Failed to read file")
    })? {
        if field.name() == Some("file") {
            saved = Some(save_field(field, &state.upload_dir).await?);
            break;
        }
    }

    let filename = saved.ok_or(ApiError::BadRequest("Failed to read file"))?;
    Ok(Json(UploadResponse {
        url: format!("/uploads/{}", filename),
        filename,
    }))
}

/// Stream one field to disk. A partial file is removed on failure.
async fn save_field(mut field: Field<'_>, dir: &Path) -> Result<String, ApiError> {
    let filename = stored_name(field.file_name());
    let path = dir.join(&filename);

    let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
        error!("Failed to create file {}: {}", path.display(), e);
        ApiError::Internal("Failed to save file")
    })?;

    let mut size = 0usize;
    let written: Result<(), ApiError> = async {
        while let Some(chunk) = field.chunk().await.map_err(|e| {
            warn!("Upload stream failed: {}", e);
            ApiError::BadRequest("Failed to read file")
        })? {
            size += chunk.len();
            file.write_all(&chunk).await.map_err(|e| {
                error!("Failed to write file {}: {}", path.display(), e);
                ApiError::Internal("Failed to save file")
            })?;
        }
        file.flush().await.map_err(|e| {
            error!("Failed to flush file {}: {}", path.display(), e);
            ApiError::Internal("Failed to save file")
        })
    }
    .await;

    if let Err(e) = written {
        drop(file);
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
    }

    info!(%filename, size, "file uploaded");
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{call, state_with_dir};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    const BOUNDARY: &str = "secchat-test-boundary";

    fn multipart_request(field: &str, file_name: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n{content}\r\n--{b}--\r\n",
            b = BOUNDARY,
        );
        Request::post("/api/upload")
            .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn suffix_uses_lowercase_alphanumerics() {
        let s = random_suffix(64);
        assert_eq!(s.len(), 64);
        assert!(s.bytes().all(|c| SUFFIX_CHARSET.contains(&c)));
        assert_ne!(random_suffix(16), random_suffix(16));
    }

    #[test]
    fn extension_is_kept_only_when_plain() {
        assert_eq!(extension_of("cat.png"), ".png");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of("../../evil.sh"), ".sh");
        assert_eq!(extension_of("weird.p%g"), "");
    }

    #[test]
    fn stored_name_has_timestamp_and_suffix() {
        let name = stored_name(Some("photo.jpg"));
        let (stamp, rest) = name.split_once('_').unwrap();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.bytes().all(|c| c.is_ascii_digit()));
        assert_eq!(rest.len(), 8 + ".jpg".len());
        assert!(rest.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn saves_file_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_dir(dir.path().to_path_buf());

        let (status, json) = call(&state, multipart_request("file", "hello.txt", "hi there")).await;
        assert_eq!(status, StatusCode::OK);

        let filename = json["filename"].as_str().unwrap();
        assert!(filename.ends_with(".txt"));
        assert_eq!(json["url"], format!("/uploads/{}", filename));
        assert_eq!(std::fs::read_to_string(dir.path().join(filename)).unwrap(), "hi there");
    }

    #[tokio::test]
    async fn missing_file_field_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_dir(dir.path().to_path_buf());

        let (status, json) = call(&state, multipart_request("other", "a.txt", "x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Failed to read file");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

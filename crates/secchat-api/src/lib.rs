pub mod auth;
pub mod avatar;
pub mod error;
pub mod files;
pub mod members;
pub mod messages;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use secchat_db::StoreHandle;
use secchat_gateway::GatewayContext;
use secchat_gateway::auth::AuthGate;
use secchat_gateway::connection::ConnectionTimings;
use secchat_gateway::hub::Hub;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: StoreHandle,
    pub hub: Hub,
    pub auth: AuthGate,
    pub upload_dir: PathBuf,
    pub version: String,
    pub timings: ConnectionTimings,
}

impl AppStateInner {
    /// The slice of state a WebSocket connection needs.
    pub fn gateway(&self) -> GatewayContext {
        GatewayContext {
            hub: self.hub.clone(),
            store: self.store.clone(),
            auth: self.auth.clone(),
            version: self.version.clone(),
        }
    }
}

/// All `/api/*` routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth", post(auth::verify_password))
        .route("/api/messages", get(messages::list_messages))
        .route("/api/members", get(members::list_members))
        .route("/api/avatar", post(avatar::update_avatar))
        .route(
            "/api/upload",
            post(files::upload).layer(DefaultBodyLimit::max(files::MAX_UPLOAD_BODY)),
        )
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use secchat_db::Database;

    pub fn state_with_dir(upload_dir: PathBuf) -> AppState {
        let store = StoreHandle::new(Database::open_in_memory().unwrap());
        Arc::new(AppStateInner {
            hub: Hub::spawn(store.clone()),
            store,
            auth: AuthGate::from_secret("secret"),
            upload_dir,
            version: "1.2.0".into(),
            timings: ConnectionTimings::default(),
        })
    }

    pub fn state() -> AppState {
        state_with_dir(std::env::temp_dir())
    }

    pub async fn call(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    pub fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}

pub mod config;

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use secchat_api::{AppState, AppStateInner};
use secchat_db::{Database, StoreHandle};
use secchat_gateway::auth::AuthGate;
use secchat_gateway::connection::{self, ConnectionTimings, MAX_MESSAGE_SIZE};
use secchat_gateway::hub::Hub;

use crate::config::Config;

/// Wire the store, hub and auth gate together. Must run inside a runtime
/// since the hub actor is spawned here.
pub fn build_state(config: &Config, db: Database) -> AppState {
    build_state_with_timings(config, db, ConnectionTimings::default())
}

pub fn build_state_with_timings(
    config: &Config,
    db: Database,
    timings: ConnectionTimings,
) -> AppState {
    let store = StoreHandle::new(db);
    Arc::new(AppStateInner {
        hub: Hub::spawn(store.clone()),
        store,
        auth: AuthGate::from_secret(&config.password),
        upload_dir: config.upload_dir.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timings,
    })
}

pub fn build_router(state: AppState, static_dir: &Path) -> Router {
    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state.clone());

    let mut app = Router::new()
        .merge(secchat_api::router(state.clone()))
        .merge(ws_route)
        .nest_service("/uploads", ServeDir::new(&state.upload_dir));

    if static_dir.is_dir() {
        let index = ServeFile::new(static_dir.join("index.html"));
        app = app.fallback_service(ServeDir::new(static_dir).fallback(index));
    } else {
        warn!("Static directory {} not found, frontend disabled", static_dir.display());
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let ctx = state.gateway();
    let timings = state.timings;
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| connection::handle_connection(socket, ctx, timings))
}

/// Open storage, bind and serve until the listener fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.prepare_dirs()?;

    let db = Database::open(&config.db_path)?;
    let state = build_state(&config, db);
    let app = build_router(state, &config.static_dir);

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        %addr,
        db = %config.db_path.display(),
        uploads = %config.upload_dir.display(),
        "secchat listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

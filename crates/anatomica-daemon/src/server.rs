//! Web server setup and routing

use anatomica_core::SharedState;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::api;
use crate::session::SessionCommand;
use crate::ws;

/// State shared by HTTP handlers. Handlers read the visualization state and
/// forward every mutation to the session loop.
pub struct AppState {
    pub shared: SharedState,
    pub commands: mpsc::Sender<SessionCommand>,
    pub session_id: Uuid,
    pub patient_id: String,
    /// WebSocket polling interval for state changes
    pub push_interval: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/state", get(api::get_state))
        .route("/api/session", get(api::get_session))
        .route("/api/voice", post(api::post_voice))
        .route("/api/zone", post(api::post_zone))
        .route("/api/recalibrate", post(api::post_recalibrate))
        // WebSocket for state snapshots
        .route("/ws", get(ws::websocket_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server until the listener fails
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, app).await?;
    Ok(())
}

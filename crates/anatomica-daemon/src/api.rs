//! REST API handlers

use anatomica_core::BodyZone;
use anatomica_voice::Recognized;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::server::AppState;
use crate::session::SessionCommand;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn session_gone() -> axum::response::Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiError::new("Session is not running")),
    )
        .into_response()
}

/// Current visualization state
pub async fn get_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.shared.snapshot())
}

#[derive(Serialize)]
pub struct SessionInfo {
    id: String,
    patient: String,
    revision: u64,
}

pub async fn get_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SessionInfo {
        id: state.session_id.to_string(),
        patient: state.patient_id.clone(),
        revision: state.shared.revision(),
    })
}

#[derive(Deserialize)]
pub struct VoiceRequest {
    text: String,
}

#[derive(Serialize)]
pub struct VoiceResponse {
    recognized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Recognized>,
}

/// Submit a recognized utterance
pub async fn post_voice(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VoiceRequest>,
) -> impl IntoResponse {
    debug!(text = %req.text, "Voice utterance via API");
    let (reply, response) = oneshot::channel();
    let command = SessionCommand::Voice {
        text: req.text,
        reply: Some(reply),
    };
    if state.commands.send(command).await.is_err() {
        return session_gone();
    }
    match response.await {
        Ok(result) => Json(VoiceResponse {
            recognized: result.is_some(),
            result,
        })
        .into_response(),
        Err(_) => session_gone(),
    }
}

#[derive(Deserialize)]
pub struct ZoneRequest {
    zone: String,
}

/// Manually select a zone
pub async fn post_zone(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ZoneRequest>,
) -> impl IntoResponse {
    let Some(zone) = BodyZone::from_name(&req.zone) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(format!("Unknown zone: {}", req.zone))),
        )
            .into_response();
    };
    info!(zone = %zone, "Manual zone selected via API");
    if state.commands.send(SessionCommand::SetZone(zone)).await.is_err() {
        return session_gone();
    }
    StatusCode::ACCEPTED.into_response()
}

/// Drop calibration and schedule a new attempt
pub async fn post_recalibrate(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Recalibration requested via API");
    if state.commands.send(SessionCommand::Recalibrate).await.is_err() {
        return session_gone();
    }
    StatusCode::ACCEPTED.into_response()
}

//! WebSocket handler pushing state snapshots on change

use anatomica_core::VisualizationState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::server::AppState;

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "session")]
    Session { id: String, patient: String },
    #[serde(rename = "state")]
    State(Box<VisualizationState>),
    #[serde(rename = "pong")]
    Pong,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    msg: &WsMessage,
) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            debug!(error = %e, "Failed to serialize WebSocket message");
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    info!("WebSocket client connected");

    let hello = WsMessage::Session {
        id: state.session_id.to_string(),
        patient: state.patient_id.clone(),
    };
    if !send_json(&mut sender, &hello).await {
        return;
    }

    let snapshot = state.shared.snapshot();
    let mut last_revision = snapshot.revision;
    if !send_json(&mut sender, &WsMessage::State(Box::new(snapshot))).await {
        return;
    }

    let mut ticker = interval(state.push_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // Push a snapshot whenever the state revision moves
            _ = ticker.tick() => {
                if state.shared.revision() == last_revision {
                    continue;
                }
                let snapshot = state.shared.snapshot();
                last_revision = snapshot.revision;
                if !send_json(&mut sender, &WsMessage::State(Box::new(snapshot))).await {
                    break;
                }
            }

            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" && !send_json(&mut sender, &WsMessage::Pong).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket receive error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

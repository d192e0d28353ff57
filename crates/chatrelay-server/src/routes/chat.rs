//! Chat routes — the streaming WebSocket endpoint and model status.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chatrelay_chat::ModelId;
use futures::{future, SinkExt, StreamExt};
use tracing::debug;
use uuid::Uuid;

use crate::relay;
use crate::state::AppState;

/// Routes mounted at the server root.
pub fn socket_routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws/chat", get(chat_socket))
}

/// Routes mounted under `/api`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/chat/status", get(get_status))
}

// ---------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------

async fn chat_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

/// Adapt an axum socket to the transport-agnostic relay loop.
async fn serve_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4().to_string();
    let (ws_tx, mut ws_rx) = socket.split();

    let frames = async_stream::stream! {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => yield text.as_str().to_owned(),
                Ok(Message::Close(_)) => break,
                // Ping/pong are answered by the transport; binary frames are not part of the protocol
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    };

    let sink = ws_tx.with(|text: String| {
        future::ready(Ok::<Message, axum::Error>(Message::Text(text.into())))
    });

    relay::relay_session(&state.chains, &session_id, Box::pin(frames), Box::pin(sink)).await;
}

// ---------------------------------------------------------------
// Status
// ---------------------------------------------------------------

async fn get_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: serde_json::Map<String, serde_json::Value> = state
        .chains
        .availability()
        .into_iter()
        .map(|(id, available)| (id.to_string(), serde_json::Value::Bool(available)))
        .collect();

    Json(serde_json::json!({
        "models": models,
        "defaultModel": ModelId::DEFAULT.as_str(),
    }))
}

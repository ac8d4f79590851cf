//! WebSocket Gateway (§4.5, §6). Grounded on the subscriber-loop shape of
//! `deployer/src/handlers/mod.rs`'s `logs_websocket_handler` and the event
//! envelope / ping-pong / keepalive semantics of `original_source/.../ws/progress.py`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::context::AppContext;
use crate::domain::Event;

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn progress(
    ws: WebSocketUpgrade,
    State(context): State<Arc<AppContext>>,
    Path(deployment_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, context, deployment_id))
}

async fn handle_socket(mut socket: WebSocket, context: Arc<AppContext>, deployment_id: String) {
    let (mut receiver, count) = context.events.subscribe(&deployment_id).await;
    tracing::info!(deployment_id, "websocket client connected");

    let connected = Event::Connected { subscriber_count: count }.to_envelope(&deployment_id, Utc::now());
    if socket.send(Message::Text(connected.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = receiver.recv() => {
                let (timestamp, event) = match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(deployment_id, skipped, "websocket subscriber lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let envelope = event.to_envelope(&deployment_id, timestamp);
                if socket.send(Message::Text(envelope.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text == "ping" => {
                        if socket.send(Message::Text("pong".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            _ = tokio::time::sleep(IDLE_TIMEOUT) => {
                let envelope = Event::Keepalive.to_envelope(&deployment_id, Utc::now());
                if socket.send(Message::Text(envelope.to_string())).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!(deployment_id, "websocket client disconnected");
}

pub async fn status(State(context): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    let counts = context.events.all_subscriber_counts().await;
    Json(json!({ "subscribers": counts }))
}

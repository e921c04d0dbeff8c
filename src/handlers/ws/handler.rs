//! Streaming relay socket handler.
//!
//! Upgrades the HTTP connection and wires one `StreamingSession` to it: a
//! sender task serializes session events onto the socket while the receive
//! loop routes client frames into the session.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::session::{SessionEvent, StreamingSession};
use crate::state::AppState;

use super::messages::IncomingMessage;

/// Buffer size for the outgoing event channel. Large enough that a burst of
/// ai_chunk events does not stall the listener task.
const EVENT_BUFFER: usize = 256;

/// Streaming relay endpoint handler.
pub async fn ws_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("Streaming websocket upgrade requested");
    ws.on_upgrade(move |socket| handle_stream_socket(socket, state))
}

async fn handle_stream_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(EVENT_BUFFER);

    // Serialize session events onto the socket
    let sender_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize session event: {}", e),
            }
        }
    });

    let session = StreamingSession::new(app_state.session_context(), event_tx.clone());
    info!("Streaming session {} established", session.id());
    session.start().await;

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Binary(data)) => {
                session.forward_audio(&data).await;
            }
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<IncomingMessage>(&text) {
                    Ok(IncomingMessage::AudioData { data }) => match BASE64.decode(&data) {
                        Ok(pcm) => session.forward_audio(&pcm).await,
                        Err(e) => {
                            warn!("Session {} sent invalid base64 audio: {}", session.id(), e);
                            let _ = event_tx
                                .send(SessionEvent::Error {
                                    message: "Invalid base64 audio payload".to_string(),
                                })
                                .await;
                        }
                    },
                    Ok(IncomingMessage::ResetConversation) => session.reset_conversation().await,
                    Ok(IncomingMessage::TestLlm) => session.test_llm().await,
                    Err(e) => {
                        warn!("Session {} sent invalid message: {}", session.id(), e);
                        let _ = event_tx
                            .send(SessionEvent::Error {
                                message: format!("Invalid message format: {e}"),
                            })
                            .await;
                    }
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!("Heartbeat frame on session {}", session.id());
            }
            Ok(Message::Close(_)) => {
                info!("Session {} closed by client", session.id());
                break;
            }
            Err(e) => {
                warn!("Session {} websocket error: {}", session.id(), e);
                break;
            }
        }
    }

    session.teardown().await;
    sender_task.abort();
    info!("Streaming session terminated");
}

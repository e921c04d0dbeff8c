//! Upload socket handler: whole-file recognition.
//!
//! Two upload paths share the normalize-then-recognize pipeline:
//!
//! - **Binary upload**: the raw file arrives as one binary frame and is
//!   recognized over a dedicated two-pass streaming connection, relaying
//!   partial and per-segment results plus send progress, then a streamed
//!   LLM reply.
//! - **JSON upload**: a base64 payload with a filename hint is recognized in
//!   offline batch mode with per-segment progress, then a one-shot LLM
//!   reply.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

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

use crate::core::asr::{
    AsrConnection, AsrMode, ControlFrame, SegmentProgress, SegmentUpdate, clean_transcript,
};
use crate::core::audio::{NormalizedAudio, normalize, probe};
use crate::core::llm::{ResponseFilter, strip_hidden_spans};
use crate::state::AppState;

use super::messages::{UploadCommand, UploadEvent};

const EVENT_BUFFER: usize = 256;

/// Progress events are emitted every this many sent chunks.
const PROGRESS_EVERY: usize = 50;

/// Pacing delay between audio chunks, mirroring real-time capture.
const CHUNK_PACING: Duration = Duration::from_millis(10);

/// Overall bound on waiting for recognition results.
const RESULT_DEADLINE: Duration = Duration::from_secs(60);

const RESULT_POLL: Duration = Duration::from_secs(5);

/// Upload endpoint handler.
pub async fn ws_upload_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("Upload websocket upgrade requested");
    ws.on_upgrade(move |socket| handle_upload_socket(socket, state))
}

async fn handle_upload_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<UploadEvent>(EVENT_BUFFER);

    let sender_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize upload event: {}", e),
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Binary(data)) => {
                process_binary_upload(&data, &app_state, &event_tx).await;
            }
            Ok(Message::Text(text)) => match serde_json::from_str::<UploadCommand>(&text) {
                Ok(UploadCommand::UploadAudio {
                    audio_data,
                    filename,
                }) => {
                    process_base64_upload(&audio_data, filename, &app_state, &event_tx).await;
                }
                Err(e) => {
                    warn!("Invalid upload command: {}", e);
                    let _ = event_tx
                        .send(UploadEvent::Error {
                            message: format!("Invalid message format: {e}"),
                        })
                        .await;
                }
            },
            Ok(Message::Close(_)) => {
                info!("Upload socket closed by client");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Upload socket error: {}", e);
                break;
            }
        }
    }

    // Let queued events flush before the socket goes away
    drop(event_tx);
    let _ = sender_task.await;
    info!("Upload socket terminated");
}

/// Binary path: normalize, then recognize over a streaming connection.
async fn process_binary_upload(
    data: &[u8],
    state: &Arc<AppState>,
    events: &mpsc::Sender<UploadEvent>,
) {
    info!("Received {} byte binary upload", data.len());
    let _ = events
        .send(UploadEvent::FileReceived {
            size: data.len(),
            message: "Processing uploaded audio".to_string(),
        })
        .await;

    let info = probe(data);
    let _ = events
        .send(UploadEvent::Processing {
            message: format!(
                "Audio info: {} container, {} bytes",
                info.format.label(),
                info.size
            ),
            processed_size: None,
            sample_rate: None,
        })
        .await;

    let audio = normalize(data, "upload.wav", state.config.audio.target_sample_rate).await;
    if audio.pcm.is_empty() {
        let _ = events
            .send(UploadEvent::UploadError {
                error: "Could not decode the uploaded audio".to_string(),
            })
            .await;
        return;
    }

    let _ = events
        .send(UploadEvent::Processing {
            message: "Audio normalized, starting recognition".to_string(),
            processed_size: Some(audio.pcm.len()),
            sample_rate: Some(audio.sample_rate),
        })
        .await;

    stream_recognize(audio, state, events).await;
}

/// Recognize normalized PCM over a dedicated two-pass streaming connection,
/// relaying progress, then stream the LLM reply.
async fn stream_recognize(
    audio: NormalizedAudio,
    state: &Arc<AppState>,
    events: &mpsc::Sender<UploadEvent>,
) {
    let conn = match AsrConnection::connect(&state.config.asr).await {
        Ok(conn) => Arc::new(conn),
        Err(e) => {
            error!("Upload recognition could not reach the ASR backend: {}", e);
            let _ = events
                .send(UploadEvent::Error {
                    message: format!("Recognition failed: {e}"),
                })
                .await;
            return;
        }
    };

    let _ = events
        .send(UploadEvent::RecognitionStart {
            message: "Connected to ASR backend, recognition running".to_string(),
        })
        .await;

    let start = ControlFrame::pcm_start(
        &AsrMode::two_pass(),
        audio.sample_rate,
        "web_upload_stream",
    );
    if let Err(e) = conn.send_config(&start).await {
        let _ = events
            .send(UploadEvent::Error {
                message: format!("Recognition failed: {e}"),
            })
            .await;
        return;
    }

    let collector = tokio::spawn(collect_stream_results(conn.clone(), events.clone()));

    // 60ms worth of 16-bit mono samples per chunk
    let stride = (60 * audio.sample_rate as usize / 1000) * 2;
    let total = audio.pcm.len().div_ceil(stride.max(1));
    debug!("Sending upload audio in {} chunks of {} bytes", total, stride);

    for (i, chunk) in audio.pcm.chunks(stride.max(1)).enumerate() {
        if let Err(e) = conn.send_audio(chunk).await {
            warn!("Upload audio send failed mid-stream: {}", e);
            break;
        }

        let sent = i + 1;
        if sent % PROGRESS_EVERY == 0 || sent == total {
            let _ = events
                .send(UploadEvent::UploadProgress {
                    progress: Some(sent as f64 / total as f64 * 100.0),
                    current: Some(sent),
                    total: Some(total),
                    message: None,
                    filename: None,
                })
                .await;
        }

        tokio::time::sleep(CHUNK_PACING).await;
    }

    let _ = conn.send_config(&ControlFrame::end_of_speech()).await;
    let _ = events
        .send(UploadEvent::UploadComplete {
            message: Some("Audio sent, awaiting final recognition".to_string()),
            recognized_text: None,
            llm_response: None,
        })
        .await;

    let recognized = collector.await.unwrap_or_default();
    conn.disconnect();

    if recognized.is_empty() {
        return;
    }
    stream_llm_reply(&recognized, state, events).await;
}

/// Drain recognition results until the backend flags completion, the
/// transport closes, or the deadline passes. Returns the accumulated text.
async fn collect_stream_results(
    conn: Arc<AsrConnection>,
    events: mpsc::Sender<UploadEvent>,
) -> String {
    let deadline = tokio::time::Instant::now() + RESULT_DEADLINE;
    let mut accumulated = String::new();

    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            warn!("Upload recognition hit the result deadline");
            break;
        }

        let frame = match conn.receive_frame(RESULT_POLL.min(deadline - now)).await {
            Some(frame) => frame,
            None => {
                if !conn.is_connected() {
                    break;
                }
                continue;
            }
        };

        if !frame.text.trim().is_empty() {
            let display = clean_transcript(&frame.text);
            if frame.mode == "2pass-online" {
                let _ = events
                    .send(UploadEvent::RecognitionPartial {
                        text: display,
                        mode: frame.mode.clone(),
                    })
                    .await;
            } else if frame.is_final_pass() {
                accumulated.push_str(frame.text.trim());
                let _ = events
                    .send(UploadEvent::RecognitionSegment {
                        text: display,
                        accumulated: clean_transcript(&accumulated),
                        mode: Some(frame.mode.clone()),
                    })
                    .await;
            }
        }

        if frame.is_final {
            debug!("Upload recognition complete");
            break;
        }
    }

    clean_transcript(accumulated.trim())
}

/// Stream a filtered LLM reply for the recognized text.
async fn stream_llm_reply(
    recognized: &str,
    state: &Arc<AppState>,
    events: &mpsc::Sender<UploadEvent>,
) {
    let _ = events
        .send(UploadEvent::LlmStart {
            message: "Generating AI reply".to_string(),
        })
        .await;

    let mut tokens = match state.llm.stream_chat(recognized, &[]).await {
        Ok(tokens) => tokens,
        Err(e) => {
            error!("Upload LLM call failed: {}", e);
            let _ = events
                .send(UploadEvent::LlmError {
                    error: "AI service is temporarily unavailable".to_string(),
                })
                .await;
            return;
        }
    };

    let mut filter = ResponseFilter::new();
    let mut full_response = String::new();

    while let Some(item) = tokens.recv().await {
        match item {
            Ok(token) => {
                full_response.push_str(&token);
                let visible = filter.push(&token);
                if !visible.is_empty() {
                    let _ = events.send(UploadEvent::LlmChunk { chunk: visible }).await;
                }
            }
            Err(e) => {
                error!("Upload LLM stream failed: {}", e);
                let _ = events
                    .send(UploadEvent::LlmError {
                        error: "AI service is temporarily unavailable".to_string(),
                    })
                    .await;
                return;
            }
        }
    }

    let tail = filter.finish();
    if !tail.is_empty() {
        let _ = events.send(UploadEvent::LlmChunk { chunk: tail }).await;
    }

    let _ = events
        .send(UploadEvent::LlmComplete {
            recognized_text: recognized.to_string(),
            llm_response: strip_hidden_spans(&full_response),
        })
        .await;
}

/// JSON path: base64 payload recognized in offline batch mode.
async fn process_base64_upload(
    audio_b64: &str,
    filename: Option<String>,
    state: &Arc<AppState>,
    events: &mpsc::Sender<UploadEvent>,
) {
    let data = match BASE64.decode(audio_b64) {
        Ok(data) => data,
        Err(e) => {
            warn!("Upload carried invalid base64 audio: {}", e);
            let _ = events
                .send(UploadEvent::UploadError {
                    error: "Missing or invalid audio payload".to_string(),
                })
                .await;
            return;
        }
    };
    let filename = filename.unwrap_or_else(|| "uploaded_audio".to_string());

    let _ = events
        .send(UploadEvent::UploadProgress {
            progress: None,
            current: None,
            total: None,
            message: Some(format!("Processing {filename}")),
            filename: Some(filename.clone()),
        })
        .await;

    let info = probe(&data);
    let _ = events
        .send(UploadEvent::UploadProgress {
            progress: None,
            current: None,
            total: None,
            message: Some(format!(
                "Audio info: {} container, {} bytes",
                info.format.label(),
                info.size
            )),
            filename: None,
        })
        .await;

    let audio = normalize(&data, &filename, state.config.audio.target_sample_rate).await;
    if audio.pcm.is_empty() {
        let _ = events
            .send(UploadEvent::UploadError {
                error: "Could not decode the uploaded audio".to_string(),
            })
            .await;
        return;
    }

    let _ = events
        .send(UploadEvent::UploadProgress {
            progress: None,
            current: None,
            total: None,
            message: Some("Audio normalized, recognition running".to_string()),
            filename: None,
        })
        .await;

    let progress_events = events.clone();
    let progress: SegmentProgress = Arc::new(move |update: SegmentUpdate| {
        let events = progress_events.clone();
        Box::pin(async move {
            let _ = events
                .send(UploadEvent::RecognitionSegment {
                    text: update.text,
                    accumulated: update.accumulated,
                    mode: None,
                })
                .await;
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });

    let recognized = match AsrConnection::recognize_offline(
        &state.config.asr,
        &audio.pcm,
        audio.sample_rate,
        Some(progress),
    )
    .await
    {
        Ok(text) => text,
        Err(e) => {
            error!("Batch recognition failed: {}", e);
            let _ = events
                .send(UploadEvent::UploadError {
                    error: format!("Recognition failed: {e}"),
                })
                .await;
            return;
        }
    };

    if recognized.is_empty() {
        let _ = events
            .send(UploadEvent::UploadError {
                error: "No speech recognized in the uploaded audio".to_string(),
            })
            .await;
        return;
    }

    let _ = events
        .send(UploadEvent::UploadProgress {
            progress: None,
            current: None,
            total: None,
            message: Some("Recognition complete, calling AI".to_string()),
            filename: None,
        })
        .await;

    match state.llm.complete(&recognized, &[]).await {
        Ok(reply) => {
            let _ = events
                .send(UploadEvent::UploadComplete {
                    message: None,
                    recognized_text: Some(recognized),
                    llm_response: Some(strip_hidden_spans(&reply)),
                })
                .await;
        }
        Err(e) => {
            error!("Batch LLM call failed: {}", e);
            let _ = events
                .send(UploadEvent::LlmError {
                    error: "AI service is temporarily unavailable".to_string(),
                })
                .await;
        }
    }
}

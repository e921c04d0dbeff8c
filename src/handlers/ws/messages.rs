//! Boundary message types for the websocket surfaces.
//!
//! The streaming socket's outgoing taxonomy lives with the session layer
//! (`core::session::SessionEvent`); this module holds the incoming commands
//! for both sockets and the upload socket's outgoing events.

use serde::{Deserialize, Serialize};

/// Commands accepted on the streaming socket. Raw binary frames carry audio
/// directly and bypass JSON entirely.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    /// Base64-carried audio for clients that cannot send binary frames.
    #[serde(rename = "audio_data")]
    AudioData { data: String },
    #[serde(rename = "reset_conversation")]
    ResetConversation,
    #[serde(rename = "test_llm")]
    TestLlm,
}

/// Commands accepted on the upload socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum UploadCommand {
    #[serde(rename = "upload_audio")]
    UploadAudio {
        audio_data: String,
        #[serde(default)]
        filename: Option<String>,
    },
}

/// Events emitted on the upload socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum UploadEvent {
    #[serde(rename = "file_received")]
    FileReceived { size: usize, message: String },
    #[serde(rename = "processing")]
    Processing {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        processed_size: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u32>,
    },
    #[serde(rename = "recognition_start")]
    RecognitionStart { message: String },
    #[serde(rename = "recognition_partial")]
    RecognitionPartial { text: String, mode: String },
    #[serde(rename = "recognition_segment")]
    RecognitionSegment {
        text: String,
        accumulated: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },
    #[serde(rename = "upload_progress")]
    UploadProgress {
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    #[serde(rename = "upload_complete")]
    UploadComplete {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        recognized_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        llm_response: Option<String>,
    },
    #[serde(rename = "llm_start")]
    LlmStart { message: String },
    #[serde(rename = "llm_chunk")]
    LlmChunk { chunk: String },
    #[serde(rename = "llm_complete")]
    LlmComplete {
        recognized_text: String,
        llm_response: String,
    },
    #[serde(rename = "llm_error")]
    LlmError { error: String },
    #[serde(rename = "upload_error")]
    UploadError { error: String },
    #[serde(rename = "error")]
    Error { message: String },
}

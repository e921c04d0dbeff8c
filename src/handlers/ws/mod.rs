//! # Websocket Relay Handlers
//!
//! Two websocket surfaces relay audio to the ASR backend and stream
//! answers back:
//!
//! ## `/ws/stream` — live relay
//!
//! 1. On connect the server sends `connection_established` with the session
//!    id, then attaches an ASR connection (pooled or dedicated per
//!    configuration) and reports `asr_connected` / `asr_connection_failed`.
//! 2. The client sends raw binary PCM frames (or
//!    `{"type": "audio_data", "data": "<base64>"}`), which are forwarded to
//!    the backend immediately.
//! 3. The server relays `recognition_partial` / `recognition_final` events,
//!    and for each novel finalized transcript streams a reply:
//!    `ai_start`, `ai_chunk`*, `ai_complete` (or `ai_error`).
//! 4. `{"type": "reset_conversation"}` clears history;
//!    `{"type": "test_llm"}` probes the completion provider.
//!
//! ## `/ws/upload` — whole-file recognition
//!
//! A binary frame carries a complete audio file: it is normalized, fed
//! through a dedicated streaming recognition pass with `upload_progress`
//! events, and answered with a streamed reply (`llm_chunk`*,
//! `llm_complete`). A JSON `upload_audio` command (base64 + filename) runs
//! the offline batch path instead, with `recognition_segment` progress and
//! a one-shot reply in `upload_complete`.

pub mod handler;
pub mod messages;
pub mod upload;

pub use handler::ws_stream_handler;
pub use messages::{IncomingMessage, UploadCommand, UploadEvent};
pub use upload::ws_upload_handler;

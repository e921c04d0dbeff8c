//! Wire messages for the ASR websocket protocol.
//!
//! The backend speaks a small JSON + binary framing: one JSON control frame
//! configures the stream, raw PCM goes out as binary frames, and recognition
//! results come back as JSON text frames.

use serde::{Deserialize, Serialize};

/// Framing parameters for one recognition pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Lookback / current / lookahead chunk sizes, in backend frame units.
    pub chunk_size: [u32; 3],
    /// Interval between chunks, in backend frame units.
    pub chunk_interval: u32,
}

impl Default for ChunkPlan {
    fn default() -> Self {
        Self {
            chunk_size: [5, 10, 5],
            chunk_interval: 10,
        }
    }
}

/// Recognition mode, each variant carrying its own framing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrMode {
    /// Continuous streaming: fast provisional results followed by a
    /// corrected final result per utterance.
    TwoPass(ChunkPlan),
    /// Whole-buffer recognition: final results only.
    Offline(ChunkPlan),
}

impl AsrMode {
    pub fn two_pass() -> Self {
        Self::TwoPass(ChunkPlan::default())
    }

    pub fn offline() -> Self {
        Self::Offline(ChunkPlan::default())
    }

    /// Mode tag as the backend expects it on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::TwoPass(_) => "2pass",
            Self::Offline(_) => "offline",
        }
    }

    pub fn plan(&self) -> &ChunkPlan {
        match self {
            Self::TwoPass(plan) | Self::Offline(plan) => plan,
        }
    }
}

/// JSON control frame sent to the backend.
///
/// Every field is optional on the wire; the end-of-speech frame carries only
/// `is_speaking: false`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<[u32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_fs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wav_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wav_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_speaking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotwords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub itn: Option<bool>,
}

impl ControlFrame {
    /// Initial frame for a continuous streaming session.
    pub fn stream_start(mode: &AsrMode, wav_name: &str) -> Self {
        let plan = mode.plan();
        Self {
            mode: Some(mode.wire_name().to_string()),
            chunk_size: Some(plan.chunk_size),
            chunk_interval: Some(plan.chunk_interval),
            wav_name: Some(wav_name.to_string()),
            is_speaking: Some(true),
            hotwords: Some(String::new()),
            ..Default::default()
        }
    }

    /// Initial frame for recognition of raw PCM with a known sample rate.
    pub fn pcm_start(mode: &AsrMode, audio_fs: u32, wav_name: &str) -> Self {
        let plan = mode.plan();
        Self {
            mode: Some(mode.wire_name().to_string()),
            chunk_size: Some(plan.chunk_size),
            chunk_interval: Some(plan.chunk_interval),
            audio_fs: Some(audio_fs),
            wav_name: Some(wav_name.to_string()),
            wav_format: Some("pcm".to_string()),
            is_speaking: Some(true),
            hotwords: Some(String::new()),
            itn: Some(true),
        }
    }

    /// End-of-speech marker for batch recognition.
    pub fn end_of_speech() -> Self {
        Self {
            is_speaking: Some(false),
            ..Default::default()
        }
    }

    /// End-of-utterance marker for a continuous stream.
    pub fn end_of_utterance() -> Self {
        Self {
            is_speaking: Some(false),
            wav_name: Some("stream_end".to_string()),
            ..Default::default()
        }
    }
}

/// Recognition result frame received from the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptFrame {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub is_final: bool,
}

impl TranscriptFrame {
    /// Whether this frame carries a corrected (second-pass or offline) result.
    pub fn is_final_pass(&self) -> bool {
        self.mode == "2pass-offline" || self.mode == "offline"
    }

    /// Collapse the frame into the event the session layer consumes.
    pub fn event(&self) -> RecognitionEvent {
        if self.mode == "2pass-online" {
            RecognitionEvent::Partial(self.text.clone())
        } else if self.is_final_pass() {
            RecognitionEvent::Final(self.text.clone())
        } else {
            RecognitionEvent::NoEvent
        }
    }
}

/// Recognition event delivered to callers of `AsrConnection::receive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Fast provisional transcript for the current utterance.
    Partial(String),
    /// Corrected transcript for a completed utterance.
    Final(String),
    /// Nothing recognizable arrived within the poll window.
    NoEvent,
}

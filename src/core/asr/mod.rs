//! Streaming ASR backend integration: wire protocol, connection client, and
//! the shared connection pool.

pub mod client;
pub mod messages;
pub mod pool;

use std::sync::LazyLock;

use regex::Regex;

pub use client::{AsrConnection, AsrConnectionState, SegmentProgress, SegmentUpdate};
pub use messages::{AsrMode, ChunkPlan, ControlFrame, RecognitionEvent, TranscriptFrame};
pub use pool::{AsrPool, PoolAcquire, PoolConfig, PoolStats};

/// Error types for ASR operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum AsrError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Not connected to ASR backend")]
    NotConnected,
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Language/emotion annotations some backends prepend to transcripts,
/// e.g. `<|zh|><|NEUTRAL|><|Speech|>`.
static TRANSCRIPT_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|[^|]*\|>\s*").expect("transcript tag pattern is valid"));

/// Strip inline metadata tags from a raw transcript and trim whitespace.
pub fn clean_transcript(text: &str) -> String {
    TRANSCRIPT_TAGS.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_transcript_strips_tags() {
        assert_eq!(
            clean_transcript("<|zh|><|NEUTRAL|><|Speech|> 你好世界"),
            "你好世界"
        );
        assert_eq!(clean_transcript("<|en|>hello there"), "hello there");
    }

    #[test]
    fn test_clean_transcript_passthrough() {
        assert_eq!(clean_transcript("  plain text "), "plain text");
        assert_eq!(clean_transcript(""), "");
    }
}

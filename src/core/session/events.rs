//! Events a streaming session emits toward the client-facing relay.

use serde::Serialize;

use crate::core::asr::PoolStats;
use crate::core::llm::LlmTestReport;

/// Outgoing boundary events for the streaming socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "connection_established")]
    ConnectionEstablished {
        session_id: String,
        active_sessions: usize,
    },
    #[serde(rename = "asr_connected")]
    AsrConnected {
        message: String,
        connection_mode: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        pool_stats: Option<PoolStats>,
    },
    #[serde(rename = "asr_connection_failed")]
    AsrConnectionFailed { message: String, error: String },
    #[serde(rename = "recognition_partial")]
    RecognitionPartial { text: String },
    #[serde(rename = "recognition_final")]
    RecognitionFinal { text: String },
    #[serde(rename = "ai_start")]
    AiStart { user_text: String },
    #[serde(rename = "ai_chunk")]
    AiChunk { content: String },
    #[serde(rename = "ai_complete")]
    AiComplete { full_response: String },
    #[serde(rename = "ai_error")]
    AiError { error: String },
    #[serde(rename = "conversation_reset")]
    ConversationReset { message: String },
    #[serde(rename = "llm_test_result")]
    LlmTestResult { result: LlmTestReport },
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_tags() {
        let event = SessionEvent::RecognitionPartial {
            text: "hel".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "recognition_partial");
        assert_eq!(json["text"], "hel");

        let event = SessionEvent::AiChunk {
            content: "H".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ai_chunk");
    }

    #[test]
    fn test_pool_stats_omitted_for_dedicated_mode() {
        let event = SessionEvent::AsrConnected {
            message: "connected".to_string(),
            connection_mode: "dedicated",
            pool_stats: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("pool_stats"));
    }
}

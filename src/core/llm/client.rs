//! Client for an OpenAI-compatible chat completion provider.
//!
//! Supports streamed completions (server-sent `data:` lines) for live
//! replies, a non-streaming call for the upload flow, and a small
//! connectivity probe surfaced to the boundary.

use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::LlmConfig;
use crate::core::session::history::Turn;

const STREAM_SYSTEM_PROMPT: &str = "You are a voice AI assistant. Answer the user's questions \
     concisely and naturally, using the earlier conversation as context.";

const SIMPLE_SYSTEM_PROMPT: &str = "You are a friendly and helpful AI assistant. Answer the \
     user's questions concisely and accurately.";

const TEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Error types for LLM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Provider returned status {0}: {1}")]
    BadStatus(u16, String),
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Result of a connectivity probe, relayed verbatim to the boundary.
#[derive(Debug, Clone, Serialize)]
pub struct LlmTestReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    pub model: String,
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Chat completion client.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }

    fn build_messages(
        system_prompt: &str,
        history: &[Turn],
        user_input: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(ChatMessage {
            role: "system",
            content: system_prompt.to_string(),
        });
        for turn in history {
            messages.push(ChatMessage {
                role: "user",
                content: turn.user.clone(),
            });
            messages.push(ChatMessage {
                role: "assistant",
                content: turn.assistant.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_input.to_string(),
        });
        messages
    }

    fn post(&self, request: &ChatRequest) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(self.endpoint()).json(request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }
        builder
    }

    /// Start a streamed completion. Tokens arrive on the returned channel in
    /// provider order; a mid-stream failure is delivered as the final item.
    pub async fn stream_chat(
        &self,
        user_input: &str,
        history: &[Turn],
    ) -> Result<mpsc::Receiver<Result<String, LlmError>>, LlmError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: Self::build_messages(STREAM_SYSTEM_PROMPT, history, user_input),
            temperature: 0.7,
            max_tokens: 2000,
            stream: true,
        };

        info!(
            "Streaming completion request (model: {}, {} history turns)",
            self.config.model,
            history.len()
        );

        let response = self
            .post(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::BadStatus(status.as_u16(), body));
        }

        let (tx, rx) = mpsc::channel::<Result<String, LlmError>>(64);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut token_count = 0usize;

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("LLM stream interrupted: {}", e);
                        let _ = tx.send(Err(LlmError::RequestFailed(e.to_string()))).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    let line = line.trim();

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        debug!("LLM stream finished after {} tokens", token_count);
                        return;
                    }

                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(chunk) => {
                            let content = chunk
                                .choices
                                .first()
                                .and_then(|choice| choice.delta.content.clone());
                            if let Some(content) = content {
                                if content.is_empty() {
                                    continue;
                                }
                                token_count += 1;
                                if tx.send(Ok(content)).await.is_err() {
                                    // Receiver cancelled the stream
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!("Skipping unparseable stream line: {}", e),
                    }
                }
            }
            debug!("LLM stream closed after {} tokens", token_count);
        });

        Ok(rx)
    }

    /// One-shot completion used by the upload flow. Returns the raw
    /// assistant content; reasoning-span filtering is the caller's concern.
    pub async fn complete(&self, user_input: &str, history: &[Turn]) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: Self::build_messages(SIMPLE_SYSTEM_PROMPT, history, user_input),
            temperature: 0.7,
            max_tokens: 2000,
            stream: false,
        };

        let response = self
            .post(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::BadStatus(status.as_u16(), body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::MalformedResponse("response carried no content".to_string()))
    }

    /// Probe the provider with a tiny request and report timing.
    pub async fn test_connection(&self) -> LlmTestReport {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a test assistant.".to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: "Reply with the words: connection test successful".to_string(),
                },
            ],
            temperature: 0.1,
            max_tokens: 50,
            stream: false,
        };

        let started = Instant::now();
        let outcome = async {
            let response = self
                .post(&request)
                .timeout(TEST_TIMEOUT)
                .send()
                .await
                .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::BadStatus(status.as_u16(), body));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| {
                    LlmError::MalformedResponse("response carried no content".to_string())
                })
        }
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(content) => LlmTestReport {
                success: true,
                response_time_ms: Some(elapsed_ms),
                model: self.config.model.clone(),
                api_base: self.config.api_base.clone(),
                response: Some(super::filter::strip_hidden_spans(&content)),
                error: None,
            },
            Err(e) => {
                error!("LLM connectivity test failed: {}", e);
                LlmTestReport {
                    success: false,
                    response_time_ms: Some(elapsed_ms),
                    model: self.config.model.clone(),
                    api_base: self.config.api_base.clone(),
                    response: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = LlmClient::new(LlmConfig {
            api_base: "http://localhost:11434/v1/".to_string(),
            api_key: String::new(),
            model: "test".to_string(),
        });
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_message_building_interleaves_history() {
        let history = vec![
            Turn {
                user: "hi".to_string(),
                assistant: "hello".to_string(),
            },
            Turn {
                user: "how are you".to_string(),
                assistant: "fine".to_string(),
            },
        ];

        let messages = LlmClient::build_messages(STREAM_SYSTEM_PROMPT, &history, "bye");
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "hi");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[5].role, "user");
        assert_eq!(messages[5].content, "bye");
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap();
        assert_eq!(
            chunk.choices[0].delta.content.as_deref(),
            Some("Hel")
        );

        // Role-only delta (first chunk from many providers)
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }
}

//! Tests for the LLM client against a mock OpenAI-compatible provider.

use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voxrelay::config::LlmConfig;
use voxrelay::core::llm::{LlmClient, LlmError};

fn client_for(server: &MockServer) -> LlmClient {
    LlmClient::new(LlmConfig {
        api_base: server.uri(),
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
    })
}

#[tokio::test]
async fn test_stream_chat_yields_tokens_in_order() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"The \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"answer\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\".\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut tokens = client.stream_chat("question", &[]).await.unwrap();

    let mut collected = Vec::new();
    while let Some(item) = tokens.recv().await {
        collected.push(item.unwrap());
    }
    assert_eq!(collected, vec!["The ", "answer", "."]);
}

#[tokio::test]
async fn test_stream_chat_surfaces_bad_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    match client.stream_chat("question", &[]).await {
        Err(LlmError::BadStatus(500, body)) => assert_eq!(body, "overloaded"),
        other => panic!("expected BadStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_complete_returns_raw_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "<think>w</think>Sure."}}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let reply = client.complete("question", &[]).await.unwrap();
    // The client hands back raw content; filtering is the caller's concern
    assert_eq!(reply, "<think>w</think>Sure.");
}

#[tokio::test]
async fn test_complete_rejects_empty_choices() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(matches!(
        client.complete("question", &[]).await,
        Err(LlmError::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn test_probe_reports_success_and_filters_reasoning() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": "<think>easy</think>connection test successful"
            }}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let report = client.test_connection().await;

    assert!(report.success);
    assert_eq!(report.response.as_deref(), Some("connection test successful"));
    assert!(report.response_time_ms.is_some());
}

#[tokio::test]
async fn test_probe_reports_failure_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let report = client.test_connection().await;

    assert!(!report.success);
    assert!(report.error.is_some());
}

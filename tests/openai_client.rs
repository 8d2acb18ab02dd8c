//! HTTP behaviour of the chat completions client against a mock server.

use rustskgc::config::LlmConfig;
use rustskgc::llm::{ChatMessage, ChatModel, OpenAiChat};
use rustskgc::SkgcError;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> LlmConfig {
    LlmConfig {
        base_url: format!("{}/v1", server.uri()),
        agent_api_key: "sk-agent".to_string(),
        assistant_api_key: "sk-assistant".to_string(),
        rate_limit_retries: 2,
        rate_limit_backoff: Duration::from_millis(10),
        ..LlmConfig::default()
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
    })
}

fn conversation() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a researcher."),
        ChatMessage::user("Extract keywords."),
    ]
}

#[tokio::test]
async fn sends_key_model_and_sampling_settings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-agent"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "temperature": 0.0,
            "seed": 4,
            "messages": [
                {"role": "system", "content": "You are a researcher."},
                {"role": "user", "content": "Extract keywords."}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("  ontology, search  ")))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = OpenAiChat::new(&config, &config.agent_api_key).unwrap();
    let reply = client.chat(&conversation()).await.unwrap();

    assert_eq!(reply, "ontology, search");
    assert_eq!(client.usage().total_tokens, 15);
}

#[tokio::test]
async fn sends_organization_header_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("openai-organization", "org-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let config = LlmConfig {
        organization: Some("org-123".to_string()),
        ..config_for(&server)
    };
    let client = OpenAiChat::new(&config, &config.assistant_api_key).unwrap();
    assert_eq!(client.chat(&conversation()).await.unwrap(), "ok");
}

#[tokio::test]
async fn omits_organization_header_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("openai-organization"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = OpenAiChat::new(&config, &config.agent_api_key).unwrap();
    assert_eq!(client.chat(&conversation()).await.unwrap(), "ok");
}

#[tokio::test]
async fn error_status_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = OpenAiChat::new(&config, &config.agent_api_key).unwrap();
    let err = client.chat(&conversation()).await.unwrap_err();

    assert!(err.is_transport());
    match err {
        SkgcError::Api { code, message } => {
            assert_eq!(code, 503);
            assert!(message.contains("overloaded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rate_limited_request_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ontology")))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = OpenAiChat::new(&config, &config.agent_api_key).unwrap();
    assert_eq!(client.chat(&conversation()).await.unwrap(), "ontology");
}

#[tokio::test]
async fn persistent_rate_limit_gives_up_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = OpenAiChat::new(&config, &config.agent_api_key).unwrap();
    let err = client.chat(&conversation()).await.unwrap_err();

    assert!(matches!(err, SkgcError::RateLimited(0)));
    assert!(err.is_transport());
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn empty_choices_yield_empty_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = OpenAiChat::new(&config, &config.agent_api_key).unwrap();
    assert_eq!(client.chat(&conversation()).await.unwrap(), "");
    assert_eq!(client.usage().total_tokens, 0);
}

#[tokio::test]
async fn malformed_body_is_passed_on_as_empty_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = OpenAiChat::new(&config, &config.agent_api_key).unwrap();
    assert_eq!(client.chat(&conversation()).await.unwrap(), "");
}

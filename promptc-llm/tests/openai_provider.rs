use assert_matches::assert_matches;
use promptc_common::Example;
use promptc_core::{build_signature, EmbeddingService, LanguageModel, LmError, LmRequest};
use promptc_llm::OpenAiBuilder;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn joke_request() -> LmRequest {
    let signature = build_signature(&["topic"], &["joke"], "Tell a joke.", None, None).unwrap();
    LmRequest::new(Arc::new(signature), Example::new().with("topic", "cats"))
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}
        ]
    })
}

async fn provider(server: &MockServer) -> promptc_llm::OpenAiProvider {
    OpenAiBuilder::new()
        .model("gpt-4o-mini")
        .base_url(format!("{}/v1", server.uri()))
        .api_key("sk-test")
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_chat_completion_parsed_into_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "[[ ## joke ## ]]\nMy cat only laughs at purr-puns.\n\n[[ ## completed ## ]]",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let response = provider(&server).await.invoke(joke_request()).await.unwrap();
    assert_eq!(
        response.fields.get("joke").map(String::as_str),
        Some("My cat only laughs at purr-puns.")
    );
}

#[tokio::test]
async fn test_request_temperature_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"temperature": 1.5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("[[ ## joke ## ]]\nok")))
        .expect(1)
        .mount(&server)
        .await;

    let mut request = joke_request();
    request.temperature = Some(1.5);
    provider(&server).await.invoke(request).await.unwrap();
}

#[tokio::test]
async fn test_unauthorized_maps_to_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let result = provider(&server).await.invoke(joke_request()).await;
    assert_matches!(result, Err(LmError::Auth { ref reason }) if reason == "invalid api key");
}

#[tokio::test]
async fn test_rate_limit_and_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let provider = provider(&server).await;
    let first = provider.invoke(joke_request()).await;
    assert_matches!(first, Err(LmError::RateLimited { .. }));

    let second = provider.invoke(joke_request()).await;
    assert_matches!(second, Err(LmError::Http { status_code: 503, .. }));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("[[ ## joke ## ]]\nlate"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let result = provider(&server).await.invoke(joke_request()).await;
    assert_matches!(result, Err(LmError::Timeout { timeout_ms: 500 }));
}

#[tokio::test]
async fn test_missing_output_marker_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Just a joke, no markers.")))
        .mount(&server)
        .await;

    let result = provider(&server).await.invoke(joke_request()).await;
    assert_matches!(result, Err(LmError::InvalidResponse { .. }));
}

#[tokio::test]
async fn test_embeddings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({"input": "a cat joke"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": [0.25, -0.5, 1.0]}]
        })))
        .mount(&server)
        .await;

    let vector = provider(&server).await.embed("a cat joke").await.unwrap();
    assert_eq!(vector, vec![0.25, -0.5, 1.0]);
}

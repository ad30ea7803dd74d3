//! Compilation against an OpenAI-compatible endpoint served by wiremock.

use promptc_common::{MatchMode, ModuleKind};
use promptc_core::{CompileRequest, Compiler, ExactMatch, LanguageModel, ModelSet, PromptcConfig};
use promptc_llm::{CachedModel, OpenAiBuilder};
use promptc_tests::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers chat completions with the dataset joke for the requested topic.
struct JokeEndpoint;

impl JokeEndpoint {
    fn topic(body: &Value) -> Option<String> {
        let last = body["messages"].as_array()?.last()?["content"].as_str()?;
        let (_, rest) = last.split_once("[[ ## topic ## ]]\n")?;
        rest.lines().next().map(str::to_string)
    }
}

impl Respond for JokeEndpoint {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match request.body_json() {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let joke = Self::topic(&body)
            .and_then(|topic| JOKES.iter().find(|(t, _)| *t == topic).map(|(_, j)| *j))
            .unwrap_or("No idea.");
        let content = format!(
            "[[ ## reasoning ## ]]\nLook for wordplay.\n\n[[ ## joke ## ]]\n{}\n\n[[ ## completed ## ]]",
            joke
        );
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        }))
    }
}

async fn joke_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(JokeEndpoint)
        .mount(&server)
        .await;
    server
}

fn provider(server: &MockServer) -> promptc_llm::OpenAiProvider {
    OpenAiBuilder::new()
        .model("gpt-4o-mini")
        .base_url(format!("{}/v1", server.uri()))
        .api_key("sk-test")
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_chain_of_thought_compile_over_http() {
    setup_test_logging();
    let server = joke_server().await;
    let lm: Arc<dyn LanguageModel> = Arc::new(provider(&server));

    let compiler = Compiler::new(PromptcConfig::default());
    let request = CompileRequest::new(
        joke_signature(),
        Arc::new(ExactMatch::new(vec!["joke".to_string()], MatchMode::All)),
        ModelSet::single(lm),
    )
    .with_module(ModuleKind::ChainOfThought)
    .with_data(joke_dataset(), joke_dataset());
    let result = compiler.compile(request).await.unwrap();

    assert_eq!(result.baseline_score, 1.0);
    assert_eq!(result.evaluation_score, 1.0);
    let demos = &result.compiled_program.demos;
    assert_eq!(demos.len(), 3);
    assert!(demos
        .iter()
        .all(|d| d.reasoning.as_deref() == Some("Look for wordplay.")));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 9);
    // Final evaluation: system prompt, three demo pairs, then the question.
    let last: Value = requests[8].body_json().unwrap();
    assert_eq!(last["messages"].as_array().unwrap().len(), 8);
    assert_eq!(last["model"], "gpt-4o-mini");
}

#[tokio::test]
async fn test_cached_provider_skips_repeated_calls() {
    let server = joke_server().await;
    let cached = Arc::new(CachedModel::new(Arc::new(provider(&server))));

    let compiler = Compiler::new(PromptcConfig::default());
    let request = CompileRequest::new(
        joke_signature(),
        Arc::new(ExactMatch::new(vec!["joke".to_string()], MatchMode::All)),
        ModelSet::single(cached.clone()),
    )
    .with_data(joke_dataset(), joke_dataset());
    compiler.compile(request).await.unwrap();

    // Baseline and teacher runs send identical zero-shot requests.
    assert_eq!(server.received_requests().await.unwrap().len(), 6);
    assert_eq!(cached.hits(), 3);
}

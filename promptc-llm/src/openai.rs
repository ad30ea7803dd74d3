//! OpenAI-compatible chat completion and embedding client.

use crate::adapter::{ChatAdapter, ChatMessage};
use async_trait::async_trait;
use promptc_core::{
    ConfigError, CoreResult, EmbeddingService, LanguageModel, LmError, LmRequest, LmResponse,
    LmResult,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for any endpoint speaking the OpenAI chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: Url,
    model: String,
    embedding_model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    adapter: ChatAdapter,
}

impl OpenAiProvider {
    pub fn builder() -> OpenAiBuilder {
        OpenAiBuilder::new()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> LmResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| LmError::Network {
                reason: format!("invalid endpoint {}: {}", path, e),
            })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> LmResult<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.endpoint(path)?;
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        response.json::<R>().await.map_err(|e| {
            if e.is_timeout() {
                self.timeout_error()
            } else {
                LmError::InvalidResponse {
                    reason: format!("failed to decode response: {}", e),
                }
            }
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> LmError {
        if error.is_timeout() {
            self.timeout_error()
        } else {
            LmError::Network {
                reason: error.to_string(),
            }
        }
    }

    fn timeout_error(&self) -> LmError {
        LmError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

fn status_error(status: StatusCode, body: String) -> LmError {
    let reason = if body.is_empty() {
        status.canonical_reason().unwrap_or("unknown").to_string()
    } else {
        body
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LmError::Auth { reason },
        StatusCode::TOO_MANY_REQUESTS => LmError::RateLimited { reason },
        _ => LmError::Http {
            status_code: status.as_u16(),
            reason,
        },
    }
}

#[async_trait]
impl LanguageModel for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, request: LmRequest) -> LmResult<LmResponse> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: self.adapter.format(&request),
            temperature: request.temperature.unwrap_or(self.temperature),
            max_tokens: self.max_tokens,
        };

        let completion: ChatCompletionResponse = self.post("chat/completions", &body).await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LmError::InvalidResponse {
                reason: "completion has no message content".to_string(),
            })?;

        self.adapter
            .parse(&request, &content)
            .inspect_err(|e| warn!("Unparseable completion from {}: {}", self.model, e))
    }
}

#[async_trait]
impl EmbeddingService for OpenAiProvider {
    async fn embed(&self, text: &str) -> LmResult<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };
        let response: EmbeddingResponse = self.post("embeddings", &body).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LmError::InvalidResponse {
                reason: "embedding response has no data".to_string(),
            })
    }
}

/// Builder for [`OpenAiProvider`].
#[derive(Debug, Clone)]
pub struct OpenAiBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    embedding_model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: 1000,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> CoreResult<OpenAiProvider> {
        let model = self.model.ok_or_else(|| ConfigError::MissingParameter {
            parameter: "model".to_string(),
        })?;
        let raw_url = self.base_url.ok_or_else(|| ConfigError::MissingParameter {
            parameter: "base_url".to_string(),
        })?;

        // Url::join replaces the last segment unless the path ends in '/'.
        let with_slash = if raw_url.ends_with('/') {
            raw_url.clone()
        } else {
            format!("{}/", raw_url)
        };
        let base_url = Url::parse(&with_slash).map_err(|e| ConfigError::InvalidValue {
            parameter: "base_url".to_string(),
            value: raw_url.clone(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_| {
                ConfigError::InvalidValue {
                    parameter: "api_key".to_string(),
                    value: "<redacted>".to_string(),
                    reason: "invalid header characters".to_string(),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                parameter: "http_client".to_string(),
                value: raw_url,
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(OpenAiProvider {
            client,
            base_url,
            model,
            embedding_model: self.embedding_model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: self.timeout,
            adapter: ChatAdapter::new(),
        })
    }
}

impl Default for OpenAiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

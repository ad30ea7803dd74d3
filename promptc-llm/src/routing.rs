//! Model name to provider endpoint routing.

use crate::cache::CachedModel;
use crate::openai::{OpenAiBuilder, OpenAiProvider};
use promptc_core::config::LmConfig;
use promptc_core::{ConfigError, CoreResult, EmbeddingService, LanguageModel};
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub const GROQ_MODELS: &[&str] = &[
    "mixtral-8x7b-32768",
    "gemma-7b-it",
    "llama3-70b-8192",
    "llama3-8b-8192",
    "gemma2-9b-it",
];

pub const GOOGLE_MODELS: &[&str] = &["gemini-1.5-flash-8b", "gemini-1.5-flash", "gemini-1.5-pro"];

pub const DEEPSEEK_MODELS: &[&str] = &["deepseek-chat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Groq,
    Google,
    DeepSeek,
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderFamily::OpenAi => "openai",
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::Groq => "groq",
            ProviderFamily::Google => "google",
            ProviderFamily::DeepSeek => "deepseek",
        };
        f.write_str(name)
    }
}

/// Where requests for a model go and which variable holds the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRoute {
    pub family: ProviderFamily,
    pub base_url: String,
    pub api_key_env: &'static str,
}

impl ProviderRoute {
    /// Route `model` using the process environment for base URL overrides.
    pub fn for_model(model: &str) -> Result<Self, ConfigError> {
        Self::resolve(model, |name| std::env::var(name).ok())
    }

    /// Route `model`, reading overrides through `env`.
    ///
    /// `OPENAI_API_BASE` and `DEEPSEEK_API_BASE` replace the default base
    /// URL of their family.
    pub fn resolve(model: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let (family, default_base, base_env, api_key_env) = if model.starts_with("gpt-") {
            (
                ProviderFamily::OpenAi,
                "https://api.openai.com/v1",
                Some("OPENAI_API_BASE"),
                "OPENAI_API_KEY",
            )
        } else if model.starts_with("claude-") {
            (
                ProviderFamily::Anthropic,
                "https://api.anthropic.com/v1",
                None,
                "ANTHROPIC_API_KEY",
            )
        } else if GROQ_MODELS.contains(&model) {
            (
                ProviderFamily::Groq,
                "https://api.groq.com/openai/v1",
                None,
                "GROQ_API_KEY",
            )
        } else if GOOGLE_MODELS.contains(&model) {
            (
                ProviderFamily::Google,
                "https://generativelanguage.googleapis.com/v1beta/openai",
                None,
                "GOOGLE_API_KEY",
            )
        } else if model.starts_with("deepseek-") || DEEPSEEK_MODELS.contains(&model) {
            (
                ProviderFamily::DeepSeek,
                "https://api.deepseek.com/v1",
                Some("DEEPSEEK_API_BASE"),
                "DEEPSEEK_API_KEY",
            )
        } else {
            return Err(ConfigError::InvalidValue {
                parameter: "model".to_string(),
                value: model.to_string(),
                reason: "unsupported model".to_string(),
            });
        };

        let base_url = base_env
            .and_then(&env)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| default_base.to_string());

        Ok(Self {
            family,
            base_url,
            api_key_env,
        })
    }
}

fn provider(model: &str, config: &LmConfig) -> CoreResult<OpenAiProvider> {
    let route = ProviderRoute::for_model(model)?;
    let api_key = std::env::var(route.api_key_env).map_err(|_| ConfigError::MissingParameter {
        parameter: route.api_key_env.to_string(),
    })?;

    info!("Using {} model {} at {}", route.family, model, route.base_url);
    OpenAiBuilder::new()
        .model(model)
        .base_url(route.base_url)
        .api_key(api_key)
        .timeout(config.request_timeout)
        .build()
}

/// Build the language model named `model`, cached when the config says so.
pub fn build_model(model: &str, config: &LmConfig) -> CoreResult<Arc<dyn LanguageModel>> {
    let provider = provider(model, config)?;
    if config.cache_enabled {
        Ok(Arc::new(CachedModel::with_capacity(
            Arc::new(provider),
            config.cache_capacity,
        )))
    } else {
        Ok(Arc::new(provider))
    }
}

/// Embedding service for cosine similarity metrics.
pub fn build_embeddings(config: &LmConfig) -> CoreResult<Arc<dyn EmbeddingService>> {
    let model = if config.model.starts_with("gpt-") {
        config.model.as_str()
    } else {
        "gpt-4o-mini"
    };
    Ok(Arc::new(provider(model, config)?))
}

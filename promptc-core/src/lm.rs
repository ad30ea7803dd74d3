//! Language model and embedding abstractions.
//!
//! Providers live in `promptc-llm`; the core only depends on these traits.

use crate::error::LmResult;
use crate::signature::Signature;
use async_trait::async_trait;
use promptc_common::{Demonstration, Example, Prediction};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One structured call: render the signature with demos and inputs, get
/// back one value per output field.
#[derive(Debug, Clone, PartialEq)]
pub struct LmRequest {
    pub signature: Arc<Signature>,
    pub demos: Vec<Demonstration>,
    pub inputs: Example,
    pub hint: Option<String>,
    /// Ask for intermediate reasoning before the outputs
    pub reasoning: bool,
    pub temperature: Option<f32>,
}

impl LmRequest {
    pub fn new(signature: Arc<Signature>, inputs: Example) -> Self {
        Self {
            signature,
            demos: Vec::new(),
            inputs,
            hint: None,
            reasoning: false,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LmResponse {
    pub fields: BTreeMap<String, String>,
    pub reasoning: Option<String>,
}

impl LmResponse {
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn into_prediction(self) -> Prediction {
        let prediction = self
            .fields
            .into_iter()
            .fold(Prediction::new(), |p, (k, v)| p.with_field(k, v));
        match self.reasoning {
            Some(reasoning) => prediction.with_reasoning(reasoning),
            None => prediction,
        }
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for LmResponse {
    fn from(fields: [(K, V); N]) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            reasoning: None,
        }
    }
}

/// A chat-capable language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name used for logging and program ids.
    fn name(&self) -> &str;

    async fn invoke(&self, request: LmRequest) -> LmResult<LmResponse>;

    /// Whether concurrent calls on one instance are safe.
    fn is_concurrent(&self) -> bool {
        true
    }
}

/// Text embedding provider used by the cosine-similarity metric.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> LmResult<Vec<f32>>;
}

//! Prediction modules: a signature bound to a pipeline style and demos.

use crate::error::{LmError, LmResult};
use crate::lm::{LanguageModel, LmRequest};
use crate::signature::Signature;
use crate::store::ProgramArtifact;
use promptc_common::{Demonstration, Example, ModuleKind, Prediction};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A runnable module. Cloning is cheap apart from the demos.
#[derive(Debug, Clone, PartialEq)]
pub struct Predictor {
    kind: ModuleKind,
    signature: Arc<Signature>,
    demos: Vec<Demonstration>,
    hint: Option<String>,
    temperature: Option<f32>,
}

impl Predictor {
    pub fn new(kind: ModuleKind, signature: Signature) -> Self {
        Self {
            kind,
            signature: Arc::new(signature),
            demos: Vec::new(),
            hint: None,
            temperature: None,
        }
    }

    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_demos(mut self, demos: Vec<Demonstration>) -> Self {
        self.demos = demos;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Same module and demos with a different signature.
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Arc::new(signature);
        self
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn demos(&self) -> &[Demonstration] {
        &self.demos
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    fn request(&self, inputs: &Example) -> LmRequest {
        LmRequest {
            signature: Arc::clone(&self.signature),
            demos: self.demos.clone(),
            inputs: self.signature.inputs_of(inputs),
            hint: match self.kind {
                ModuleKind::ChainOfThoughtWithHint => self.hint.clone(),
                _ => None,
            },
            reasoning: self.kind.uses_reasoning(),
            temperature: self.temperature,
        }
    }

    /// Run the module once. Inputs not declared by the signature are dropped.
    ///
    /// A call that outlives `timeout` fails with [`LmError::Timeout`]; a
    /// response without every output field fails with
    /// [`LmError::InvalidResponse`].
    pub async fn forward(
        &self,
        lm: &dyn LanguageModel,
        inputs: &Example,
        timeout: Duration,
    ) -> LmResult<Prediction> {
        let request = self.request(inputs);
        debug!(
            "Invoking {} with {} ({} demos)",
            lm.name(),
            self.signature.display_string(),
            request.demos.len()
        );

        let response = tokio::time::timeout(timeout, lm.invoke(request))
            .await
            .map_err(|_| LmError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })??;

        if let Some(missing) = self
            .signature
            .output_names()
            .find(|name| !response.fields.contains_key(*name))
        {
            return Err(LmError::InvalidResponse {
                reason: format!("missing output field '{}'", missing),
            });
        }

        Ok(response.into_prediction())
    }

    pub fn to_artifact(&self) -> ProgramArtifact {
        ProgramArtifact {
            signature: (*self.signature).clone(),
            module: self.kind,
            hint: self.hint.clone(),
            demos: self.demos.clone(),
        }
    }

    pub fn from_artifact(artifact: ProgramArtifact) -> Self {
        Self::new(artifact.module, artifact.signature)
            .with_hint(artifact.hint)
            .with_demos(artifact.demos)
    }
}

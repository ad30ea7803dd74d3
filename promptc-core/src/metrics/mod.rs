//! Evaluation metrics.
//!
//! A metric scores one prediction against its gold example and returns a
//! value in `[0, 1]`. [`MetricFactory::create`] turns a [`MetricConfig`]
//! into a ready-to-use metric; for [`MetricKind::LlmJudge`] this loads and
//! builds the judge program once, up front.

pub mod cosine;
pub mod exact;
pub mod judge;

pub use cosine::{cosine, CosineSimilarity};
pub use exact::ExactMatch;
pub use judge::{load_judge_config, parse_score, JudgeConfig, JudgeMode, JudgeProgram};

use crate::error::{ConfigError, CoreResult, MetricError};
use crate::lm::{EmbeddingService, LanguageModel};
use crate::store::ProgramStore;
use async_trait::async_trait;
use promptc_common::{Example, MatchMode, MetricKind, Prediction};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Context handed to a metric while bootstrapping demonstrations.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub inputs: Example,
    pub demos_so_far: usize,
}

/// Scoring function `(gold, prediction, trace?) -> [0, 1]`.
#[async_trait]
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;

    async fn score(
        &self,
        gold: &Example,
        prediction: &Prediction,
        trace: Option<&Trace>,
    ) -> Result<f64, MetricError>;
}

impl fmt::Debug for dyn Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric").field("name", &self.name()).finish()
    }
}

/// Metric built from a plain function.
pub struct FnMetric<F> {
    name: String,
    score_fn: F,
}

impl<F> FnMetric<F>
where
    F: Fn(&Example, &Prediction) -> f64 + Send + Sync,
{
    pub fn new(name: impl Into<String>, score_fn: F) -> Self {
        Self {
            name: name.into(),
            score_fn,
        }
    }
}

#[async_trait]
impl<F> Metric for FnMetric<F>
where
    F: Fn(&Example, &Prediction) -> f64 + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(
        &self,
        gold: &Example,
        prediction: &Prediction,
        _trace: Option<&Trace>,
    ) -> Result<f64, MetricError> {
        Ok((self.score_fn)(gold, prediction))
    }
}

/// What metric to build. Constructed once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub kind: MetricKind,
    /// Output fields the metric compares
    pub output_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_config_id: Option<String>,
    /// Load the judge's compiled demos instead of running it zero-shot
    #[serde(default)]
    pub use_compiled_judge: bool,
    #[serde(default)]
    pub match_mode: MatchMode,
}

impl MetricConfig {
    pub fn new(kind: MetricKind, output_fields: Vec<String>) -> Self {
        Self {
            kind,
            output_fields,
            judge_config_id: None,
            use_compiled_judge: false,
            match_mode: MatchMode::All,
        }
    }

    pub fn exact_match(output_fields: Vec<String>) -> Self {
        Self::new(MetricKind::ExactMatch, output_fields)
    }

    pub fn llm_judge(output_fields: Vec<String>, judge_config_id: impl Into<String>) -> Self {
        Self {
            judge_config_id: Some(judge_config_id.into()),
            ..Self::new(MetricKind::LlmJudge, output_fields)
        }
    }

    pub fn with_compiled_judge(mut self) -> Self {
        self.use_compiled_judge = true;
        self
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }
}

/// Builds metrics from configuration.
///
/// Holds what the metric kinds may need: the program store for judge
/// configurations, the model the judge runs on and an embedding service.
#[derive(Clone)]
pub struct MetricFactory {
    store: Arc<dyn ProgramStore>,
    judge_lm: Option<Arc<dyn LanguageModel>>,
    embeddings: Option<Arc<dyn EmbeddingService>>,
    request_timeout: Duration,
}

impl MetricFactory {
    pub fn new(store: Arc<dyn ProgramStore>) -> Self {
        Self {
            store,
            judge_lm: None,
            embeddings: None,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_judge_lm(mut self, lm: Arc<dyn LanguageModel>) -> Self {
        self.judge_lm = Some(lm);
        self
    }

    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingService>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create the metric described by `config`.
    ///
    /// Fails with a configuration error when no output field is given, when
    /// a judge id or judge model is missing, or when the judge cannot be
    /// loaded. No language model is called here.
    pub async fn create(&self, config: &MetricConfig) -> CoreResult<Arc<dyn Metric>> {
        if config.output_fields.is_empty() {
            return Err(ConfigError::MissingParameter {
                parameter: "output_fields".to_string(),
            }
            .into());
        }

        let metric: Arc<dyn Metric> = match config.kind {
            MetricKind::ExactMatch => Arc::new(ExactMatch::new(
                config.output_fields.clone(),
                config.match_mode,
            )),
            MetricKind::CosineSimilarity => {
                let embeddings = self.embeddings.clone().ok_or_else(|| {
                    ConfigError::MissingParameter {
                        parameter: "embedding service".to_string(),
                    }
                })?;
                Arc::new(CosineSimilarity::new(config.output_fields.clone(), embeddings))
            }
            MetricKind::LlmJudge => {
                let id = config.judge_config_id.as_deref().ok_or_else(|| {
                    ConfigError::MissingParameter {
                        parameter: "judge_config_id".to_string(),
                    }
                })?;
                let lm = self.judge_lm.clone().ok_or_else(|| ConfigError::MissingParameter {
                    parameter: "judge language model".to_string(),
                })?;
                let judge = JudgeProgram::build(
                    self.store.as_ref(),
                    id,
                    config.use_compiled_judge,
                    lm,
                    self.request_timeout,
                )
                .await?;
                Arc::new(judge)
            }
        };

        info!("Created {} metric over {:?}", metric.name(), config.output_fields);
        Ok(metric)
    }
}

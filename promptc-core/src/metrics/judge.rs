//! LLM-as-a-judge metric.
//!
//! A judge is an ordinary stored program whose output is a score. It is
//! loaded and built once per [`MetricFactory::create`](super::MetricFactory::create)
//! call. By default it runs zero-shot, so it never needs compiling itself;
//! with `use_compiled_judge` its previously compiled demos are loaded.

use super::{Metric, Trace};
use crate::error::{JudgeError, MetricError};
use crate::lm::LanguageModel;
use crate::module::Predictor;
use crate::signature::Signature;
use crate::store::ProgramStore;
use async_trait::async_trait;
use promptc_common::{Demonstration, Example, ModuleKind, Prediction};
use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

static SCORE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn score_pattern() -> &'static Regex {
    SCORE_PATTERN.get_or_init(|| {
        Regex::new(r"[-+]?(\d+(\.\d*)?|\.\d+)([eE][-+]?\d+)?").expect("Invalid score regex")
    })
}

/// First decimal number in `text`, clamped to `[0, 1]`.
///
/// `"0.75, plausible"` gives `Some(0.75)`, `"8/10"` gives `Some(1.0)` and
/// text without digits gives `None`.
pub fn parse_score(text: &str) -> Option<f64> {
    let token = score_pattern().find(text)?;
    let value: f64 = token.as_str().parse().ok()?;
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

/// A loaded judge definition.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeConfig {
    pub id: String,
    pub signature: Signature,
    pub module: ModuleKind,
    pub hint: Option<String>,
    /// Output field holding the score
    pub score_field: String,
}

/// Load the judge stored under `id` and build its signature.
pub async fn load_judge_config(
    store: &dyn ProgramStore,
    id: &str,
) -> Result<JudgeConfig, JudgeError> {
    let record = store.load_record(id).await.map_err(|e| {
        if e.is_not_found() {
            JudgeError::ConfigNotFound { id: id.to_string() }
        } else {
            JudgeError::InvalidConfig {
                id: id.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    let signature = record
        .build_signature()
        .map_err(|e| JudgeError::InvalidConfig {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

    let score_field = match record.score_field {
        Some(field) if signature.is_output(&field) => field,
        Some(field) => {
            return Err(JudgeError::InvalidConfig {
                id: id.to_string(),
                reason: format!("score field '{}' is not an output field", field),
            })
        }
        None if signature.output_fields().len() == 1 => signature.output_fields()[0].name.clone(),
        None => {
            return Err(JudgeError::InvalidConfig {
                id: id.to_string(),
                reason: "several output fields and no score field".to_string(),
            })
        }
    };

    Ok(JudgeConfig {
        id: id.to_string(),
        signature,
        module: record.module,
        hint: record.hint,
        score_field,
    })
}

/// Whether the judge runs with compiled demonstrations.
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeMode {
    ZeroShot,
    Compiled { demos: Vec<Demonstration> },
}

/// Judge program owned by one metric instance.
pub struct JudgeProgram {
    config: JudgeConfig,
    predictor: Predictor,
    mode: JudgeMode,
    lm: Arc<dyn LanguageModel>,
    /// Serializes calls when the model is not safe for concurrent use
    gate: Option<Mutex<()>>,
    request_timeout: Duration,
}

impl fmt::Debug for JudgeProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JudgeProgram")
            .field("config", &self.config)
            .field("mode", &self.mode)
            .field("lm", &self.lm.name())
            .field("serialized", &self.gate.is_some())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl JudgeProgram {
    /// Load the judge configuration and, when requested, its compiled demos.
    ///
    /// A compiled judge without a stored artifact fails here. A zero-shot
    /// judge never reads the artifact.
    pub async fn build(
        store: &dyn ProgramStore,
        id: &str,
        use_compiled: bool,
        lm: Arc<dyn LanguageModel>,
        request_timeout: Duration,
    ) -> Result<Self, JudgeError> {
        let config = load_judge_config(store, id).await?;

        let mode = if use_compiled {
            let artifact = store.load_artifact(id).await.map_err(|e| {
                if e.is_not_found() {
                    JudgeError::ArtifactNotFound { id: id.to_string() }
                } else {
                    JudgeError::InvalidConfig {
                        id: id.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;
            JudgeMode::Compiled {
                demos: artifact.demos,
            }
        } else {
            JudgeMode::ZeroShot
        };

        let demos = match &mode {
            JudgeMode::ZeroShot => Vec::new(),
            JudgeMode::Compiled { demos } => demos.clone(),
        };
        let predictor = Predictor::new(config.module, config.signature.clone())
            .with_hint(config.hint.clone())
            .with_demos(demos);

        let gate = (!lm.is_concurrent()).then(|| Mutex::new(()));
        info!(
            "Built judge {} ({}, {})",
            id,
            config.signature.display_string(),
            match &mode {
                JudgeMode::ZeroShot => "zero-shot".to_string(),
                JudgeMode::Compiled { demos } => format!("compiled, {} demos", demos.len()),
            }
        );

        Ok(Self {
            config,
            predictor,
            mode,
            lm,
            gate,
            request_timeout,
        })
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    pub fn mode(&self) -> &JudgeMode {
        &self.mode
    }

    /// Judge inputs, each taken from the gold example or else the prediction.
    pub fn judge_inputs(
        &self,
        gold: &Example,
        prediction: &Prediction,
    ) -> Result<Example, JudgeError> {
        self.config
            .signature
            .input_names()
            .map(|field| {
                gold.get(field)
                    .or_else(|| prediction.get(field))
                    .map(|value| (field.to_string(), value.to_string()))
                    .ok_or_else(|| JudgeError::InputFieldMissing {
                        field: field.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|pairs| pairs.into_iter().collect())
    }

    /// Run the judge and parse its score.
    pub async fn judge(&self, gold: &Example, prediction: &Prediction) -> Result<f64, JudgeError> {
        let inputs = self.judge_inputs(gold, prediction)?;

        let verdict = match &self.gate {
            Some(gate) => {
                let _permit = gate.lock().await;
                self.predictor
                    .forward(self.lm.as_ref(), &inputs, self.request_timeout)
                    .await?
            }
            None => {
                self.predictor
                    .forward(self.lm.as_ref(), &inputs, self.request_timeout)
                    .await?
            }
        };

        let raw = verdict.get(&self.config.score_field).unwrap_or_default();
        let score = parse_score(raw).ok_or_else(|| JudgeError::ScoreParse {
            field: self.config.score_field.clone(),
            raw: raw.to_string(),
        })?;
        debug!("Judge {} scored {:.3} from {:?}", self.config.id, score, raw);
        Ok(score)
    }
}

#[async_trait]
impl Metric for JudgeProgram {
    fn name(&self) -> &str {
        "llm_judge"
    }

    async fn score(
        &self,
        gold: &Example,
        prediction: &Prediction,
        _trace: Option<&Trace>,
    ) -> Result<f64, MetricError> {
        Ok(self.judge(gold, prediction).await?)
    }
}

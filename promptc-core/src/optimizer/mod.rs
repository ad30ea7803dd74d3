//! Search strategies that turn a zero-shot predictor into a compiled one.
//!
//! Every strategy reads the metric through `&dyn Metric` and calls it once
//! per candidate example per search step. For a fixed seed and a
//! deterministic metric and model the search is deterministic.

pub mod bootstrap;
pub mod instruction;
pub mod mipro;
pub mod random_search;

pub use bootstrap::BootstrapFewShot;
pub use instruction::InstructionSearch;
pub use mipro::MiproV2;
pub use random_search::BootstrapFewShotWithRandomSearch;

use crate::config::OptimizerConfig;
use crate::error::CoreResult;
use crate::evaluate::Evaluator;
use crate::lm::LanguageModel;
use crate::metrics::Metric;
use crate::module::Predictor;
use async_trait::async_trait;
use promptc_common::{Example, OptimizerKind};
use serde::{Deserialize, Serialize};

/// Everything a strategy may use during one compilation run.
pub struct OptimizeContext<'a> {
    /// Zero-shot predictor to improve
    pub student: &'a Predictor,
    pub train: &'a [Example],
    pub validation: &'a [Example],
    pub metric: &'a dyn Metric,
    pub task_lm: &'a dyn LanguageModel,
    /// Model used to bootstrap demos and propose instructions
    pub teacher_lm: &'a dyn LanguageModel,
    pub evaluator: &'a Evaluator,
}

/// One candidate considered during search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub label: String,
    pub demos: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Metric value for a single bootstrapped example, or the mean over the
    /// search set for a whole candidate program
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub selected: bool,
}

/// Result of a search: the compiled predictor plus what was tried.
#[derive(Debug, Clone)]
pub struct OptimizedProgram {
    pub predictor: Predictor,
    pub trace: Vec<CandidateRecord>,
}

#[async_trait]
pub trait Optimizer: Send + Sync {
    fn kind(&self) -> OptimizerKind;

    async fn optimize(&self, ctx: &OptimizeContext<'_>) -> CoreResult<OptimizedProgram>;
}

/// Strategy for `kind`, parameterized from configuration.
pub fn optimizer_for(kind: OptimizerKind, config: &OptimizerConfig) -> Box<dyn Optimizer> {
    match kind {
        OptimizerKind::BootstrapFewShot => Box::new(BootstrapFewShot::new(config.bootstrap.clone())),
        OptimizerKind::BootstrapFewShotWithRandomSearch => Box::new(
            BootstrapFewShotWithRandomSearch::new(
                config.bootstrap.clone(),
                config.random_search.clone(),
            ),
        ),
        OptimizerKind::InstructionSearch => {
            Box::new(InstructionSearch::new(config.instruction.clone()))
        }
        OptimizerKind::MiproV2 => Box::new(MiproV2::new(
            config.mipro.clone(),
            config.bootstrap.metric_threshold,
        )),
    }
}

/// Index of the highest score; ties go to the earlier entry.
pub(crate) fn best_index(scores: &[f64]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &score)| match best {
            Some((_, top)) if score <= top => best,
            _ => Some((i, score)),
        })
        .map(|(i, _)| i)
}

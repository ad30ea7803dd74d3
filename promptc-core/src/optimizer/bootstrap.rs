use super::{CandidateRecord, OptimizeContext, OptimizedProgram, Optimizer};
use crate::config::BootstrapConfig;
use crate::error::{CoreError, CoreResult, Stage};
use crate::metrics::Trace;
use async_trait::async_trait;
use promptc_common::{Demonstration, OptimizerKind};
use tracing::{debug, info};

/// Few-shot bootstrapping.
///
/// The teacher model runs the zero-shot student on each training example
/// in order. A trace whose metric score is strictly above the threshold
/// becomes an augmented demonstration. Search stops once the demo budget
/// is filled.
#[derive(Debug, Clone)]
pub struct BootstrapFewShot {
    config: BootstrapConfig,
}

/// Demos retained by one bootstrap pass plus one record per visited example.
pub(crate) struct BootstrapOutcome {
    pub demos: Vec<Demonstration>,
    pub trace: Vec<CandidateRecord>,
}

impl BootstrapFewShot {
    pub fn new(config: BootstrapConfig) -> Self {
        Self { config }
    }

    /// Visit training examples in `order` until `budget` demos are kept.
    pub(crate) async fn bootstrap(
        &self,
        ctx: &OptimizeContext<'_>,
        order: &[usize],
        budget: usize,
    ) -> CoreResult<BootstrapOutcome> {
        let mut demos = Vec::new();
        let mut trace = Vec::new();
        let timeout = ctx.evaluator.request_timeout();
        let signature = ctx.student.signature();
        let teacher = ctx.student.clone().with_demos(Vec::new());

        for &index in order {
            if demos.len() >= budget {
                break;
            }
            if ctx.evaluator.cancellation().is_cancelled() {
                return Err(CoreError::cancelled(Stage::Optimization, Some(index)));
            }

            let example = &ctx.train[index];
            let inputs = signature.inputs_of(example);
            let label = format!("bootstrap example {}", index);

            let prediction = match teacher.forward(ctx.teacher_lm, &inputs, timeout).await {
                Ok(prediction) => prediction,
                Err(err) if err.is_systemic() => return Err(err.into()),
                Err(err) => {
                    debug!("Teacher failed on example {}: {}", index, err);
                    trace.push(CandidateRecord {
                        label,
                        demos: demos.len(),
                        instructions: None,
                        score: None,
                        selected: false,
                    });
                    continue;
                }
            };

            let step = Trace {
                inputs: inputs.clone(),
                demos_so_far: demos.len(),
            };
            let score = match ctx.metric.score(example, &prediction, Some(&step)).await {
                Ok(score) => Some(score),
                Err(err) if err.is_systemic() => return Err(err.into()),
                Err(err) => {
                    debug!("Metric failed on example {}: {}", index, err);
                    None
                }
            };

            let keep = score.is_some_and(|s| s > self.config.metric_threshold);
            if keep {
                demos.push(Demonstration::augmented(inputs, &prediction));
            }
            trace.push(CandidateRecord {
                label,
                demos: demos.len(),
                instructions: None,
                score,
                selected: keep,
            });
        }

        Ok(BootstrapOutcome { demos, trace })
    }
}

#[async_trait]
impl Optimizer for BootstrapFewShot {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::BootstrapFewShot
    }

    async fn optimize(&self, ctx: &OptimizeContext<'_>) -> CoreResult<OptimizedProgram> {
        let order: Vec<usize> = (0..ctx.train.len()).collect();
        let outcome = self
            .bootstrap(ctx, &order, self.config.max_bootstrapped_demos)
            .await?;

        info!(
            "Bootstrapped {} demos from {} training examples",
            outcome.demos.len(),
            outcome.trace.len()
        );
        Ok(OptimizedProgram {
            predictor: ctx.student.clone().with_demos(outcome.demos),
            trace: outcome.trace,
        })
    }
}

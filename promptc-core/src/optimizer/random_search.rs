use super::bootstrap::BootstrapFewShot;
use super::{best_index, CandidateRecord, OptimizeContext, OptimizedProgram, Optimizer};
use crate::config::{BootstrapConfig, RandomSearchConfig};
use crate::error::{CoreError, CoreResult, Stage};
use crate::module::Predictor;
use async_trait::async_trait;
use promptc_common::{Demonstration, OptimizerKind};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Bootstrap several candidate programs and keep the one that scores best on
/// the validation set.
///
/// Candidates, in order: zero-shot, labeled demos only, an unshuffled
/// bootstrap, then `num_candidate_programs` bootstraps over shuffled
/// training data with a random demo budget. Candidate `i` draws from an RNG
/// seeded with `seed + i`.
#[derive(Debug, Clone)]
pub struct BootstrapFewShotWithRandomSearch {
    bootstrap: BootstrapFewShot,
    config: BootstrapConfig,
    search: RandomSearchConfig,
}

impl BootstrapFewShotWithRandomSearch {
    pub fn new(config: BootstrapConfig, search: RandomSearchConfig) -> Self {
        Self {
            bootstrap: BootstrapFewShot::new(config.clone()),
            config,
            search,
        }
    }

    fn labeled_demos(&self, ctx: &OptimizeContext<'_>) -> Vec<Demonstration> {
        let signature = ctx.student.signature();
        ctx.train
            .iter()
            .take(self.config.max_labeled_demos)
            .map(|example| {
                Demonstration::labeled(signature.inputs_of(example), signature.outputs_of(example))
            })
            .collect()
    }

    pub(crate) async fn candidate(
        &self,
        ctx: &OptimizeContext<'_>,
        position: usize,
    ) -> CoreResult<(String, Vec<Demonstration>)> {
        let in_order: Vec<usize> = (0..ctx.train.len()).collect();
        let max_demos = self.config.max_bootstrapped_demos;

        match position {
            0 => Ok(("zero-shot".to_string(), Vec::new())),
            1 => Ok(("labeled".to_string(), self.labeled_demos(ctx))),
            2 => {
                let outcome = self.bootstrap.bootstrap(ctx, &in_order, max_demos).await?;
                Ok(("bootstrap".to_string(), outcome.demos))
            }
            _ => {
                let draw = (position - 3) as u64;
                let mut rng = StdRng::seed_from_u64(self.search.seed.wrapping_add(draw));
                let mut order = in_order;
                order.shuffle(&mut rng);
                let budget = rng.gen_range(1..=max_demos.max(1));
                let outcome = self.bootstrap.bootstrap(ctx, &order, budget).await?;
                Ok((format!("shuffled bootstrap {}", draw), outcome.demos))
            }
        }
    }
}

#[async_trait]
impl Optimizer for BootstrapFewShotWithRandomSearch {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::BootstrapFewShotWithRandomSearch
    }

    async fn optimize(&self, ctx: &OptimizeContext<'_>) -> CoreResult<OptimizedProgram> {
        let total = 3 + self.search.num_candidate_programs;
        let mut candidates: Vec<Predictor> = Vec::with_capacity(total);
        let mut trace = Vec::with_capacity(total);
        let mut scores = Vec::with_capacity(total);

        for position in 0..total {
            if ctx.evaluator.cancellation().is_cancelled() {
                return Err(CoreError::cancelled(Stage::Optimization, None));
            }

            let (label, demos) = self.candidate(ctx, position).await?;
            let predictor = ctx.student.clone().with_demos(demos);
            let report = ctx
                .evaluator
                .evaluate(
                    &predictor,
                    ctx.task_lm,
                    ctx.validation,
                    ctx.metric,
                    Stage::Optimization,
                )
                .await?;

            debug!(
                "Candidate {} ({} demos) scored {:.4}",
                label,
                predictor.demos().len(),
                report.mean
            );
            trace.push(CandidateRecord {
                label,
                demos: predictor.demos().len(),
                instructions: None,
                score: Some(report.mean),
                selected: false,
            });
            scores.push(report.mean);
            candidates.push(predictor);
        }

        let best = best_index(&scores).unwrap_or(0);
        trace[best].selected = true;
        info!(
            "Selected {} out of {} candidates with score {:.4}",
            trace[best].label, total, scores[best]
        );

        Ok(OptimizedProgram {
            predictor: candidates.swap_remove(best),
            trace,
        })
    }
}

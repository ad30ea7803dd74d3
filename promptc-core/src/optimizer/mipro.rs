use super::instruction::InstructionSearch;
use super::random_search::BootstrapFewShotWithRandomSearch;
use super::{best_index, CandidateRecord, OptimizeContext, OptimizedProgram, Optimizer};
use crate::config::{BootstrapConfig, InstructionSearchConfig, MiproConfig, RandomSearchConfig};
use crate::error::{CoreError, CoreResult, Stage};
use crate::module::Predictor;
use async_trait::async_trait;
use promptc_common::{Demonstration, OptimizerKind};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

/// Joint search over instructions and demonstration sets.
///
/// Builds `num_candidates` instructions (the current one plus teacher
/// proposals) and `num_candidates` demo sets (the same sequence the random
/// search uses), then scores up to `num_batches` pairs on the validation
/// set. The first trial is always the unchanged zero-shot program; the rest
/// are drawn without repetition from an RNG seeded with `seed`.
#[derive(Debug, Clone)]
pub struct MiproV2 {
    config: MiproConfig,
    demo_search: BootstrapFewShotWithRandomSearch,
    proposer: InstructionSearch,
}

impl MiproV2 {
    pub fn new(config: MiproConfig, metric_threshold: f64) -> Self {
        let demo_search = BootstrapFewShotWithRandomSearch::new(
            BootstrapConfig {
                max_bootstrapped_demos: config.max_bootstrapped_demos,
                max_labeled_demos: config.max_labeled_demos,
                metric_threshold,
            },
            RandomSearchConfig {
                num_candidate_programs: config.num_candidates.saturating_sub(3),
                seed: config.seed,
            },
        );
        let proposer = InstructionSearch::new(InstructionSearchConfig {
            breadth: config.num_candidates,
            depth: 1,
            init_temperature: config.init_temperature,
        });
        Self {
            config,
            demo_search,
            proposer,
        }
    }

    async fn instruction_candidates(&self, ctx: &OptimizeContext<'_>) -> CoreResult<Vec<String>> {
        let original = ctx.student.signature().instructions().to_string();
        let mut candidates = vec![original.clone()];
        for proposal in self.proposer.propose(ctx, 0, original).await? {
            if !candidates.contains(&proposal) {
                candidates.push(proposal);
            }
        }
        Ok(candidates)
    }

    async fn demo_candidates(
        &self,
        ctx: &OptimizeContext<'_>,
    ) -> CoreResult<Vec<(String, Vec<Demonstration>)>> {
        let mut candidates = Vec::with_capacity(self.config.num_candidates);
        for position in 0..self.config.num_candidates {
            if ctx.evaluator.cancellation().is_cancelled() {
                return Err(CoreError::cancelled(Stage::Optimization, None));
            }
            candidates.push(self.demo_search.candidate(ctx, position).await?);
        }
        Ok(candidates)
    }

    /// `(instruction, demo set)` pairs in trial order.
    fn trials(&self, instructions: usize, demo_sets: usize) -> Vec<(usize, usize)> {
        let mut rest: Vec<(usize, usize)> = (0..instructions)
            .flat_map(|i| (0..demo_sets).map(move |d| (i, d)))
            .skip(1)
            .collect();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        rest.shuffle(&mut rng);

        let mut trials = vec![(0, 0)];
        trials.extend(rest);
        trials.truncate(self.config.num_batches);
        trials
    }
}

#[async_trait]
impl Optimizer for MiproV2 {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::MiproV2
    }

    async fn optimize(&self, ctx: &OptimizeContext<'_>) -> CoreResult<OptimizedProgram> {
        if ctx.evaluator.cancellation().is_cancelled() {
            return Err(CoreError::cancelled(Stage::Optimization, None));
        }

        let instructions = self.instruction_candidates(ctx).await?;
        let demo_sets = self.demo_candidates(ctx).await?;
        let trials = self.trials(instructions.len(), demo_sets.len());
        debug!(
            "{} instructions x {} demo sets, {} trials",
            instructions.len(),
            demo_sets.len(),
            trials.len()
        );

        let mut candidates: Vec<Predictor> = Vec::with_capacity(trials.len());
        let mut trace = Vec::with_capacity(trials.len());
        let mut scores = Vec::with_capacity(trials.len());

        for (instruction, demo_set) in trials {
            if ctx.evaluator.cancellation().is_cancelled() {
                return Err(CoreError::cancelled(Stage::Optimization, None));
            }

            let (demo_label, demos) = &demo_sets[demo_set];
            let text = &instructions[instruction];
            let predictor = ctx
                .student
                .clone()
                .with_signature(ctx.student.signature().with_instructions(text.clone()))
                .with_demos(demos.clone());
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

            let label = format!("instruction {} with {}", instruction, demo_label);
            debug!("Trial {} scored {:.4}", label, report.mean);
            trace.push(CandidateRecord {
                label,
                demos: demos.len(),
                instructions: Some(text.clone()),
                score: Some(report.mean),
                selected: false,
            });
            scores.push(report.mean);
            candidates.push(predictor);
        }

        let best = best_index(&scores).unwrap_or(0);
        trace[best].selected = true;
        info!(
            "Selected {} out of {} trials with score {:.4}",
            trace[best].label,
            trace.len(),
            scores[best]
        );

        Ok(OptimizedProgram {
            predictor: candidates.swap_remove(best),
            trace,
        })
    }
}

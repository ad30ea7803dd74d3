use super::{best_index, CandidateRecord, OptimizeContext, OptimizedProgram, Optimizer};
use crate::config::InstructionSearchConfig;
use crate::error::{CoreError, CoreResult, Stage};
use crate::module::Predictor;
use crate::signature::build_signature;
use async_trait::async_trait;
use promptc_common::{Example, ModuleKind, OptimizerKind};
use std::fmt::Write as _;
use tracing::{debug, info};

const PROPOSE_INSTRUCTIONS: &str = "You are an instruction optimizer for large language models. \
I will give you the instruction of a task. Propose an improved instruction that will lead a \
good language model to perform the task even better. Be creative.";

const REFINE_INSTRUCTIONS: &str = "You are an instruction optimizer for large language models. \
I will give you some task instructions I've tried, along with their corresponding validation \
scores. The instructions are arranged in increasing order based on their scores, where higher \
scores indicate better quality. Propose a new instruction that will lead a good language model \
to perform the task even better. Be creative.";

/// Search over the predictor's instructions.
///
/// The teacher model proposes rewrites at `init_temperature`. The first
/// round rewrites the current instruction; later rounds see the attempts so
/// far with their scores. Each distinct instruction is scored once on the
/// training set. Demonstrations of the student are kept as they are.
#[derive(Debug, Clone)]
pub struct InstructionSearch {
    config: InstructionSearchConfig,
}

struct Attempt {
    instructions: String,
    score: f64,
}

impl InstructionSearch {
    pub fn new(config: InstructionSearchConfig) -> Self {
        Self { config }
    }

    fn proposer(&self, round: usize) -> CoreResult<(Predictor, &'static str)> {
        let (input, instructions) = if round == 0 {
            ("basic_instruction", PROPOSE_INSTRUCTIONS)
        } else {
            ("attempted_instructions", REFINE_INSTRUCTIONS)
        };
        let signature = build_signature(&[input], &["proposed_instruction"], instructions, None, None)?;
        let predictor = Predictor::new(ModuleKind::Predict, signature)
            .with_temperature(self.config.init_temperature);
        Ok((predictor, input))
    }

    pub(crate) async fn propose(
        &self,
        ctx: &OptimizeContext<'_>,
        round: usize,
        prompt: String,
    ) -> CoreResult<Vec<String>> {
        let (proposer, input) = self.proposer(round)?;
        let inputs = Example::new().with(input, prompt);
        let mut proposals = Vec::new();

        for _ in 1..self.config.breadth {
            if ctx.evaluator.cancellation().is_cancelled() {
                return Err(CoreError::cancelled(Stage::Optimization, None));
            }
            match proposer
                .forward(ctx.teacher_lm, &inputs, ctx.evaluator.request_timeout())
                .await
            {
                Ok(prediction) => {
                    let text = prediction
                        .get("proposed_instruction")
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                    if !text.is_empty() {
                        proposals.push(text);
                    }
                }
                Err(err) if err.is_systemic() => return Err(err.into()),
                Err(err) => debug!("Instruction proposal failed: {}", err),
            }
        }
        Ok(proposals)
    }
}

/// Attempts from worst to best, as the refinement prompt expects.
fn render_attempts(attempts: &[Attempt]) -> String {
    let mut ranked: Vec<&Attempt> = attempts.iter().collect();
    ranked.sort_by(|a, b| a.score.total_cmp(&b.score));

    let mut rendered = String::new();
    for (i, attempt) in ranked.iter().enumerate() {
        let _ = writeln!(rendered, "Instruction #{}: {}", i + 1, attempt.instructions);
        let _ = writeln!(rendered, "Resolution #{}: {:.4}", i + 1, attempt.score);
    }
    rendered
}

#[async_trait]
impl Optimizer for InstructionSearch {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::InstructionSearch
    }

    async fn optimize(&self, ctx: &OptimizeContext<'_>) -> CoreResult<OptimizedProgram> {
        let original = ctx.student.signature().instructions().to_string();
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut trace = Vec::new();

        for round in 0..self.config.depth {
            let mut candidates = Vec::new();
            if round == 0 {
                candidates.push(original.clone());
                candidates.extend(self.propose(ctx, round, original.clone()).await?);
            } else {
                candidates.extend(self.propose(ctx, round, render_attempts(&attempts)).await?);
            }

            for instructions in candidates {
                if attempts.iter().any(|a| a.instructions == instructions) {
                    continue;
                }
                let predictor = ctx
                    .student
                    .clone()
                    .with_signature(ctx.student.signature().with_instructions(instructions.clone()));
                let report = ctx
                    .evaluator
                    .evaluate(&predictor, ctx.task_lm, ctx.train, ctx.metric, Stage::Optimization)
                    .await?;

                debug!("Round {} instruction scored {:.4}", round, report.mean);
                trace.push(CandidateRecord {
                    label: format!("round {} candidate {}", round, attempts.len()),
                    demos: predictor.demos().len(),
                    instructions: Some(instructions.clone()),
                    score: Some(report.mean),
                    selected: false,
                });
                attempts.push(Attempt {
                    instructions,
                    score: report.mean,
                });
            }
        }

        let scores: Vec<f64> = attempts.iter().map(|a| a.score).collect();
        let predictor = match best_index(&scores) {
            Some(best) => {
                trace[best].selected = true;
                info!(
                    "Selected instruction with score {:.4} out of {} attempts",
                    scores[best],
                    attempts.len()
                );
                ctx.student.clone().with_signature(
                    ctx.student
                        .signature()
                        .with_instructions(attempts[best].instructions.clone()),
                )
            }
            None => ctx.student.clone(),
        };

        Ok(OptimizedProgram { predictor, trace })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::Evaluator;
    use crate::lm::LmResponse;
    use crate::metrics::ExactMatch;
    use crate::testing::ScriptedModel;
    use promptc_common::{Demonstration, MatchMode};
    use std::time::Duration;

    fn student() -> Predictor {
        Predictor::new(
            ModuleKind::Predict,
            build_signature(&["text"], &["label"], "Classify.", None, None).unwrap(),
        )
        .with_demos(vec![Demonstration::labeled(
            Example::new().with("text", "great"),
            Example::new().with("label", "positive"),
        )])
    }

    fn data() -> Vec<Example> {
        vec![
            Example::new().with("text", "lovely").with("label", "positive"),
            Example::new().with("text", "awful").with("label", "negative"),
        ]
    }

    // Only the sentiment instruction makes the task model answer correctly.
    fn task_model() -> ScriptedModel {
        ScriptedModel::new("task").respond_with(|request| {
            let text = request.inputs.get("text").unwrap_or_default();
            let label = if request.signature.instructions().contains("sentiment") && text == "awful"
            {
                "negative"
            } else {
                "positive"
            };
            [("label", label)].into()
        })
    }

    fn config(breadth: usize, depth: usize) -> InstructionSearchConfig {
        InstructionSearchConfig {
            breadth,
            depth,
            ..InstructionSearchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_picks_better_instruction_and_keeps_demos() {
        let task = task_model();
        let teacher = ScriptedModel::new("teacher").respond_with(|request| {
            if request.signature.is_input("basic_instruction") {
                [("proposed_instruction", "Classify the sentiment of the text.")].into()
            } else {
                [("proposed_instruction", "Label it.")].into()
            }
        });
        let metric = ExactMatch::new(vec!["label".to_string()], MatchMode::All);
        let evaluator = Evaluator::new(1, Duration::from_secs(1));
        let student = student();
        let data = data();
        let ctx = OptimizeContext {
            student: &student,
            train: &data,
            validation: &data,
            metric: &metric,
            task_lm: &task,
            teacher_lm: &teacher,
            evaluator: &evaluator,
        };

        let program = InstructionSearch::new(config(3, 2)).optimize(&ctx).await.unwrap();

        assert_eq!(
            program.predictor.signature().instructions(),
            "Classify the sentiment of the text."
        );
        assert_eq!(program.predictor.demos(), student.demos());
        // original, one deduplicated proposal, one refinement
        assert_eq!(program.trace.len(), 3);
        assert_eq!(program.trace.iter().filter(|c| c.selected).count(), 1);
        assert!(program.trace[1].selected);
        assert_eq!(teacher.call_count(), 4);
        assert!(teacher
            .requests()
            .iter()
            .all(|r| r.temperature == Some(1.4)));
    }

    #[tokio::test]
    async fn test_refinement_sees_scored_attempts() {
        let task = task_model();
        let teacher = ScriptedModel::new("teacher").respond_with(|_| {
            LmResponse::default().with_field("proposed_instruction", "Guess.")
        });
        let metric = ExactMatch::new(vec!["label".to_string()], MatchMode::All);
        let evaluator = Evaluator::new(1, Duration::from_secs(1));
        let student = student();
        let data = data();
        let ctx = OptimizeContext {
            student: &student,
            train: &data,
            validation: &data,
            metric: &metric,
            task_lm: &task,
            teacher_lm: &teacher,
            evaluator: &evaluator,
        };

        InstructionSearch::new(config(2, 2)).optimize(&ctx).await.unwrap();

        let requests = teacher.requests();
        let attempted = requests[1].inputs.get("attempted_instructions").unwrap();
        assert!(attempted.contains("Instruction #1: Classify."));
        assert!(attempted.contains("Resolution #1: 0.5000"));
    }

    #[tokio::test]
    async fn test_keeps_original_when_nothing_improves() {
        let task = task_model();
        let teacher = ScriptedModel::new("teacher")
            .respond_with(|_| [("proposed_instruction", "Say positive.")].into());
        let metric = ExactMatch::new(vec!["label".to_string()], MatchMode::All);
        let evaluator = Evaluator::new(1, Duration::from_secs(1));
        let student = student();
        let data = data();
        let ctx = OptimizeContext {
            student: &student,
            train: &data,
            validation: &data,
            metric: &metric,
            task_lm: &task,
            teacher_lm: &teacher,
            evaluator: &evaluator,
        };

        let program = InstructionSearch::new(config(2, 1)).optimize(&ctx).await.unwrap();
        assert_eq!(program.predictor.signature().instructions(), "Classify.");
        assert!(program.trace[0].selected);
    }
}

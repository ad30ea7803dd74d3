//! The compilation loop.
//!
//! A [`Compiler`] validates the datasets, scores the zero-shot predictor,
//! runs the configured optimizer, scores the compiled predictor and reports
//! both. Parameters and metrics go to the experiment logger after the
//! baseline and after the final evaluation; logging never fails a run.

use crate::config::PromptcConfig;
use crate::error::{CoreError, CoreResult, Stage};
use crate::evaluate::{EvaluationReport, Evaluator, ExampleResult};
use crate::lm::LanguageModel;
use crate::metrics::Metric;
use crate::module::Predictor;
use crate::optimizer::{optimizer_for, CandidateRecord, OptimizeContext};
use crate::signature::Signature;
use crate::store::{ProgramArtifact, ProgramRecord};
use crate::tracking::{ExperimentLogger, Tracker};
use promptc_common::{dataset_fingerprint, Example, ModuleKind, OptimizerKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Where a compiler is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileState {
    Idle,
    BaselineEvaluating,
    Optimizing,
    FinalEvaluating,
    Done,
    Failed,
}

impl CompileState {
    fn is_running(self) -> bool {
        matches!(
            self,
            CompileState::BaselineEvaluating | CompileState::Optimizing | CompileState::FinalEvaluating
        )
    }
}

/// Task model plus the teacher used for bootstrapping and proposals.
#[derive(Clone)]
pub struct ModelSet {
    pub task: Arc<dyn LanguageModel>,
    pub teacher: Arc<dyn LanguageModel>,
}

impl ModelSet {
    pub fn new(task: Arc<dyn LanguageModel>, teacher: Arc<dyn LanguageModel>) -> Self {
        Self { task, teacher }
    }

    /// Use one model for both roles.
    pub fn single(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            teacher: Arc::clone(&model),
            task: model,
        }
    }
}

/// Input to [`Compiler::compile`].
#[derive(Clone)]
pub struct CompileRequest {
    pub signature: Signature,
    pub module: ModuleKind,
    pub hint: Option<String>,
    pub optimizer: OptimizerKind,
    pub train: Vec<Example>,
    pub validation: Vec<Example>,
    pub metric: Arc<dyn Metric>,
    pub models: ModelSet,
}

impl CompileRequest {
    pub fn new(signature: Signature, metric: Arc<dyn Metric>, models: ModelSet) -> Self {
        Self {
            signature,
            module: ModuleKind::default(),
            hint: None,
            optimizer: OptimizerKind::BootstrapFewShot,
            train: Vec::new(),
            validation: Vec::new(),
            metric,
            models,
        }
    }

    pub fn with_module(mut self, module: ModuleKind) -> Self {
        self.module = module;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_data(mut self, train: Vec<Example>, validation: Vec<Example>) -> Self {
        self.train = train;
        self.validation = validation;
        self
    }
}

/// Relative change from baseline to final score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ScoreImprovement {
    Relative(f64),
    /// Baseline was zero
    Undefined,
}

impl ScoreImprovement {
    pub fn compute(baseline: f64, evaluation: f64) -> Self {
        if baseline == 0.0 {
            ScoreImprovement::Undefined
        } else {
            ScoreImprovement::Relative((evaluation - baseline) / baseline)
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScoreImprovement::Relative(value) => Some(*value),
            ScoreImprovement::Undefined => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    #[serde(with = "humantime_serde")]
    pub baseline: Duration,
    #[serde(with = "humantime_serde")]
    pub optimization: Duration,
    #[serde(with = "humantime_serde")]
    pub final_evaluation: Duration,
}

/// Output of a successful compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationResult {
    pub compiled_program: ProgramArtifact,
    pub baseline_score: f64,
    pub evaluation_score: f64,
    pub score_improvement: ScoreImprovement,
    /// Final evaluation, one entry per validation example in input order
    pub per_example_results: Vec<ExampleResult>,
    pub baseline_results: Vec<ExampleResult>,
    pub optimizer_trace: Vec<CandidateRecord>,
    pub dataset_fingerprint: String,
    pub timings: StageTimings,
}

impl CompilationResult {
    /// Record describing the compiled program, ready to be stored.
    pub fn record(
        &self,
        id: impl Into<String>,
        optimizer: OptimizerKind,
        task_model: &str,
        teacher_model: &str,
    ) -> ProgramRecord {
        let mut record = ProgramRecord::new(
            id,
            &self.compiled_program.signature,
            self.compiled_program.module,
        );
        record.hint = self.compiled_program.hint.clone();
        record.llm_model = task_model.to_string();
        record.teacher_model = teacher_model.to_string();
        record.optimizer = Some(optimizer);
        record.baseline_score = Some(self.baseline_score);
        record.evaluation_score = Some(self.evaluation_score);
        record.dataset_fingerprint = Some(self.dataset_fingerprint.clone());
        record
    }
}

/// Runs compilations one at a time.
pub struct Compiler {
    config: PromptcConfig,
    tracker: Tracker,
    state: RwLock<CompileState>,
    cancel: CancellationToken,
}

impl Compiler {
    pub fn new(config: PromptcConfig) -> Self {
        Self {
            config,
            tracker: Tracker::noop(),
            state: RwLock::new(CompileState::Idle),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn ExperimentLogger>) -> Self {
        self.tracker = Tracker::new(logger);
        self
    }

    pub fn config(&self) -> &PromptcConfig {
        &self.config
    }

    pub async fn state(&self) -> CompileState {
        *self.state.read().await
    }

    /// Token observed by every evaluation and optimizer step. Once
    /// cancelled, the compiler stays cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        info!("Compilation cancellation requested");
        self.cancel.cancel();
    }

    async fn set_state(&self, state: CompileState) {
        *self.state.write().await = state;
    }

    /// Compile `request` into an optimized program.
    ///
    /// Validation errors are returned before any model call and leave the
    /// compiler state untouched. Once the baseline has finished, an aborted
    /// run carries its results in [`CoreError::baseline_results`].
    pub async fn compile(&self, request: CompileRequest) -> CoreResult<CompilationResult> {
        {
            let mut state = self.state.write().await;
            if state.is_running() {
                return Err(CoreError::internal("a compilation is already running"));
            }
            validate_request(&request)?;
            *state = CompileState::BaselineEvaluating;
        }

        match self.run(&request).await {
            Ok(result) => {
                self.set_state(CompileState::Done).await;
                Ok(result)
            }
            Err(err) => {
                warn!("Compilation failed: {}", err);
                self.set_state(CompileState::Failed).await;
                Err(err)
            }
        }
    }

    async fn run(&self, request: &CompileRequest) -> CoreResult<CompilationResult> {
        let evaluator = Evaluator::new(self.config.lm.num_threads, self.config.lm.request_timeout)
            .with_cancellation(self.cancel.clone());
        let student =
            Predictor::new(request.module, request.signature.clone()).with_hint(request.hint.clone());
        let metric = request.metric.as_ref();
        let task = request.models.task.as_ref();
        let teacher = request.models.teacher.as_ref();
        let fingerprint = dataset_fingerprint(&request.validation);
        let mut timings = StageTimings::default();

        info!(
            "Compiling {} with {} ({} train / {} validation examples)",
            request.signature.display_string(),
            request.optimizer,
            request.train.len(),
            request.validation.len()
        );

        let started = Instant::now();
        let baseline = evaluator
            .evaluate(&student, task, &request.validation, metric, Stage::Baseline)
            .await?;
        timings.baseline = started.elapsed();
        info!("Baseline score: {:.4}", baseline.mean);

        self.tracker
            .params([
                ("signature", request.signature.display_string()),
                ("instructions", request.signature.instructions().to_string()),
                ("module", request.module.to_string()),
                ("optimizer", request.optimizer.to_string()),
                ("metric", metric.name().to_string()),
                ("llm_model", task.name().to_string()),
                ("teacher_model", teacher.name().to_string()),
                ("hint", request.hint.clone().unwrap_or_default()),
                ("dataset_fingerprint", fingerprint.clone()),
            ])
            .await;
        self.tracker
            .metrics([("baseline_score", baseline.mean)])
            .await;

        self.set_state(CompileState::Optimizing).await;
        let started = Instant::now();
        let optimizer = optimizer_for(request.optimizer, &self.config.optimizer);
        let ctx = OptimizeContext {
            student: &student,
            train: &request.train,
            validation: &request.validation,
            metric,
            task_lm: task,
            teacher_lm: teacher,
            evaluator: &evaluator,
        };
        let optimized = optimizer
            .optimize(&ctx)
            .await
            .map_err(|err| {
                within_stage(err, Stage::Optimization).with_baseline(&baseline.results)
            })?;
        timings.optimization = started.elapsed();
        info!(
            "Optimization kept {} demos after {} candidates",
            optimized.predictor.demos().len(),
            optimized.trace.len()
        );

        self.set_state(CompileState::FinalEvaluating).await;
        let started = Instant::now();
        let report = evaluator
            .evaluate(
                &optimized.predictor,
                task,
                &request.validation,
                metric,
                Stage::FinalEvaluation,
            )
            .await
            .map_err(|err| err.with_baseline(&baseline.results))?;
        timings.final_evaluation = started.elapsed();

        let improvement = ScoreImprovement::compute(baseline.mean, report.mean);
        match improvement.as_f64() {
            Some(value) => info!(
                "Evaluation score: {:.4} ({:+.1}% over baseline)",
                report.mean,
                value * 100.0
            ),
            None => info!(
                "Evaluation score: {:.4} (baseline was zero)",
                report.mean
            ),
        }
        self.log_final(request, &report, improvement, optimized.predictor.demos().len())
            .await;

        Ok(CompilationResult {
            compiled_program: optimized.predictor.to_artifact(),
            baseline_score: baseline.mean,
            evaluation_score: report.mean,
            score_improvement: improvement,
            per_example_results: report.results,
            baseline_results: baseline.results,
            optimizer_trace: optimized.trace,
            dataset_fingerprint: fingerprint,
            timings,
        })
    }

    async fn log_final(
        &self,
        request: &CompileRequest,
        report: &EvaluationReport,
        improvement: ScoreImprovement,
        demos: usize,
    ) {
        let mut metrics = vec![
            ("evaluation_score", report.mean),
            ("trainset_size", request.train.len() as f64),
            ("devset_size", request.validation.len() as f64),
            ("num_demos", demos as f64),
            ("failed_examples", report.failures() as f64),
        ];
        if let Some(value) = improvement.as_f64() {
            metrics.push(("score_improvement", value));
        }
        self.tracker.metrics(metrics).await;

        match serde_json::to_vec_pretty(&report.results) {
            Ok(bytes) => self.tracker.artifact("evaluation_results.json", &bytes).await,
            Err(e) => warn!("Failed to serialize evaluation results: {}", e),
        }
    }
}

fn validate_request(request: &CompileRequest) -> CoreResult<()> {
    if request.validation.is_empty() {
        return Err(CoreError::insufficient_data("validation set is empty"));
    }
    let signature = &request.signature;
    for example in request.train.iter().chain(&request.validation) {
        signature.check_inputs(example)?;
    }
    for example in &request.validation {
        signature.check_outputs(example)?;
    }
    Ok(())
}

/// Attach the stage to a bare systemic error raised inside an optimizer.
fn within_stage(err: CoreError, stage: Stage) -> CoreError {
    match err {
        CoreError::Cancelled { .. } | CoreError::Compilation { .. } => err,
        other => CoreError::Compilation {
            stage,
            example_index: None,
            source: Box::new(other),
            partial: Vec::new(),
            baseline: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LmError, SignatureError};
    use crate::metrics::{ExactMatch, FnMetric};
    use crate::signature::build_signature;
    use crate::testing::{RecordingLogger, ScriptedModel};
    use assert_matches::assert_matches;
    use promptc_common::{MatchMode, Prediction};

    fn signature() -> Signature {
        build_signature(&["question"], &["answer"], "Answer the question.", None, None).unwrap()
    }

    fn examples() -> Vec<Example> {
        [("2+2", "4"), ("3+3", "6"), ("1+1", "2")]
            .iter()
            .map(|(q, a)| Example::new().with("question", *q).with("answer", *a))
            .collect()
    }

    fn arithmetic() -> ScriptedModel {
        ScriptedModel::new("arith").lookup(
            "question",
            "answer",
            &[("2+2", "4"), ("3+3", "6"), ("1+1", "2")],
        )
    }

    fn exact() -> Arc<dyn Metric> {
        Arc::new(ExactMatch::new(vec!["answer".to_string()], MatchMode::All))
    }

    fn request(model: Arc<ScriptedModel>, metric: Arc<dyn Metric>) -> CompileRequest {
        CompileRequest::new(signature(), metric, ModelSet::single(model))
            .with_data(examples(), examples())
    }

    #[tokio::test]
    async fn test_compile_reaches_done() {
        let model = Arc::new(arithmetic());
        let logger = Arc::new(RecordingLogger::new());
        let compiler = Compiler::new(PromptcConfig::default()).with_logger(logger.clone());

        let result = compiler.compile(request(model, exact())).await.unwrap();

        assert_eq!(compiler.state().await, CompileState::Done);
        assert_eq!(result.baseline_score, 1.0);
        assert_eq!(result.evaluation_score, 1.0);
        assert_eq!(result.score_improvement, ScoreImprovement::Relative(0.0));
        assert_eq!(result.per_example_results.len(), 3);
        assert_eq!(result.compiled_program.demos.len(), 3);

        let metrics = logger.metrics();
        assert_eq!(metrics.get("baseline_score"), Some(&1.0));
        assert_eq!(metrics.get("devset_size"), Some(&3.0));
        assert_eq!(logger.params().get("optimizer").map(String::as_str), Some("BootstrapFewShot"));
        assert_eq!(logger.artifact_names(), vec!["evaluation_results.json"]);
    }

    #[tokio::test]
    async fn test_empty_validation_fails_before_any_call() {
        let model = Arc::new(arithmetic());
        let compiler = Compiler::new(PromptcConfig::default());
        let request = CompileRequest::new(signature(), exact(), ModelSet::single(model.clone()))
            .with_data(examples(), Vec::new());

        let result = compiler.compile(request).await;

        assert_matches!(result, Err(CoreError::InsufficientData { .. }));
        assert_eq!(model.call_count(), 0);
        assert_eq!(compiler.state().await, CompileState::Idle);
    }

    #[tokio::test]
    async fn test_missing_output_in_validation_is_rejected() {
        let model = Arc::new(arithmetic());
        let compiler = Compiler::new(PromptcConfig::default());
        let request = CompileRequest::new(signature(), exact(), ModelSet::single(model.clone()))
            .with_data(examples(), vec![Example::new().with("question", "2+2")]);

        let result = compiler.compile(request).await;

        assert_matches!(
            result,
            Err(CoreError::Signature(SignatureError::MissingField { .. }))
        );
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_baseline_gives_undefined_improvement() {
        let model = Arc::new(arithmetic());
        let metric: Arc<dyn Metric> =
            Arc::new(FnMetric::new("never", |_: &Example, _: &Prediction| 0.0));
        let compiler = Compiler::new(PromptcConfig::default());

        let result = compiler.compile(request(model, metric)).await.unwrap();

        assert_eq!(result.baseline_score, 0.0);
        assert_eq!(result.score_improvement, ScoreImprovement::Undefined);
        assert!(result.compiled_program.demos.is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_marks_failed() {
        let model = Arc::new(ScriptedModel::new("locked").failing(LmError::Auth {
            reason: "invalid key".to_string(),
        }));
        let compiler = Compiler::new(PromptcConfig::default());

        let err = compiler.compile(request(model, exact())).await.unwrap_err();

        assert_matches!(err, CoreError::Compilation { stage: Stage::Baseline, .. });
        assert_eq!(compiler.state().await, CompileState::Failed);
    }

    #[tokio::test]
    async fn test_final_stage_failure_keeps_baseline_results() {
        // Fails only once demos are attached, i.e. in the final evaluation.
        let model = Arc::new(ScriptedModel::new("flaky").try_respond_with(|request| {
            if request.demos.is_empty() {
                let answer = match request.inputs.get("question") {
                    Some("2+2") => "4",
                    Some("3+3") => "6",
                    _ => "2",
                };
                Ok([("answer", answer)].into())
            } else {
                Err(LmError::Auth {
                    reason: "key rotated".to_string(),
                })
            }
        }));
        let compiler = Compiler::new(PromptcConfig::default());

        let err = compiler.compile(request(model, exact())).await.unwrap_err();

        assert_matches!(
            err,
            CoreError::Compilation { stage: Stage::FinalEvaluation, example_index: Some(0), .. }
        );
        assert!(err.partial_results().is_empty());
        let baseline: Vec<f64> = err.baseline_results().iter().map(|r| r.score).collect();
        assert_eq!(baseline, vec![1.0, 1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_only_one_of_concurrent_compiles_runs() {
        let model = Arc::new(arithmetic().with_delay(|_| Duration::from_millis(30)));
        let compiler = Arc::new(Compiler::new(PromptcConfig::default()));

        let runs: Vec<_> = (0..8)
            .map(|_| {
                let compiler = Arc::clone(&compiler);
                let request = request(model.clone(), exact());
                tokio::spawn(async move { compiler.compile(request).await })
            })
            .collect();

        let mut finished = 0;
        let mut rejected = 0;
        for run in runs {
            match run.await.unwrap() {
                Ok(_) => finished += 1,
                Err(CoreError::Internal { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!((finished, rejected), (1, 7));
    }

    #[tokio::test]
    async fn test_cancelled_compiler_makes_no_calls() {
        let model = Arc::new(arithmetic());
        let compiler = Compiler::new(PromptcConfig::default());
        compiler.cancel();

        let err = compiler
            .compile(request(model.clone(), exact()))
            .await
            .unwrap_err();

        assert_matches!(err, CoreError::Cancelled { stage: Stage::Baseline, .. });
        assert_eq!(model.call_count(), 0);
        assert_eq!(compiler.state().await, CompileState::Failed);
    }

    #[test]
    fn test_score_improvement() {
        assert_eq!(ScoreImprovement::compute(0.5, 0.75), ScoreImprovement::Relative(0.5));
        assert_eq!(ScoreImprovement::compute(0.0, 0.75), ScoreImprovement::Undefined);
        assert_eq!(ScoreImprovement::Undefined.as_f64(), None);
    }
}

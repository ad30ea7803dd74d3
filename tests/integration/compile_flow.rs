//! Compilation runs driven through the public API.

use assert_matches::assert_matches;
use promptc_common::{Example, MatchMode, OptimizerKind, Prediction};
use promptc_core::testing::{RecordingLogger, ScriptedModel};
use promptc_core::{
    CompileRequest, CompileState, Compiler, CoreError, ExactMatch, FnMetric, LmResponse, Metric,
    ModelSet, PromptcConfig, ScoreImprovement, Stage,
};
use promptc_tests::*;
use std::sync::Arc;
use std::time::Duration;

fn exact_joke() -> Arc<dyn Metric> {
    Arc::new(ExactMatch::new(vec!["joke".to_string()], MatchMode::All))
}

#[tokio::test]
async fn test_bootstrap_compile_end_to_end() {
    setup_test_logging();
    let model = Arc::new(joke_model());
    let logger = Arc::new(RecordingLogger::new());
    let compiler = Compiler::new(PromptcConfig::default()).with_logger(logger.clone());

    let request = CompileRequest::new(joke_signature(), exact_joke(), ModelSet::single(model.clone()))
        .with_data(joke_dataset(), joke_dataset()[..2].to_vec());
    let result = with_timeout(test_timeout(), async {
        compiler.compile(request).await.map_err(anyhow::Error::from)
    })
    .await
    .unwrap();

    assert_eq!(compiler.state().await, CompileState::Done);
    assert_eq!(result.baseline_score, 1.0);
    assert_eq!(result.evaluation_score, 1.0);
    assert_eq!(result.compiled_program.demos.len(), 3);
    assert!(result.compiled_program.demos.iter().all(|d| d.augmented));
    assert_eq!(result.per_example_results.len(), 2);
    // baseline 2 + teacher 3 + final 2
    assert_eq!(model.call_count(), 7);

    let record = result.record("jokes", OptimizerKind::BootstrapFewShot, "gpt-4o-mini", "gpt-4o-mini");
    assert_eq!(record.evaluation_score, Some(1.0));
    assert_eq!(record.signature, "topic -> joke");
    assert_eq!(
        logger.params().get("dataset_fingerprint"),
        Some(&result.dataset_fingerprint)
    );
}

#[tokio::test]
async fn test_teacher_traces_become_demos_only_when_they_pass() {
    // Gold answers A, B, C; the teacher gets the middle one wrong.
    let train: Vec<Example> = [("t0", "A"), ("t1", "B"), ("t2", "C")]
        .iter()
        .map(|(topic, joke)| Example::new().with("topic", *topic).with("joke", *joke))
        .collect();
    let validation: Vec<Example> = [("v0", "D"), ("v1", "E")]
        .iter()
        .map(|(topic, joke)| Example::new().with("topic", *topic).with("joke", *joke))
        .collect();
    let teacher = Arc::new(ScriptedModel::new("teacher").lookup(
        "topic",
        "joke",
        &[("t0", "A"), ("t1", "X"), ("t2", "C")],
    ));
    let task = Arc::new(ScriptedModel::new("task").lookup(
        "topic",
        "joke",
        &[("v0", "D"), ("v1", "E")],
    ));

    let compiler = Compiler::new(PromptcConfig::default());
    let request = CompileRequest::new(
        joke_signature(),
        exact_joke(),
        ModelSet::new(task.clone(), teacher.clone()),
    )
    .with_data(train, validation);
    let result = compiler.compile(request).await.unwrap();

    let demo_topics: Vec<&str> = result
        .compiled_program
        .demos
        .iter()
        .filter_map(|d| d.inputs.get("topic"))
        .collect();
    assert_eq!(demo_topics, vec!["t0", "t2"]);
    assert_eq!(result.compiled_program.demos[1].outputs.get("joke"), Some("C"));
    assert_eq!(result.per_example_results.len(), 2);
    assert_eq!(result.evaluation_score, 1.0);
    // The teacher only bootstraps; the task model runs both evaluations.
    assert_eq!(teacher.call_count(), 3);
    assert_eq!(task.call_count(), 4);
    assert!(task.requests()[2..].iter().all(|r| r.demos.len() == 2));
}

#[tokio::test]
async fn test_random_search_compile_prefers_demos() {
    // Answers correctly only once it has seen at least one demonstration.
    let model = Arc::new(ScriptedModel::new("learner").respond_with(|request| {
        let joke = if request.demos.is_empty() {
            "I don't know any jokes."
        } else {
            JOKES
                .iter()
                .find(|(topic, _)| request.inputs.get("topic") == Some(*topic))
                .map(|(_, joke)| *joke)
                .unwrap_or_default()
        };
        LmResponse::default().with_field("joke", joke)
    }));
    let compiler = Compiler::new(PromptcConfig::default());

    let request = CompileRequest::new(joke_signature(), exact_joke(), ModelSet::single(model))
        .with_optimizer(OptimizerKind::BootstrapFewShotWithRandomSearch)
        .with_data(joke_dataset(), joke_dataset());
    let result = compiler.compile(request).await.unwrap();

    assert_eq!(result.baseline_score, 0.0);
    assert_eq!(result.evaluation_score, 1.0);
    assert_eq!(result.score_improvement, ScoreImprovement::Undefined);
    assert!(!result.compiled_program.demos.is_empty());
    assert_eq!(result.optimizer_trace.iter().filter(|c| c.selected).count(), 1);
}

#[tokio::test]
async fn test_empty_validation_makes_no_calls() {
    let model = Arc::new(joke_model());
    let compiler = Compiler::new(PromptcConfig::default());
    let request = CompileRequest::new(joke_signature(), exact_joke(), ModelSet::single(model.clone()))
        .with_data(joke_dataset(), Vec::new());

    assert_matches!(
        compiler.compile(request).await,
        Err(CoreError::InsufficientData { .. })
    );
    assert_eq!(model.call_count(), 0);
    assert_eq!(compiler.state().await, CompileState::Idle);
}

#[tokio::test]
async fn test_zero_baseline_reports_undefined_improvement() {
    let metric: Arc<dyn Metric> = Arc::new(FnMetric::new("never", |_: &Example, _: &Prediction| 0.0));
    let compiler = Compiler::new(PromptcConfig::default());
    let request = CompileRequest::new(joke_signature(), metric, ModelSet::single(Arc::new(joke_model())))
        .with_data(joke_dataset(), joke_dataset());

    let result = compiler.compile(request).await.unwrap();
    assert_eq!(result.score_improvement, ScoreImprovement::Undefined);
    assert_eq!(result.score_improvement.as_f64(), None);
}

#[tokio::test]
async fn test_cancellation_during_baseline() {
    let compiler = Compiler::new(PromptcConfig::default());
    let token = compiler.cancellation_token();
    // The first call cancels the run; the next example must not start.
    let model = Arc::new(ScriptedModel::new("cancelling").respond_with(move |request| {
        token.cancel();
        let topic = request.inputs.get("topic").unwrap_or_default();
        LmResponse::default().with_field("joke", format!("A joke about {}", topic))
    }));
    let request = CompileRequest::new(joke_signature(), exact_joke(), ModelSet::single(model.clone()))
        .with_data(joke_dataset(), joke_dataset());

    let err = compiler.compile(request).await.unwrap_err();

    assert_matches!(
        err,
        CoreError::Cancelled {
            stage: Stage::Baseline,
            example_index: Some(1),
            ..
        }
    );
    assert_eq!(model.call_count(), 1);
    // The call that was already in flight still counts.
    assert_eq!(err.partial_results().len(), 1);
    assert_eq!(err.partial_results()[0].index, 0);
    assert_eq!(compiler.state().await, CompileState::Failed);
}

#[tokio::test]
async fn test_concurrent_compile_rejected_while_running() {
    let compiler = Arc::new(Compiler::new(PromptcConfig::default()));
    let model = Arc::new(joke_model().with_delay(|_| Duration::from_millis(200)));
    let request = CompileRequest::new(joke_signature(), exact_joke(), ModelSet::single(model))
        .with_data(joke_dataset(), joke_dataset());

    let running = {
        let compiler = Arc::clone(&compiler);
        let request = request.clone();
        tokio::spawn(async move { compiler.compile(request).await })
    };

    wait_for_condition(
        || {
            let compiler = Arc::clone(&compiler);
            async move { compiler.state().await == CompileState::BaselineEvaluating }
        },
        Duration::from_secs(5),
        Duration::from_millis(5),
    )
    .await
    .unwrap();

    assert_matches!(
        compiler.compile(request).await,
        Err(CoreError::Internal { .. })
    );

    compiler.cancel();
    let first = running.await.unwrap();
    assert_matches!(first, Err(CoreError::Cancelled { .. }));
}

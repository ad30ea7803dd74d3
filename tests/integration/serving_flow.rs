//! Compile, store, serve, rate and export, then recompile on the export.

use assert_matches::assert_matches;
use promptc_common::{Example, MatchMode, OptimizerKind, Rating, TraceId};
use promptc_core::config::ServingConfig;
use promptc_core::testing::RecordingLogger;
use promptc_core::{
    CompileRequest, Compiler, ExactMatch, JsonFileStore, Metric, ModelSet, ProgramStore,
    PromptcConfig, Tracker,
};
use promptc_serving::{
    ExportFormat, ExportOptions, FeedbackRequest, RowStatus, ServingError, ServingStack,
};
use promptc_tests::*;
use std::sync::Arc;
use std::time::Duration;

const PROGRAM_ID: &str = "Topic:Joke-Gpt4oMini_Predict_Bootstrapfewshot-20241003";

fn exact_joke() -> Arc<dyn Metric> {
    Arc::new(ExactMatch::new(vec!["joke".to_string()], MatchMode::All))
}

async fn compile_and_store(store: &JsonFileStore) {
    let compiler = Compiler::new(PromptcConfig::default());
    let request = CompileRequest::new(
        joke_signature(),
        exact_joke(),
        ModelSet::single(Arc::new(joke_model())),
    )
    .with_data(joke_dataset(), joke_dataset());
    let result = compiler.compile(request).await.unwrap();

    let record = result.record(
        PROGRAM_ID,
        OptimizerKind::BootstrapFewShot,
        "gpt-4o-mini",
        "gpt-4o-mini",
    );
    store.save(&record, &result.compiled_program).await.unwrap();
}

#[tokio::test]
async fn test_serve_rate_export_and_retrain() {
    setup_test_logging();
    let dir = create_temp_dir();
    let store = JsonFileStore::new(dir.path());
    compile_and_store(&store).await;
    assert_eq!(store.list().await.unwrap(), vec![PROGRAM_ID.to_string()]);

    let logger = Arc::new(RecordingLogger::new());
    let serving_lm = Arc::new(joke_model());
    let stack = ServingStack::new(
        Arc::new(store.clone()),
        serving_lm.clone(),
        &ServingConfig::default(),
        Tracker::new(logger.clone()),
        Duration::from_secs(5),
    );

    // Serve two requests; the stored program carries its demos.
    let cats = stack
        .runner
        .predict(PROGRAM_ID, Example::new().with("topic", "cats"))
        .await
        .unwrap();
    let dogs = stack
        .runner
        .predict(PROGRAM_ID, Example::new().with("topic", "dogs"))
        .await
        .unwrap();
    assert_eq!(cats.outputs.get("joke"), Some(JOKES[0].1));
    assert_eq!(serving_lm.requests()[0].demos.len(), 3);
    assert_eq!(stack.runner.models().stats().await.cache_hits, 1);

    // Rate them; unknown traces are refused.
    let rate = |trace_id: TraceId, rating: &str, correction: Option<&str>| FeedbackRequest {
        trace_id,
        rating: rating.to_string(),
        corrected_output: correction.map(|joke| Example::new().with("joke", joke)),
        comment: None,
        user_id: Some("tester".to_string()),
    };
    stack.feedback.submit(rate(cats.trace_id, "thumbs_up", None)).await.unwrap();
    stack
        .feedback
        .submit(rate(
            dogs.trace_id,
            "thumbs_down",
            Some("What do you call a dog magician? A labracadabrador."),
        ))
        .await
        .unwrap();
    assert_matches!(
        stack.feedback.submit(rate(TraceId::new(), "thumbs_up", None)).await,
        Err(ServingError::TraceNotFound { .. })
    );

    let stats = stack.feedback.stats().await;
    assert_eq!((stats.total, stats.thumbs_up, stats.with_corrections), (2, 1, 1));
    assert_eq!(logger.artifact_names().len(), 2);

    let history = stack.feedback.history(None, 10).await;
    assert_eq!(history[0].trace_id, dogs.trace_id);
    assert_eq!(history[0].rating, Rating::ThumbsDown);

    // Export with corrections applied.
    let jsonl = stack
        .exporter
        .export_training_data(&ExportOptions {
            format: ExportFormat::Jsonl,
            ..ExportOptions::default()
        })
        .await
        .unwrap();
    let lines: Vec<serde_json::Value> = String::from_utf8(jsonl)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["joke"], "What do you call a dog magician? A labracadabrador.");
    assert_eq!(lines[1]["_rating"], "thumbs_down");

    // The export is directly usable as a validation set.
    let retrain = stack.exporter.to_examples(&ExportOptions::default()).await;
    let compiler = Compiler::new(PromptcConfig::default());
    let request = CompileRequest::new(
        joke_signature(),
        exact_joke(),
        ModelSet::single(Arc::new(joke_model())),
    )
    .with_data(joke_dataset(), retrain);
    let result = compiler.compile(request).await.unwrap();

    // The model still tells the old dog joke, so only cats matches.
    assert_eq!(result.evaluation_score, 0.5);
}

#[tokio::test]
async fn test_batch_over_stored_program() {
    let dir = create_temp_dir();
    let store = JsonFileStore::new(dir.path());
    compile_and_store(&store).await;

    let logger = Arc::new(RecordingLogger::new());
    let stack = ServingStack::new(
        Arc::new(store),
        Arc::new(joke_model()),
        &ServingConfig::default(),
        Tracker::new(logger.clone()),
        Duration::from_secs(5),
    );

    let rows = vec![
        Example::new().with("topic", "birds").with("note", "ignored"),
        Example::new().with("topic", "fish"),
        Example::new().with("subject", "cats"),
    ];
    let output = stack.runner.run_batch(PROGRAM_ID, rows, None).await.unwrap();

    assert_eq!(output.rows[0].status, RowStatus::Success);
    assert_eq!(output.rows[0].outputs.get("joke"), Some(JOKES[2].1));
    assert_matches!(output.rows[1].status, RowStatus::Error(_));
    assert_matches!(
        output.rows[2].status,
        RowStatus::Error(ref message) if message.contains("topic")
    );
    assert_eq!(output.stats.success_count, 1);
    assert_eq!(logger.metrics()["batch_error_count"], 2.0);

    // Batch rows are not traced for feedback.
    assert!(stack.runner.traces().is_empty().await);
}

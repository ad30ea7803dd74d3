//! An LLM judge loaded from the store and used as the compilation metric.

use assert_matches::assert_matches;
use promptc_common::ModuleKind;
use promptc_core::testing::ScriptedModel;
use promptc_core::{
    CompileRequest, Compiler, ConfigError, CoreError, JudgeError, LmError, MetricConfig,
    MetricFactory, ModelSet, ProgramStore, PromptcConfig, Stage,
};
use promptc_tests::*;
use std::sync::Arc;

fn factory(store: Arc<dyn ProgramStore>, judge: Arc<ScriptedModel>) -> MetricFactory {
    MetricFactory::new(store).with_judge_lm(judge)
}

#[tokio::test]
async fn test_compile_with_judge_metric() {
    setup_test_logging();
    let store = store_with_judge().await;
    let judge = Arc::new(judge_model());
    let task = Arc::new(joke_model());

    let metric = factory(store.clone(), judge.clone())
        .create(&MetricConfig::llm_judge(vec!["joke".to_string()], JUDGE_ID))
        .await
        .unwrap();
    assert_eq!(metric.name(), "llm_judge");

    let compiler = Compiler::new(PromptcConfig::default());
    let request = CompileRequest::new(joke_signature(), metric, ModelSet::single(task.clone()))
        .with_module(ModuleKind::Predict)
        .with_data(joke_dataset(), joke_dataset());
    let result = compiler.compile(request).await.unwrap();

    // cats 0.9, dogs 0, birds 0.75
    assert!((result.baseline_score - 0.55).abs() < 1e-9);
    assert!((result.evaluation_score - 0.55).abs() < 1e-9);
    let scores: Vec<f64> = result.per_example_results.iter().map(|r| r.score).collect();
    assert_eq!(scores, vec![0.9, 0.0, 0.75]);

    // The dogs trace scored 0 and is not kept as a demonstration.
    let demo_topics: Vec<&str> = result
        .compiled_program
        .demos
        .iter()
        .filter_map(|d| d.inputs.get("topic"))
        .collect();
    assert_eq!(demo_topics, vec!["cats", "birds"]);

    // baseline 3 + bootstrap 3 + final 3, on both models
    assert_eq!(judge.call_count(), 9);
    assert_eq!(task.call_count(), 9);
    let judge_request = &judge.requests()[0];
    assert_eq!(judge_request.inputs.get("topic"), Some("cats"));
    assert!(judge_request.inputs.get("joke").is_some());
}

#[tokio::test]
async fn test_judge_configuration_errors_surface_before_any_call() {
    let store = store_with_judge().await;
    let judge = Arc::new(judge_model());
    let factory = factory(store, judge.clone());

    let missing = factory
        .create(&MetricConfig::llm_judge(vec!["joke".to_string()], "NoSuchJudge"))
        .await;
    assert_matches!(
        missing,
        Err(CoreError::Judge(JudgeError::ConfigNotFound { ref id })) if id == "NoSuchJudge"
    );

    // The judge was stored without compiled demos.
    let compiled = factory
        .create(&MetricConfig::llm_judge(vec!["joke".to_string()], JUDGE_ID).with_compiled_judge())
        .await;
    assert_matches!(
        compiled,
        Err(CoreError::Judge(JudgeError::ArtifactNotFound { .. }))
    );

    let no_fields = factory
        .create(&MetricConfig::llm_judge(Vec::new(), JUDGE_ID))
        .await;
    assert_matches!(
        no_fields,
        Err(CoreError::Config(ConfigError::MissingParameter { .. }))
    );

    assert_eq!(judge.call_count(), 0);
}

#[tokio::test]
async fn test_judge_auth_failure_aborts_compilation() {
    let store = store_with_judge().await;
    let judge = Arc::new(ScriptedModel::new("judge").failing(LmError::Auth {
        reason: "judge key revoked".to_string(),
    }));
    let metric = factory(store, judge)
        .create(&MetricConfig::llm_judge(vec!["joke".to_string()], JUDGE_ID))
        .await
        .unwrap();

    let compiler = Compiler::new(PromptcConfig::default());
    let request =
        CompileRequest::new(joke_signature(), metric, ModelSet::single(Arc::new(joke_model())))
            .with_data(joke_dataset(), joke_dataset());

    let err = compiler.compile(request).await.unwrap_err();
    assert_matches!(
        err,
        CoreError::Compilation {
            stage: Stage::Baseline,
            example_index: Some(0),
            ..
        }
    );
    assert!(err.partial_results().is_empty());
}

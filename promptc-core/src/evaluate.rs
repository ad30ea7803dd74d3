//! Concurrent evaluation of a predictor over a dataset.
//!
//! Examples run on a bounded pool. Results land in the slot of their
//! originating index, so the report is in input order whatever the
//! completion order. Per-example failures score 0.0 and count toward the
//! mean; systemic failures abort with the results completed so far.

use crate::error::{CoreError, CoreResult, Stage};
use crate::lm::LanguageModel;
use crate::metrics::Metric;
use crate::module::Predictor;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use promptc_common::{Example, Prediction};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome for one example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleResult {
    pub index: usize,
    pub input: Example,
    pub gold: Example,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
    pub score: f64,
    /// Why the example scored 0.0 without a verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub mean: f64,
    pub results: Vec<ExampleResult>,
}

impl EvaluationReport {
    fn from_results(results: Vec<ExampleResult>) -> Self {
        let mean = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64
        };
        Self { mean, results }
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.failure.is_some()).count()
    }
}

/// Runs predictors over datasets with bounded concurrency.
#[derive(Debug, Clone)]
pub struct Evaluator {
    num_threads: usize,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl Evaluator {
    pub fn new(num_threads: usize, request_timeout: Duration) -> Self {
        Self {
            num_threads: num_threads.max(1),
            request_timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Evaluate `predictor` on every example and return the ordered report.
    pub async fn evaluate(
        &self,
        predictor: &Predictor,
        lm: &dyn LanguageModel,
        examples: &[Example],
        metric: &dyn Metric,
        stage: Stage,
    ) -> CoreResult<EvaluationReport> {
        let mut slots: Vec<Option<ExampleResult>> = (0..examples.len()).map(|_| None).collect();

        // Built up front so the stream holds plain futures rather than a
        // borrowing closure; nothing runs until the stream polls them.
        let runs: Vec<_> = examples
            .iter()
            .enumerate()
            .map(|(index, example)| {
                self.evaluate_one(predictor, lm, index, example, metric, stage)
                    .map(move |outcome| (index, outcome))
            })
            .collect();
        let mut pending = stream::iter(runs).buffer_unordered(self.num_threads);

        while let Some((index, outcome)) = pending.next().await {
            match outcome {
                Ok(result) => slots[index] = Some(result),
                Err(CoreError::Cancelled {
                    stage,
                    example_index,
                    ..
                }) => {
                    return Err(CoreError::Cancelled {
                        stage,
                        example_index,
                        partial: slots.into_iter().flatten().collect(),
                        baseline: Vec::new(),
                    });
                }
                Err(err) => {
                    warn!("Aborting {} at example {}: {}", stage, index, err);
                    return Err(CoreError::Compilation {
                        stage,
                        example_index: Some(index),
                        source: Box::new(err),
                        partial: slots.into_iter().flatten().collect(),
                        baseline: Vec::new(),
                    });
                }
            }
        }

        let report = EvaluationReport::from_results(slots.into_iter().flatten().collect());
        debug!(
            "{}: mean {:.4} over {} examples ({} failed)",
            stage,
            report.mean,
            report.results.len(),
            report.failures()
        );
        Ok(report)
    }

    async fn evaluate_one(
        &self,
        predictor: &Predictor,
        lm: &dyn LanguageModel,
        index: usize,
        example: &Example,
        metric: &dyn Metric,
        stage: Stage,
    ) -> CoreResult<ExampleResult> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::cancelled(stage, Some(index)));
        }

        let signature = predictor.signature();
        let mut result = ExampleResult {
            index,
            input: signature.inputs_of(example),
            gold: signature.outputs_of(example),
            prediction: None,
            score: 0.0,
            failure: None,
        };

        let prediction = match predictor.forward(lm, example, self.request_timeout).await {
            Ok(prediction) => prediction,
            Err(err) if err.is_systemic() => return Err(err.into()),
            Err(err) => {
                debug!("Example {} failed to predict: {}", index, err);
                result.failure = Some(err.to_string());
                return Ok(result);
            }
        };

        match metric.score(example, &prediction, None).await {
            Ok(score) if score.is_finite() => result.score = score.clamp(0.0, 1.0),
            Ok(score) => result.failure = Some(format!("metric returned {}", score)),
            Err(err) if err.is_systemic() => return Err(err.into()),
            Err(err) => {
                debug!("Example {} failed to score: {}", index, err);
                result.failure = Some(err.to_string());
            }
        }
        result.prediction = Some(prediction);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LmError;
    use crate::lm::LmResponse;
    use crate::metrics::ExactMatch;
    use crate::signature::build_signature;
    use crate::testing::ScriptedModel;
    use assert_matches::assert_matches;
    use promptc_common::{MatchMode, ModuleKind};

    fn predictor() -> Predictor {
        Predictor::new(
            ModuleKind::Predict,
            build_signature(&["question"], &["answer"], "Answer.", None, None).unwrap(),
        )
    }

    fn dataset(n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| {
                Example::new()
                    .with("question", i.to_string())
                    .with("answer", (i * 2).to_string())
            })
            .collect()
    }

    fn doubling_model() -> ScriptedModel {
        ScriptedModel::new("task").try_respond_with(|request| {
            let n: usize = request
                .inputs
                .get("question")
                .and_then(|q| q.parse().ok())
                .ok_or_else(|| LmError::InvalidResponse {
                    reason: "not a number".to_string(),
                })?;
            Ok([("answer", (n * 2).to_string())].into())
        })
    }

    fn metric() -> ExactMatch {
        ExactMatch::new(vec!["answer".to_string()], MatchMode::All)
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        // Earlier examples finish last.
        let lm = doubling_model().with_delay(|request| {
            let n: u64 = request.inputs.get("question").and_then(|q| q.parse().ok()).unwrap_or(0);
            Duration::from_millis(60 - n * 10)
        });
        let evaluator = Evaluator::new(6, Duration::from_secs(5));

        let report = evaluator
            .evaluate(&predictor(), &lm, &dataset(6), &metric(), Stage::Baseline)
            .await
            .unwrap();

        let indices: Vec<usize> = report.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(report.results[3].input.get("question"), Some("3"));
        assert_eq!(report.mean, 1.0);
        assert!(lm.max_in_flight() > 1);
    }

    #[tokio::test]
    async fn test_per_example_failure_scores_zero() {
        let lm = doubling_model();
        let mut data = dataset(3);
        data[1] = Example::new().with("question", "two").with("answer", "4");

        let report = Evaluator::new(1, Duration::from_secs(1))
            .evaluate(&predictor(), &lm, &data, &metric(), Stage::Baseline)
            .await
            .unwrap();

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results[1].score, 0.0);
        assert!(report.results[1].failure.is_some());
        assert!((report.mean - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_with_partial_results() {
        let lm = ScriptedModel::new("task").try_respond_with(|request| {
            match request.inputs.get("question") {
                Some("2") => Err(LmError::Auth {
                    reason: "key revoked".to_string(),
                }),
                Some(q) => {
                    let n: usize = q.parse().unwrap_or(0);
                    Ok([("answer", (n * 2).to_string())].into())
                }
                None => Ok(LmResponse::default()),
            }
        });

        let err = Evaluator::new(1, Duration::from_secs(1))
            .evaluate(&predictor(), &lm, &dataset(4), &metric(), Stage::FinalEvaluation)
            .await
            .unwrap_err();

        assert_matches!(
            &err,
            CoreError::Compilation { stage: Stage::FinalEvaluation, example_index: Some(2), .. }
        );
        assert_matches!(err.root(), CoreError::Lm(LmError::Auth { .. }));
        let partial: Vec<usize> = err.partial_results().iter().map(|r| r.index).collect();
        assert_eq!(partial, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let lm = doubling_model();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = Evaluator::new(2, Duration::from_secs(1))
            .with_cancellation(cancel)
            .evaluate(&predictor(), &lm, &dataset(3), &metric(), Stage::Baseline)
            .await;

        assert_matches!(result, Err(CoreError::Cancelled { stage: Stage::Baseline, .. }));
        assert_eq!(lm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_completed_results() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        // The second call cancels; it still completes, the third never starts.
        let lm = ScriptedModel::new("task").respond_with(move |request| {
            let n: usize = request.inputs.get("question").and_then(|q| q.parse().ok()).unwrap_or(0);
            if n == 1 {
                trigger.cancel();
            }
            [("answer", (n * 2).to_string())].into()
        });

        let err = Evaluator::new(1, Duration::from_secs(1))
            .with_cancellation(cancel)
            .evaluate(&predictor(), &lm, &dataset(4), &metric(), Stage::Baseline)
            .await
            .unwrap_err();

        assert_matches!(
            &err,
            CoreError::Cancelled { stage: Stage::Baseline, example_index: Some(2), .. }
        );
        let completed: Vec<usize> = err.partial_results().iter().map(|r| r.index).collect();
        assert_eq!(completed, vec![0, 1]);
        assert!(err.partial_results().iter().all(|r| r.score == 1.0));
        assert_eq!(lm.call_count(), 2);
    }
}

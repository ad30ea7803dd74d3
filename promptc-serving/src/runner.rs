//! Running compiled programs on single requests and batches.

use crate::error::{ServingError, ServingResult};
use crate::models::{LoadedProgram, ModelManager};
use crate::traces::{PredictionTrace, TraceLog};
use chrono::Utc;
use promptc_common::{Example, TraceId};
use promptc_core::{LanguageModel, Signature, Tracker};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one batch row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Success,
    Error(String),
}

impl RowStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RowStatus::Success)
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Success => f.write_str("success"),
            RowStatus::Error(message) => write!(f, "error: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRow {
    pub inputs: Example,
    /// Empty when the row failed
    pub outputs: Example,
    pub status: RowStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_rows: usize,
    pub success_count: usize,
    pub error_count: usize,
    #[serde(with = "humantime_serde")]
    pub total_latency: Duration,
}

impl BatchStats {
    pub fn avg_latency_per_row(&self) -> Duration {
        if self.total_rows == 0 {
            Duration::ZERO
        } else {
            self.total_latency / self.total_rows as u32
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_rows as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutput {
    pub rows: Vec<BatchRow>,
    pub stats: BatchStats,
}

/// Check that `headers` cover every input field.
///
/// Missing fields are reported sorted, together with the expected list.
pub fn validate_headers<H, F>(headers: &[H], input_fields: &[F]) -> ServingResult<()>
where
    H: AsRef<str>,
    F: AsRef<str>,
{
    if input_fields.is_empty() {
        return Err(ServingError::InvalidRequest {
            reason: "program declares no input fields".to_string(),
        });
    }

    let present: BTreeSet<&str> = headers.iter().map(AsRef::as_ref).collect();
    let missing: BTreeSet<&str> = input_fields
        .iter()
        .map(AsRef::as_ref)
        .filter(|field| !present.contains(field))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ServingError::MissingFields {
            missing: missing.into_iter().map(str::to_string).collect(),
            expected: input_fields.iter().map(|f| f.as_ref().to_string()).collect(),
        })
    }
}

fn check_request(signature: &Signature, row: &Example) -> ServingResult<()> {
    if let Some(field) = row.keys().find(|key| !signature.is_input(key)) {
        return Err(ServingError::UnexpectedField {
            field: field.to_string(),
        });
    }
    let headers: Vec<&str> = row.keys().collect();
    let inputs: Vec<&str> = signature.input_names().collect();
    validate_headers(&headers, &inputs)
}

/// Runs stored programs against the serving language model.
pub struct ProgramRunner {
    models: Arc<ModelManager>,
    lm: Arc<dyn LanguageModel>,
    traces: Arc<TraceLog>,
    tracker: Tracker,
    timeout: Duration,
}

impl ProgramRunner {
    pub fn new(models: Arc<ModelManager>, lm: Arc<dyn LanguageModel>, traces: Arc<TraceLog>) -> Self {
        Self {
            models,
            lm,
            traces,
            tracker: Tracker::noop(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_tracker(mut self, tracker: Tracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    pub fn traces(&self) -> &Arc<TraceLog> {
        &self.traces
    }

    async fn run(&self, program: &LoadedProgram, inputs: &Example) -> ServingResult<Example> {
        let prediction = program
            .predictor
            .forward(self.lm.as_ref(), inputs, self.timeout)
            .await?;
        Ok(prediction.to_example())
    }

    /// Run program `id` on one request and record the trace.
    ///
    /// The request must carry every input field and nothing else.
    pub async fn predict(&self, id: &str, row: Example) -> ServingResult<PredictionTrace> {
        let program = self.models.load(id).await?;
        check_request(program.predictor.signature(), &row)?;

        let started = Instant::now();
        let outputs = self.run(&program, &row).await?;
        let trace = PredictionTrace {
            trace_id: TraceId::new(),
            program_id: program.id().to_string(),
            inputs: row,
            outputs,
            timestamp: Utc::now(),
            latency: started.elapsed(),
        };

        debug!(
            "Prediction {} for {} took {:?}",
            trace.trace_id, trace.program_id, trace.latency
        );
        self.traces.record(trace.clone()).await;
        Ok(trace)
    }

    /// Run program `id` on every row in order.
    ///
    /// Rows are reduced to the program's input fields. A failing row gets
    /// empty outputs and an error status; the batch goes on. `progress` is
    /// called with `(done, total)` after each row.
    pub async fn run_batch(
        &self,
        id: &str,
        rows: Vec<Example>,
        progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> ServingResult<BatchOutput> {
        let program = self.models.load(id).await?;
        let signature = program.predictor.signature();
        let input_fields: Vec<&str> = signature.input_names().collect();
        let total = rows.len();
        info!("Running {} on {} rows", id, total);

        let mut stats = BatchStats {
            total_rows: total,
            ..BatchStats::default()
        };
        let mut results = Vec::with_capacity(total);
        let started = Instant::now();

        for (index, row) in rows.into_iter().enumerate() {
            let inputs = row.project(input_fields.iter().copied());
            let headers: Vec<&str> = row.keys().collect();
            let outcome = match validate_headers(&headers, &input_fields) {
                Ok(()) => self.run(&program, &inputs).await,
                Err(e) => Err(e),
            };

            let (outputs, status) = match outcome {
                Ok(outputs) => {
                    stats.success_count += 1;
                    (outputs, RowStatus::Success)
                }
                Err(e) => {
                    warn!("Batch row {} of {} failed: {}", index, id, e);
                    stats.error_count += 1;
                    (Example::new(), RowStatus::Error(e.to_string()))
                }
            };
            results.push(BatchRow {
                inputs,
                outputs,
                status,
            });

            if let Some(progress) = progress {
                progress(index + 1, total);
            }
        }
        stats.total_latency = started.elapsed();

        info!(
            "Batch for {} finished: {}/{} rows succeeded",
            id, stats.success_count, stats.total_rows
        );
        self.tracker
            .metrics([
                ("batch_total_rows", stats.total_rows as f64),
                ("batch_success_count", stats.success_count as f64),
                ("batch_error_count", stats.error_count as f64),
                ("batch_total_latency", stats.total_latency.as_secs_f64()),
                (
                    "batch_avg_latency_per_row",
                    stats.avg_latency_per_row().as_secs_f64(),
                ),
                ("batch_success_rate", stats.success_rate()),
            ])
            .await;

        Ok(BatchOutput {
            rows: results,
            stats,
        })
    }
}

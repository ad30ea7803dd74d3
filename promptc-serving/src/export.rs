//! Turning rated predictions into training data.

use crate::error::ServingResult;
use crate::feedback::{FeedbackRecord, FeedbackService};
use crate::traces::{PredictionTrace, TraceLog};
use promptc_common::{Example, ParseKindError, Rating};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Jsonl,
}

impl FromStr for ExportFormat {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonl" => Ok(Self::Jsonl),
            _ => Err(ParseKindError {
                kind: "export format",
                value: s.to_string(),
                expected: "json, jsonl",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Replace outputs with the user's correction when one was given
    pub use_corrected_output: bool,
    pub only_positive: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Json,
            use_corrected_output: true,
            only_positive: false,
        }
    }
}

/// One exported example: the trace joined with its feedback.
#[derive(Debug, Clone, PartialEq)]
struct TrainingRecord {
    example: Example,
    trace_id: String,
    rating: Rating,
}

impl TrainingRecord {
    fn to_json(&self) -> Value {
        let mut object: Map<String, Value> = self
            .example
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        object.insert("_trace_id".to_string(), Value::String(self.trace_id.clone()));
        object.insert(
            "_rating".to_string(),
            Value::String(self.rating.as_str().to_string()),
        );
        Value::Object(object)
    }
}

pub struct DataExporter {
    traces: Arc<TraceLog>,
    feedback: Arc<FeedbackService>,
}

impl DataExporter {
    pub fn new(traces: Arc<TraceLog>, feedback: Arc<FeedbackService>) -> Self {
        Self { traces, feedback }
    }

    async fn collect(&self, options: &ExportOptions) -> Vec<TrainingRecord> {
        let traces: HashMap<_, PredictionTrace> = self
            .traces
            .all()
            .await
            .into_iter()
            .map(|t| (t.trace_id, t))
            .collect();

        self.feedback
            .records()
            .await
            .into_iter()
            .filter(|f| !options.only_positive || f.rating.is_positive())
            .filter_map(|f| {
                let trace = traces.get(&f.trace_id)?;
                Some(join(trace, f, options.use_corrected_output))
            })
            .collect()
    }

    /// Serialize every rated trace still in the trace log.
    ///
    /// Feedback whose trace has been evicted is skipped.
    pub async fn export_training_data(&self, options: &ExportOptions) -> ServingResult<Vec<u8>> {
        let records = self.collect(options).await;
        info!(
            "Exporting {} training records as {:?}",
            records.len(),
            options.format
        );

        let bytes = match options.format {
            ExportFormat::Json => {
                let values: Vec<Value> = records.iter().map(TrainingRecord::to_json).collect();
                serde_json::to_vec_pretty(&values)?
            }
            ExportFormat::Jsonl => {
                let mut out = Vec::new();
                for record in &records {
                    serde_json::to_writer(&mut out, &record.to_json())?;
                    out.push(b'\n');
                }
                out
            }
        };
        Ok(bytes)
    }

    /// Rated traces as examples ready for another compilation.
    pub async fn to_examples(&self, options: &ExportOptions) -> Vec<Example> {
        self.collect(options)
            .await
            .into_iter()
            .map(|r| r.example)
            .collect()
    }
}

fn join(trace: &PredictionTrace, feedback: FeedbackRecord, use_corrected: bool) -> TrainingRecord {
    let mut example = trace.inputs.clone();
    for (field, value) in trace.outputs.iter() {
        example.insert(field, value);
    }
    if use_corrected {
        if let Some(corrected) = &feedback.corrected_output {
            for (field, value) in corrected.iter() {
                example.insert(field, value);
            }
        }
    }
    TrainingRecord {
        example,
        trace_id: trace.trace_id.to_string(),
        rating: feedback.rating,
    }
}

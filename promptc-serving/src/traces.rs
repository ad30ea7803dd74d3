//! In-memory log of served predictions.

use chrono::{DateTime, Utc};
use promptc_common::{Example, TraceId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::RwLock;

/// One served prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionTrace {
    pub trace_id: TraceId,
    pub program_id: String,
    pub inputs: Example,
    pub outputs: Example,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
}

/// Bounded trace log; the oldest trace is evicted once `capacity` is reached.
#[derive(Debug)]
pub struct TraceLog {
    capacity: usize,
    traces: RwLock<VecDeque<PredictionTrace>>,
}

impl TraceLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            traces: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn record(&self, trace: PredictionTrace) {
        let mut traces = self.traces.write().await;
        while traces.len() >= self.capacity {
            traces.pop_front();
        }
        traces.push_back(trace);
    }

    pub async fn get(&self, trace_id: &TraceId) -> Option<PredictionTrace> {
        self.traces
            .read()
            .await
            .iter()
            .find(|t| &t.trace_id == trace_id)
            .cloned()
    }

    pub async fn contains(&self, trace_id: &TraceId) -> bool {
        self.traces
            .read()
            .await
            .iter()
            .any(|t| &t.trace_id == trace_id)
    }

    /// Every retained trace, oldest first.
    pub async fn all(&self) -> Vec<PredictionTrace> {
        self.traces.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.traces.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.traces.read().await.is_empty()
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

//! User feedback on served predictions.

use crate::error::{ServingError, ServingResult};
use crate::traces::TraceLog;
use chrono::{DateTime, Utc};
use promptc_common::{Example, FeedbackId, Rating, TraceId};
use promptc_core::Tracker;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_FEEDBACK_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: FeedbackId,
    pub trace_id: TraceId,
    pub rating: Rating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_output: Option<Example>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Feedback as submitted by a client, rating still unparsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub trace_id: TraceId,
    pub rating: String,
    #[serde(default)]
    pub corrected_output: Option<Example>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackStats {
    pub total: usize,
    pub thumbs_up: usize,
    pub thumbs_down: usize,
    pub with_corrections: usize,
    pub with_comments: usize,
}

/// Feedback store; past `capacity` records the oldest is dropped.
pub struct FeedbackService {
    enabled: bool,
    capacity: usize,
    traces: Arc<TraceLog>,
    tracker: Tracker,
    records: RwLock<VecDeque<FeedbackRecord>>,
}

impl FeedbackService {
    pub fn new(traces: Arc<TraceLog>, enabled: bool) -> Self {
        Self {
            enabled,
            capacity: DEFAULT_FEEDBACK_CAPACITY,
            traces,
            tracker: Tracker::noop(),
            records: RwLock::new(VecDeque::new()),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_tracker(mut self, tracker: Tracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn trace_exists(&self, trace_id: &TraceId) -> bool {
        self.traces.contains(trace_id).await
    }

    /// Store feedback for a trace and return its id.
    ///
    /// The trace is not checked here; see [`FeedbackService::submit`]. When
    /// the service is disabled the record is kept locally but not sent to
    /// the experiment logger.
    pub async fn record_feedback(
        &self,
        trace_id: TraceId,
        rating: Rating,
        corrected_output: Option<Example>,
        comment: Option<String>,
        user_id: Option<String>,
    ) -> ServingResult<FeedbackId> {
        let record = FeedbackRecord {
            feedback_id: FeedbackId::new(),
            trace_id,
            rating,
            corrected_output,
            comment,
            user_id,
            timestamp: Utc::now(),
        };
        let feedback_id = record.feedback_id.clone();

        if self.enabled {
            let bytes = serde_json::to_vec_pretty(&record)?;
            self.tracker
                .artifact(&format!("feedback/{}.json", feedback_id), &bytes)
                .await;
            info!(
                "Recorded {} feedback {} for trace {}",
                rating.as_str(),
                feedback_id,
                trace_id
            );
        } else {
            debug!("Feedback logging disabled, kept {} locally", feedback_id);
        }

        let mut records = self.records.write().await;
        while records.len() >= self.capacity {
            if let Some(dropped) = records.pop_front() {
                debug!("Feedback log full, dropped {}", dropped.feedback_id);
            }
        }
        records.push_back(record);
        Ok(feedback_id)
    }

    /// Validate and record a client submission. Unknown traces are rejected.
    pub async fn submit(&self, request: FeedbackRequest) -> ServingResult<FeedbackId> {
        let rating: Rating = request.rating.parse()?;
        if !self.trace_exists(&request.trace_id).await {
            return Err(ServingError::TraceNotFound {
                trace_id: request.trace_id,
            });
        }
        self.record_feedback(
            request.trace_id,
            rating,
            request.corrected_output,
            request.comment,
            request.user_id,
        )
        .await
    }

    /// Up to `limit` records, newest first, optionally for one trace.
    pub async fn history(&self, trace_id: Option<&TraceId>, limit: usize) -> Vec<FeedbackRecord> {
        self.records
            .read()
            .await
            .iter()
            .rev()
            .filter(|r| trace_id.map_or(true, |id| &r.trace_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Every record in submission order.
    pub async fn records(&self) -> Vec<FeedbackRecord> {
        self.records.read().await.iter().cloned().collect()
    }

    pub async fn stats(&self) -> FeedbackStats {
        self.records
            .read()
            .await
            .iter()
            .fold(FeedbackStats::default(), |mut stats, record| {
                stats.total += 1;
                match record.rating {
                    Rating::ThumbsUp => stats.thumbs_up += 1,
                    Rating::ThumbsDown => stats.thumbs_down += 1,
                }
                if record.corrected_output.is_some() {
                    stats.with_corrections += 1;
                }
                if record.comment.is_some() {
                    stats.with_comments += 1;
                }
                stats
            })
    }
}

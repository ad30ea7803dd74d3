//! Serving compiled promptc programs.
//!
//! [`ModelManager`] loads programs from a [`ProgramStore`] behind a TTL
//! cache, [`ProgramRunner`] answers single requests and batches while
//! recording [`PredictionTrace`]s, [`FeedbackService`] collects ratings on
//! those traces and [`DataExporter`] turns rated traces into training data.
//! [`ServingStack`] wires all of them from a [`ServingConfig`].

#![warn(clippy::all)]
#![allow(clippy::uninlined_format_args)]

pub mod error;
pub mod export;
pub mod feedback;
pub mod models;
pub mod runner;
pub mod traces;

pub use error::{ServingError, ServingResult};
pub use export::{DataExporter, ExportFormat, ExportOptions};
pub use feedback::{FeedbackRecord, FeedbackRequest, FeedbackService, FeedbackStats};
pub use models::{CacheStats, LoadedProgram, ModelManager};
pub use runner::{validate_headers, BatchOutput, BatchRow, BatchStats, ProgramRunner, RowStatus};
pub use traces::{PredictionTrace, TraceLog};

use promptc_core::config::ServingConfig;
use promptc_core::{LanguageModel, ProgramStore, Tracker};
use std::sync::Arc;
use std::time::Duration;

/// Every serving component sharing one trace log.
pub struct ServingStack {
    pub runner: ProgramRunner,
    pub feedback: Arc<FeedbackService>,
    pub exporter: DataExporter,
}

impl ServingStack {
    pub fn new(
        store: Arc<dyn ProgramStore>,
        lm: Arc<dyn LanguageModel>,
        config: &ServingConfig,
        tracker: Tracker,
        timeout: Duration,
    ) -> Self {
        let traces = Arc::new(TraceLog::new(config.trace_capacity));
        let models = Arc::new(ModelManager::new(store, config));
        let runner = ProgramRunner::new(models, lm, traces.clone())
            .with_tracker(tracker.clone())
            .with_timeout(timeout);
        let feedback = Arc::new(
            FeedbackService::new(traces.clone(), config.feedback_enabled)
                .with_capacity(config.feedback_capacity)
                .with_tracker(tracker),
        );
        let exporter = DataExporter::new(traces, feedback.clone());
        Self {
            runner,
            feedback,
            exporter,
        }
    }
}

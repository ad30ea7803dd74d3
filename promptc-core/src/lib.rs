//! # promptc core
//!
//! `promptc-core` compiles declarative prompt programs. A program is a
//! [`Signature`] (named input and output fields plus instructions) run by a
//! [`Predictor`]. Compiling it means searching for demonstrations or
//! instructions that raise a metric on held-out data.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use promptc_common::{Example, MatchMode};
//! use promptc_core::{
//!     build_signature, CompileRequest, Compiler, ExactMatch, LanguageModel, ModelSet,
//!     PromptcConfig,
//! };
//! use std::sync::Arc;
//!
//! async fn compile(model: Arc<dyn LanguageModel>, data: Vec<Example>) -> promptc_core::CoreResult<()> {
//!     let signature = build_signature(&["topic"], &["joke"], "Tell a joke.", None, None)?;
//!     let metric = Arc::new(ExactMatch::new(vec!["joke".to_string()], MatchMode::All));
//!     let (train, validation) = data.split_at(data.len() * 4 / 5);
//!
//!     let request = CompileRequest::new(signature, metric, ModelSet::single(model))
//!         .with_data(train.to_vec(), validation.to_vec());
//!     let result = Compiler::new(PromptcConfig::default()).compile(request).await?;
//!     println!("{:.2} -> {:.2}", result.baseline_score, result.evaluation_score);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`signature`]: field declarations and example validation
//! - [`module`]: predictors that turn a signature into a model call
//! - [`metrics`]: exact match, cosine similarity and LLM judges
//! - [`optimizer`]: search strategies behind the [`Optimizer`] trait
//! - [`evaluate`]: bounded-concurrency evaluation in input order
//! - [`compiler`]: the compilation loop and its state machine
//! - [`store`] and [`tracking`]: persistence and experiment logging

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

pub mod compiler;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod lm;
pub mod metrics;
pub mod module;
pub mod optimizer;
pub mod signature;
pub mod store;
pub mod tracking;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types for convenience
pub use compiler::{
    CompilationResult, CompileRequest, CompileState, Compiler, ModelSet, ScoreImprovement,
    StageTimings,
};
pub use config::PromptcConfig;
pub use error::{
    ConfigError, CoreError, CoreResult, ErrorKind, JudgeError, LmError, LmResult, MetricError,
    SignatureError, Stage, StoreError,
};
pub use evaluate::{EvaluationReport, Evaluator, ExampleResult};
pub use lm::{EmbeddingService, LanguageModel, LmRequest, LmResponse};
pub use metrics::{
    CosineSimilarity, ExactMatch, FnMetric, JudgeProgram, Metric, MetricConfig, MetricFactory,
};
pub use module::Predictor;
pub use optimizer::{optimizer_for, Optimizer};
pub use signature::{build_signature, Signature};
pub use store::{JsonFileStore, MemoryStore, ProgramArtifact, ProgramRecord, ProgramStore};
pub use tracking::{logger_from_config, ExperimentLogger, Tracker};

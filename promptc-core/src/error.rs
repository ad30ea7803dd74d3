//! Error types for signature building, scoring and compilation.
//!
//! Every failure maps to one of four [`ErrorKind`]s. Configuration errors
//! surface before any language-model call, per-example errors are recovered
//! by scoring the example 0.0, systemic errors abort the compilation run and
//! telemetry errors are never propagated.

use crate::evaluate::ExampleResult;
use std::fmt;
use thiserror::Error;

/// The main error type for promptc core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid signature definition or example shape
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    /// Judge construction or scoring errors
    #[error("Judge error: {0}")]
    Judge(#[from] JudgeError),

    /// Metric scoring errors
    #[error("Metric error: {0}")]
    Metric(#[from] MetricError),

    /// Language model errors
    #[error("Language model error: {0}")]
    Lm(#[from] LmError),

    /// Configuration errors (invalid config files, missing parameters, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Program store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Not enough data to run the requested operation
    #[error("Insufficient data: {reason}")]
    InsufficientData { reason: String },

    /// The run was cancelled through its cancellation token; completed
    /// results are kept
    #[error("Cancelled during {stage}{}", fmt_index(.example_index))]
    Cancelled {
        stage: Stage,
        example_index: Option<usize>,
        /// Results of the interrupted stage that had completed
        partial: Vec<ExampleResult>,
        /// Baseline results, when the baseline had finished
        baseline: Vec<ExampleResult>,
    },

    /// A systemic failure aborted compilation; completed results are kept
    #[error("Compilation failed during {stage}{}: {source}", fmt_index(.example_index))]
    Compilation {
        stage: Stage,
        example_index: Option<usize>,
        #[source]
        source: Box<CoreError>,
        /// Results of the failed stage that had completed
        partial: Vec<ExampleResult>,
        /// Baseline results, when the baseline had finished
        baseline: Vec<ExampleResult>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Generic errors for cases not covered by specific variants
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn fmt_index(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" (example {})", i),
        None => String::new(),
    }
}

/// How an error is handled by the compilation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before any language-model call; fatal
    Configuration,
    /// Recovered by scoring the example 0.0
    PerExample,
    /// Aborts the run
    Systemic,
    /// Logged and swallowed
    Telemetry,
}

/// Stage of a compilation run an error or cancellation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Baseline,
    Optimization,
    FinalEvaluation,
    Serving,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validation => "validation",
            Stage::Baseline => "baseline evaluation",
            Stage::Optimization => "optimization",
            Stage::FinalEvaluation => "final evaluation",
            Stage::Serving => "serving",
        };
        f.write_str(name)
    }
}

/// Which side of a signature a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Input,
    Output,
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRole::Input => f.write_str("input"),
            FieldRole::Output => f.write_str("output"),
        }
    }
}

/// Invalid signature definitions and examples that do not fit a signature.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Signature must declare at least one {role} field")]
    NoFields { role: FieldRole },

    #[error("Empty {role} field name at position {position}")]
    EmptyFieldName { role: FieldRole, position: usize },

    #[error("Invalid {role} field name '{name}': use letters, digits and underscores, not starting with a digit")]
    InvalidFieldName { role: FieldRole, name: String },

    #[error("Duplicate {role} field '{name}'")]
    DuplicateField { role: FieldRole, name: String },

    #[error("{descriptions} {role} descriptions given for {fields} fields")]
    TooManyDescriptions {
        role: FieldRole,
        fields: usize,
        descriptions: usize,
    },

    #[error("Example is missing {role} field '{field}'")]
    MissingField { role: FieldRole, field: String },

    #[error("Unknown field '{field}' is neither an input nor an output")]
    UnknownField { field: String },
}

/// Language model provider errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LmError {
    #[error("Rate limited by provider: {reason}")]
    RateLimited { reason: String },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    #[error("HTTP error: {status_code} - {reason}")]
    Http { status_code: u16, reason: String },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Invalid response from model: {reason}")]
    InvalidResponse { reason: String },
}

impl LmError {
    /// Authentication failures affect every call and abort the run.
    pub fn is_systemic(&self) -> bool {
        matches!(self, LmError::Auth { .. })
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            LmError::RateLimited { .. } => true,
            LmError::Timeout { .. } => true,
            LmError::Network { .. } => true,
            LmError::Http { status_code, .. } => *status_code >= 500,
            LmError::Auth { .. } => false,
            LmError::InvalidResponse { .. } => false,
        }
    }
}

/// Failures while computing a metric score.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Embedding failed: {source}")]
    Embedding {
        #[source]
        source: LmError,
    },

    #[error("Embedding dimensions differ: gold {gold}, prediction {prediction}")]
    DimensionMismatch { gold: usize, prediction: usize },

    #[error(transparent)]
    Judge(#[from] JudgeError),
}

impl MetricError {
    pub fn is_systemic(&self) -> bool {
        match self {
            MetricError::Embedding { source } => source.is_systemic(),
            MetricError::DimensionMismatch { .. } => false,
            MetricError::Judge(err) => err.is_systemic(),
        }
    }
}

/// Judge subprogram errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JudgeError {
    #[error("Judge configuration '{id}' not found")]
    ConfigNotFound { id: String },

    #[error("Compiled judge artifact '{id}' not found")]
    ArtifactNotFound { id: String },

    #[error("Invalid judge configuration '{id}': {reason}")]
    InvalidConfig { id: String, reason: String },

    #[error("Judge input field '{field}' found in neither gold nor prediction")]
    InputFieldMissing { field: String },

    #[error("No numeric score in judge field '{field}': {raw:?}")]
    ScoreParse { field: String, raw: String },

    #[error("Judge invocation failed: {0}")]
    Invocation(#[from] LmError),
}

impl JudgeError {
    /// Errors raised while building the judge, before any scoring.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            JudgeError::ConfigNotFound { .. }
                | JudgeError::ArtifactNotFound { .. }
                | JudgeError::InvalidConfig { .. }
        )
    }

    pub fn is_systemic(&self) -> bool {
        match self {
            JudgeError::Invocation(err) => err.is_systemic(),
            _ => false,
        }
    }
}

/// Configuration-related errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format in {path}: {reason}")]
    InvalidFormat { path: String, reason: String },

    #[error("Missing required configuration parameter: {parameter}")]
    MissingParameter { parameter: String },

    #[error("Invalid value for parameter '{parameter}': {value} - {reason}")]
    InvalidValue {
        parameter: String,
        value: String,
        reason: String,
    },
}

/// Program store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid program id '{id}'")]
    InvalidId { id: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {kind} at {path}: {reason}")]
    Malformed {
        kind: &'static str,
        path: String,
        reason: String,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Experiment tracker failures. Always swallowed by callers.
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Tracker IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracker serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tracker unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Convenience type alias for Results using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

/// Convenience type alias for language model results.
pub type LmResult<T> = Result<T, LmError>;

impl CoreError {
    /// Create a new internal error with a custom message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn insufficient_data(reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            reason: reason.into(),
        }
    }

    /// Classify this error for the compilation loop.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Signature(_) | CoreError::Config(_) | CoreError::Store(_) => {
                ErrorKind::Configuration
            }
            CoreError::Judge(err) if err.is_configuration() => ErrorKind::Configuration,
            CoreError::Judge(err) if err.is_systemic() => ErrorKind::Systemic,
            CoreError::Judge(_) => ErrorKind::PerExample,
            CoreError::Metric(err) if err.is_systemic() => ErrorKind::Systemic,
            CoreError::Metric(_) => ErrorKind::PerExample,
            CoreError::Lm(err) if err.is_systemic() => ErrorKind::Systemic,
            CoreError::Lm(_) => ErrorKind::PerExample,
            CoreError::Serialization { .. } => ErrorKind::Configuration,
            CoreError::InsufficientData { .. }
            | CoreError::Cancelled { .. }
            | CoreError::Compilation { .. }
            | CoreError::Internal { .. } => ErrorKind::Systemic,
        }
    }

    /// Get the error category for this error.
    pub fn category(&self) -> &'static str {
        match self {
            CoreError::Signature(_) => "signature",
            CoreError::Judge(_) => "judge",
            CoreError::Metric(_) => "metric",
            CoreError::Lm(_) => "lm",
            CoreError::Config(_) => "config",
            CoreError::Store(_) => "store",
            CoreError::InsufficientData { .. } => "insufficient_data",
            CoreError::Cancelled { .. } => "cancelled",
            CoreError::Compilation { .. } => "compilation",
            CoreError::Serialization { .. } => "serialization",
            CoreError::Internal { .. } => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Lm(err) => err.is_retryable(),
            CoreError::Judge(JudgeError::Invocation(err)) => err.is_retryable(),
            CoreError::Compilation { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Innermost error, looking through compilation wrappers.
    pub fn root(&self) -> &CoreError {
        match self {
            CoreError::Compilation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn cancelled(stage: Stage, example_index: Option<usize>) -> Self {
        CoreError::Cancelled {
            stage,
            example_index,
            partial: Vec::new(),
            baseline: Vec::new(),
        }
    }

    /// Results of the aborted stage that completed before a systemic
    /// failure or cancellation.
    pub fn partial_results(&self) -> &[ExampleResult] {
        match self {
            CoreError::Compilation { partial, .. } | CoreError::Cancelled { partial, .. } => {
                partial
            }
            _ => &[],
        }
    }

    /// Baseline results of a run that aborted after the baseline finished.
    pub fn baseline_results(&self) -> &[ExampleResult] {
        match self {
            CoreError::Compilation { baseline, .. } | CoreError::Cancelled { baseline, .. } => {
                baseline
            }
            _ => &[],
        }
    }

    /// Attach finished baseline results to an aborted run. Other errors are
    /// returned unchanged.
    pub fn with_baseline(mut self, results: &[ExampleResult]) -> Self {
        if let CoreError::Compilation { baseline, .. } | CoreError::Cancelled { baseline, .. } =
            &mut self
        {
            *baseline = results.to_vec();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let auth: CoreError = LmError::Auth {
            reason: "bad key".to_string(),
        }
        .into();
        assert_eq!(auth.kind(), ErrorKind::Systemic);

        let timeout: CoreError = LmError::Timeout { timeout_ms: 100 }.into();
        assert_eq!(timeout.kind(), ErrorKind::PerExample);
        assert!(timeout.is_retryable());

        let missing: CoreError = JudgeError::ConfigNotFound {
            id: "judge".to_string(),
        }
        .into();
        assert_eq!(missing.kind(), ErrorKind::Configuration);

        let parse: CoreError = JudgeError::ScoreParse {
            field: "score".to_string(),
            raw: "great".to_string(),
        }
        .into();
        assert_eq!(parse.kind(), ErrorKind::PerExample);

        let judge_auth: CoreError = MetricError::Judge(JudgeError::Invocation(LmError::Auth {
            reason: "expired".to_string(),
        }))
        .into();
        assert_eq!(judge_auth.kind(), ErrorKind::Systemic);
    }

    #[test]
    fn test_compilation_error_root_and_display() {
        let err = CoreError::Compilation {
            stage: Stage::Baseline,
            example_index: Some(3),
            source: Box::new(LmError::Auth {
                reason: "revoked".to_string(),
            }
            .into()),
            partial: Vec::new(),
            baseline: Vec::new(),
        };

        assert!(matches!(err.root(), CoreError::Lm(LmError::Auth { .. })));
        let message = err.to_string();
        assert!(message.contains("baseline evaluation"));
        assert!(message.contains("example 3"));
        assert_eq!(err.category(), "compilation");
    }

    #[test]
    fn test_http_retryable_only_for_server_errors() {
        let server = LmError::Http {
            status_code: 503,
            reason: "unavailable".to_string(),
        };
        let client = LmError::Http {
            status_code: 400,
            reason: "bad request".to_string(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
    }
}

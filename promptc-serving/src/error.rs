//! Error types for serving compiled programs.

use promptc_common::{ParseKindError, TraceId};
use promptc_core::{CoreError, LmError, SignatureError, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServingError {
    #[error("Program store error: {0}")]
    Store(#[from] StoreError),

    #[error("Stored program is invalid: {0}")]
    Signature(#[from] SignatureError),

    #[error("Prediction failed: {0}")]
    Lm(#[from] LmError),

    #[error("Missing required fields: {missing}. Expected fields: {expected}", missing = .missing.join(", "), expected = .expected.join(", "))]
    MissingFields {
        missing: Vec<String>,
        expected: Vec<String>,
    },

    #[error("Unexpected input field '{field}'")]
    UnexpectedField { field: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Trace '{trace_id}' not found")]
    TraceNotFound { trace_id: TraceId },

    #[error(transparent)]
    InvalidKind(#[from] ParseKindError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ServingError {
    /// Errors caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        match self {
            ServingError::MissingFields { .. }
            | ServingError::UnexpectedField { .. }
            | ServingError::InvalidRequest { .. }
            | ServingError::TraceNotFound { .. }
            | ServingError::InvalidKind(_) => true,
            ServingError::Store(err) => err.is_not_found(),
            _ => false,
        }
    }
}

pub type ServingResult<T> = Result<T, ServingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_message() {
        let err = ServingError::MissingFields {
            missing: vec!["context".to_string()],
            expected: vec!["question".to_string(), "context".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Missing required fields: context. Expected fields: question, context"
        );
        assert!(err.is_client_error());
    }

    #[test]
    fn test_not_found_is_client_error() {
        let err: ServingError = StoreError::NotFound {
            kind: "program record",
            id: "nope".to_string(),
        }
        .into();
        assert!(err.is_client_error());

        let err: ServingError = LmError::Auth {
            reason: "bad key".to_string(),
        }
        .into();
        assert!(!err.is_client_error());
    }
}

pub mod ids;
pub mod types;

pub use ids::{
    dataset_fingerprint, human_readable_id, truncate_param, FeedbackId, TraceId,
    PARAM_MAX_LENGTH,
};
pub use types::{
    Demonstration, Example, FieldSpec, MatchMode, MetricKind, ModuleKind, OptimizerKind,
    ParseKindError, Prediction, Rating,
};

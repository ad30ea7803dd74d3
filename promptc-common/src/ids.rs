use crate::types::{Example, ModuleKind, OptimizerKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Maximum length of a parameter value sent to an experiment tracker.
pub const PARAM_MAX_LENGTH: usize = 500;

/// Identifier of a served prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub Uuid);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TraceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a feedback record, `fb-` followed by 16 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(String);

impl FeedbackId {
    pub fn new() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("fb-{}", &hex[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FeedbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Builds the human readable program id:
/// `{Signature}-{Model}_{Module}_{Optimizer}-{YYYYMMDD}`.
///
/// `["topic"] -> ["joke"]` on `gpt-4o-mini` with `Predict` and
/// `BootstrapFewShot` on 2024-03-01 gives
/// `Topic:Joke-Gpt4oMini_Predict_Bootstrapfewshot-20240301`.
pub fn human_readable_id(
    inputs: &[String],
    outputs: &[String],
    module: ModuleKind,
    model: &str,
    optimizer: OptimizerKind,
    date: NaiveDate,
) -> String {
    let signature: String = inputs
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(":"))
        .chain(outputs.iter().map(String::as_str))
        .flat_map(|part| part.split('_'))
        .map(capitalize)
        .collect();
    let model: String = model.split('-').map(capitalize).collect();

    format!(
        "{}-{}_{}_{}-{}",
        signature,
        model,
        module.as_str(),
        capitalize(optimizer.as_str()),
        date.format("%Y%m%d")
    )
}

/// SHA-256 over the examples in order, each field length-prefixed so that
/// no two datasets share an encoding. Hex encoded, 64 characters.
pub fn dataset_fingerprint(examples: &[Example]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((examples.len() as u64).to_le_bytes());
    for example in examples {
        hasher.update((example.len() as u64).to_le_bytes());
        for (field, value) in example.iter() {
            for part in [field, value] {
                hasher.update((part.len() as u64).to_le_bytes());
                hasher.update(part.as_bytes());
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Truncates a tracker parameter to [`PARAM_MAX_LENGTH`] characters,
/// ending with `...` when shortened.
pub fn truncate_param(value: &str) -> String {
    if value.chars().count() <= PARAM_MAX_LENGTH {
        return value.to_string();
    }
    let kept: String = value.chars().take(PARAM_MAX_LENGTH - 3).collect();
    format!("{}...", kept)
}

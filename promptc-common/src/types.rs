use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a kind name cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind}: '{value}' (expected one of: {expected})")]
pub struct ParseKindError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// A named field of a signature with an optional free-text description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Field name to value mapping used for training, validation and inference rows.
///
/// Keys are kept sorted so that serialization and fingerprints are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Example {
    values: BTreeMap<String, String>,
}

impl Example {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of this example restricted to the given fields. Absent fields are skipped.
    pub fn project<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Example {
        fields
            .into_iter()
            .filter_map(|f| self.values.get(f).map(|v| (f.to_string(), v.clone())))
            .collect()
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.values
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Example {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for Example {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }
}

/// Output of running a module: one value per output field, plus the
/// intermediate reasoning when chain-of-thought style is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reasoning: Option<String>,
}

impl Prediction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Output fields as an [`Example`], e.g. to use as a demonstration.
    pub fn to_example(&self) -> Example {
        Example::from(self.fields.clone())
    }
}

/// A few-shot demonstration attached to a compiled module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demonstration {
    pub inputs: Example,
    pub outputs: Example,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Produced by a teacher run rather than copied from a labeled example
    #[serde(default)]
    pub augmented: bool,
}

impl Demonstration {
    /// Demonstration taken verbatim from a labeled example.
    pub fn labeled(inputs: Example, outputs: Example) -> Self {
        Self {
            inputs,
            outputs,
            reasoning: None,
            augmented: false,
        }
    }

    /// Demonstration built from a teacher prediction that passed the metric.
    pub fn augmented(inputs: Example, prediction: &Prediction) -> Self {
        Self {
            inputs,
            outputs: prediction.to_example(),
            reasoning: prediction.reasoning().map(str::to_string),
            augmented: true,
        }
    }
}

/// Prediction pipeline style bound to a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    Predict,
    ChainOfThought,
    ChainOfThoughtWithHint,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Predict => "Predict",
            Self::ChainOfThought => "ChainOfThought",
            Self::ChainOfThoughtWithHint => "ChainOfThoughtWithHint",
        }
    }

    /// Whether the module asks the model for intermediate reasoning.
    pub fn uses_reasoning(&self) -> bool {
        !matches!(self, Self::Predict)
    }
}

impl Default for ModuleKind {
    fn default() -> Self {
        Self::Predict
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Predict" | "predict" => Ok(Self::Predict),
            "ChainOfThought" | "chain_of_thought" | "cot" => Ok(Self::ChainOfThought),
            "ChainOfThoughtWithHint" | "chain_of_thought_with_hint" => {
                Ok(Self::ChainOfThoughtWithHint)
            }
            _ => Err(ParseKindError {
                kind: "module",
                value: s.to_string(),
                expected: "Predict, ChainOfThought, ChainOfThoughtWithHint",
            }),
        }
    }
}

/// Search strategy used during compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerKind {
    BootstrapFewShot,
    BootstrapFewShotWithRandomSearch,
    #[serde(alias = "COPRO")]
    InstructionSearch,
    #[serde(rename = "MIPROv2")]
    MiproV2,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BootstrapFewShot => "BootstrapFewShot",
            Self::BootstrapFewShotWithRandomSearch => "BootstrapFewShotWithRandomSearch",
            Self::InstructionSearch => "InstructionSearch",
            Self::MiproV2 => "MIPROv2",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BootstrapFewShot" | "bootstrap" => Ok(Self::BootstrapFewShot),
            "BootstrapFewShotWithRandomSearch" | "random_search" => {
                Ok(Self::BootstrapFewShotWithRandomSearch)
            }
            "InstructionSearch" | "COPRO" | "instruction_search" => Ok(Self::InstructionSearch),
            "MIPROv2" | "mipro" => Ok(Self::MiproV2),
            _ => Err(ParseKindError {
                kind: "optimizer",
                value: s.to_string(),
                expected: "BootstrapFewShot, BootstrapFewShotWithRandomSearch, InstructionSearch, MIPROv2",
            }),
        }
    }
}

/// Evaluation metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    #[serde(alias = "Exact Match")]
    ExactMatch,
    #[serde(alias = "Cosine Similarity")]
    CosineSimilarity,
    #[serde(alias = "LLM-as-a-Judge")]
    LlmJudge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::CosineSimilarity => "cosine_similarity",
            Self::LlmJudge => "llm_judge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact_match" | "Exact Match" => Ok(Self::ExactMatch),
            "cosine_similarity" | "Cosine Similarity" => Ok(Self::CosineSimilarity),
            "llm_judge" | "LLM-as-a-Judge" => Ok(Self::LlmJudge),
            _ => Err(ParseKindError {
                kind: "metric",
                value: s.to_string(),
                expected: "exact_match, cosine_similarity, llm_judge",
            }),
        }
    }
}

/// Which configured output fields an exact-match metric compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Every configured field must match
    #[default]
    All,
    /// Only the first configured field is compared
    First,
}

/// User rating attached to a served prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    ThumbsUp,
    ThumbsDown,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThumbsUp => "thumbs_up",
            Self::ThumbsDown => "thumbs_down",
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Self::ThumbsUp)
    }
}

impl FromStr for Rating {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumbs_up" => Ok(Self::ThumbsUp),
            "thumbs_down" => Ok(Self::ThumbsDown),
            _ => Err(ParseKindError {
                kind: "rating",
                value: s.to_string(),
                expected: "thumbs_up, thumbs_down",
            }),
        }
    }
}

use super::{Metric, Trace};
use crate::error::MetricError;
use async_trait::async_trait;
use promptc_common::{Example, MatchMode, Prediction};

/// 1.0 when the configured output fields equal the gold values exactly,
/// else 0.0. A field missing from the prediction is a mismatch.
#[derive(Debug, Clone)]
pub struct ExactMatch {
    fields: Vec<String>,
    mode: MatchMode,
}

impl ExactMatch {
    pub fn new(fields: Vec<String>, mode: MatchMode) -> Self {
        Self { fields, mode }
    }

    fn compared(&self) -> &[String] {
        match self.mode {
            MatchMode::All => &self.fields,
            MatchMode::First => &self.fields[..self.fields.len().min(1)],
        }
    }
}

#[async_trait]
impl Metric for ExactMatch {
    fn name(&self) -> &str {
        "exact_match"
    }

    async fn score(
        &self,
        gold: &Example,
        prediction: &Prediction,
        _trace: Option<&Trace>,
    ) -> Result<f64, MetricError> {
        let matched = self.compared().iter().all(|field| {
            match (gold.get(field), prediction.get(field)) {
                (Some(expected), Some(actual)) => expected == actual,
                _ => false,
            }
        });
        Ok(if matched { 1.0 } else { 0.0 })
    }
}

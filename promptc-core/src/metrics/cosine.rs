use super::{Metric, Trace};
use crate::error::MetricError;
use crate::lm::EmbeddingService;
use async_trait::async_trait;
use promptc_common::{Example, Prediction};
use std::sync::Arc;

/// Cosine similarity of the embedded output fields.
///
/// Each configured field is embedded separately on both sides and the
/// vectors are concatenated in field order before comparing. The result is
/// clamped to `[0, 1]`.
pub struct CosineSimilarity {
    fields: Vec<String>,
    embeddings: Arc<dyn EmbeddingService>,
}

impl CosineSimilarity {
    pub fn new(fields: Vec<String>, embeddings: Arc<dyn EmbeddingService>) -> Self {
        Self { fields, embeddings }
    }

    async fn embed_all<'a>(
        &self,
        values: impl Iterator<Item = &'a str>,
    ) -> Result<Vec<f32>, MetricError> {
        let mut joined = Vec::new();
        for value in values {
            let vector = self
                .embeddings
                .embed(value)
                .await
                .map_err(|source| MetricError::Embedding { source })?;
            joined.extend(vector);
        }
        Ok(joined)
    }
}

/// Cosine of two vectors. Zero-norm inputs give 0.0.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl Metric for CosineSimilarity {
    fn name(&self) -> &str {
        "cosine_similarity"
    }

    async fn score(
        &self,
        gold: &Example,
        prediction: &Prediction,
        _trace: Option<&Trace>,
    ) -> Result<f64, MetricError> {
        let mut gold_values = Vec::with_capacity(self.fields.len());
        let mut predicted_values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match (gold.get(field), prediction.get(field)) {
                (Some(g), Some(p)) => {
                    gold_values.push(g);
                    predicted_values.push(p);
                }
                _ => return Ok(0.0),
            }
        }

        let gold_vector = self.embed_all(gold_values.into_iter()).await?;
        let predicted_vector = self.embed_all(predicted_values.into_iter()).await?;
        if gold_vector.len() != predicted_vector.len() {
            return Err(MetricError::DimensionMismatch {
                gold: gold_vector.len(),
                prediction: predicted_vector.len(),
            });
        }

        let similarity = cosine(&gold_vector, &predicted_vector);
        if !similarity.is_finite() {
            return Ok(0.0);
        }
        Ok(similarity.clamp(0.0, 1.0))
    }
}

//! Deterministic feature-hashing embedder.

use async_trait::async_trait;

use crate::error::{SimpleMemError, SimpleMemResult};
use crate::text::{content_terms, tokenize};
use crate::traits::{Embedder, EmbeddingAction};
use crate::vector::l2_normalize;

const BIGRAM_WEIGHT: f32 = 0.5;

/// Embeds text by hashing unigrams and bigrams of its content terms into a
/// fixed number of signed buckets, then L2-normalizing.
///
/// Texts sharing vocabulary get high cosine similarity, identical texts get
/// identical vectors. No model is involved.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> SimpleMemResult<Self> {
        if dimension == 0 {
            return Err(SimpleMemError::invalid_config(
                "embedding_dims",
                "must be greater than 0",
            ));
        }
        Ok(Self { dimension })
    }

    /// Synchronous embedding, usable outside an async context.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut terms = content_terms(text);
        if terms.is_empty() {
            terms = tokenize(text);
        }

        let mut vector = vec![0.0f32; self.dimension];
        for term in &terms {
            self.add_feature(&mut vector, term, 1.0);
        }
        for pair in terms.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]), BIGRAM_WEIGHT);
        }
        l2_normalize(&mut vector);
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = md5::compute(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest.0[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest.0[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(
        &self,
        text: &str,
        _action: Option<EmbeddingAction>,
    ) -> SimpleMemResult<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(256).unwrap();
        let a = embedder.embed_text("Alice orders a latte");
        let b = embedder.embed_text("Alice orders a latte");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let embedder = HashingEmbedder::new(1536).unwrap();
        let query = embedder.embed_text("Alice coffee plans");
        let related = embedder.embed_text("Alice will meet Bob for coffee");
        let unrelated = embedder.embed_text("the weather in Paris is rainy");
        assert!(
            cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated)
        );
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[tokio::test]
    async fn test_trait_dimension() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let v = embedder.embed("hello world", None).await.unwrap();
        assert_eq!(v.len(), embedder.dimension());
    }
}

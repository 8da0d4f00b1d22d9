//! Embedder trait and related types.

use async_trait::async_trait;

use crate::error::SimpleMemResult;

/// The action context for embedding (some models embed queries differently).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingAction {
    /// Indexing an entry.
    #[default]
    Add,
    /// Embedding a query.
    Search,
}

/// Dense embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text.
    async fn embed(&self, text: &str, action: Option<EmbeddingAction>)
        -> SimpleMemResult<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch).
    async fn embed_batch(
        &self,
        texts: &[String],
        action: Option<EmbeddingAction>,
    ) -> SimpleMemResult<Vec<Vec<f32>>> {
        // Default implementation: sequential embedding
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text, action).await?);
        }
        Ok(embeddings)
    }

    /// Get the dimension of the embeddings.
    fn dimension(&self) -> usize;

    /// Get the model name.
    fn model_name(&self) -> &str;
}

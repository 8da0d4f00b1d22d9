//! Injected capabilities used by retrieval and consolidation.

use async_trait::async_trait;

use crate::error::SimpleMemResult;
use crate::types::MemoryAtom;

/// Estimates how much context a query needs.
#[async_trait]
pub trait ComplexityEstimator: Send + Sync {
    /// Complexity in `[0, 1]`; values outside the range are clamped by the caller.
    async fn estimate(&self, query: &str) -> SimpleMemResult<f32>;
}

/// Writes the generalized statement for a cluster of atoms.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Produce molecule content. `atoms` is sorted by timestamp and never empty.
    async fn synthesize(&self, atoms: &[MemoryAtom]) -> SimpleMemResult<String>;
}

/// Decomposes a query into independently scored sub-queries.
#[async_trait]
pub trait QueryPlanner: Send + Sync {
    /// Sub-queries to score. Returning the query itself disables planning.
    async fn plan(&self, query: &str) -> SimpleMemResult<Vec<String>>;
}

/// Judges whether retrieved context answers a query.
#[async_trait]
pub trait Reflector: Send + Sync {
    /// Follow-up queries for what `context` is missing. `context` holds the
    /// ranked `[timestamp]: content` lines. An empty result means the
    /// context is sufficient.
    async fn reflect(&self, query: &str, context: &[String]) -> SimpleMemResult<Vec<String>>;
}

//! Adaptive retrieval.
//!
//! Each query is scored over three layers at once:
//! - Semantic: cosine similarity to the query embedding
//! - Lexical: tantivy BM25 over an in-RAM index of the candidate set
//! - Symbolic: hard metadata/time constraints filter, soft ones add a bonus
//!
//! The result count grows with estimated query complexity, an optional
//! reflector adds follow-up sub-queries, and the context is cut to a token
//! budget.

mod config;
mod constraints;
pub mod context;
mod engine;
mod lexical;
pub mod scoring;

pub use config::{CandidateMode, LayerLimits, RetrievalConfig, MAX_REFLECTION_ROUNDS};
pub use constraints::QueryConstraints;
pub use engine::{QueryResult, RankedEntry, RetrievalEngine, RetrievalSignals};

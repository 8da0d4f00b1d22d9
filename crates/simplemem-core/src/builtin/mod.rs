//! Built-in deterministic capabilities.
//!
//! These need no model or network access and make the engine usable out of
//! the box. Production deployments inject their own implementations of the
//! traits in [`crate::traits`].

mod complexity;
mod embedder;
mod planner;
mod reflector;
mod synthesizer;

pub use complexity::HeuristicComplexity;
pub use embedder::HashingEmbedder;
pub use planner::ConjunctionPlanner;
pub use reflector::LlmReflector;
pub use synthesizer::{ExtractiveSynthesizer, LlmSynthesizer};

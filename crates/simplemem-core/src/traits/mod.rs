//! Capability traits injected into the engine.

mod capabilities;
mod embedder;
mod llm;

pub use capabilities::*;
pub use embedder::*;
pub use llm::*;

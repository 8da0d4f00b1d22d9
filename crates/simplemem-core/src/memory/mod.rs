//! Memory module - the facade over ingestion, retrieval and consolidation.

mod builder;
mod main;

pub use builder::MemoryBuilder;
pub use main::Memory;

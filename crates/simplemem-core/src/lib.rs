//! simplemem-core - long-term conversational memory.
//!
//! Dialogue is filtered by an entropy gate, decomposed into self-contained
//! atoms with absolute timestamps, indexed on three layers (dense, lexical,
//! symbolic), consolidated in the background into molecules and retrieved
//! with a hybrid score whose depth follows query complexity.
//!
//! # Example
//!
//! ```ignore
//! use simplemem_core::{Memory, MemoryConfig, QueryConstraints};
//!
//! let memory = Memory::from_config(MemoryConfig::default())?;
//!
//! memory.ingest("Alice: I'll meet Bob for coffee next Monday").await?;
//! let result = memory.query("What did Alice plan with Bob?", None).await?;
//! println!("{}", result.context);
//!
//! let report = memory.consolidate(None).await?;
//! ```

pub mod builtin;
pub mod config;
pub mod consolidation;
pub mod error;
pub mod index;
pub mod ingestion;
pub mod memory;
pub mod retrieval;
pub mod text;
pub mod traits;
pub mod types;
pub mod vector;

// Re-export commonly used types
pub use config::{MemoryConfig, StorageBackend, StorageConfig};
pub use consolidation::{ConsolidationConfig, ConsolidationReport, ConsolidationScope};
pub use error::{ErrorCode, SimpleMemError, SimpleMemResult};
pub use index::{EntryStore, InMemoryStore, SqliteStore, StoreStats};
pub use ingestion::{GateDecision, IngestResult, WindowReport};
pub use memory::{Memory, MemoryBuilder};
pub use retrieval::{CandidateMode, QueryConstraints, QueryResult, RankedEntry, RetrievalConfig};
pub use traits::{
    ComplexityEstimator, Embedder, EmbeddingAction, Llm, QueryPlanner, Reflector, Synthesizer,
};
pub use types::{
    EntryKind, EntryStatus, Filter, IngestInput, MemoryAtom, MemoryMolecule, Utterance,
};

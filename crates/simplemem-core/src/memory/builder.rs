//! Assembly of a [`Memory`] from configuration and injected capabilities.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use super::main::Memory;
use crate::builtin::{ConjunctionPlanner, ExtractiveSynthesizer, HashingEmbedder, HeuristicComplexity};
use crate::config::{MemoryConfig, StorageBackend};
use crate::consolidation::ConsolidationManager;
use crate::error::{SimpleMemError, SimpleMemResult};
use crate::index::{EntryStore, InMemoryStore, SqliteStore, TriLayerIndexer};
use crate::ingestion::{Atomizer, EntropyGate, RecentHistory};
use crate::retrieval::RetrievalEngine;
use crate::traits::{ComplexityEstimator, Embedder, QueryPlanner, Reflector, Synthesizer};

/// Stored atoms read per history frame when rebuilding the gate history.
const SEED_ATOMS_PER_WINDOW: usize = 64;

/// Builder for [`Memory`]. Any capability left unset falls back to the
/// deterministic built-in.
pub struct MemoryBuilder {
    config: MemoryConfig,
    store: Option<Arc<dyn EntryStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    complexity: Option<Arc<dyn ComplexityEstimator>>,
    planner: Option<Arc<dyn QueryPlanner>>,
    reflector: Option<Arc<dyn Reflector>>,
}

impl MemoryBuilder {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            store: None,
            embedder: None,
            synthesizer: None,
            complexity: None,
            planner: None,
            reflector: None,
        }
    }

    /// Use `store` instead of the configured backend.
    pub fn store(mut self, store: Arc<dyn EntryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn complexity(mut self, complexity: Arc<dyn ComplexityEstimator>) -> Self {
        self.complexity = Some(complexity);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn QueryPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Enable follow-up retrieval rounds; see `RetrievalConfig::reflection_rounds`.
    pub fn reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    pub fn build(self) -> SimpleMemResult<Memory> {
        let config = self.config;
        config.validate()?;

        let embedder: Arc<dyn Embedder> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(HashingEmbedder::new(config.index.embedding_dims)?),
        };
        if embedder.dimension() != config.index.embedding_dims {
            return Err(SimpleMemError::invalid_config(
                "index.embedding_dims",
                format!(
                    "embedder {} produces {} dimensions, expected {}",
                    embedder.model_name(),
                    embedder.dimension(),
                    config.index.embedding_dims
                ),
            ));
        }

        let store: Arc<dyn EntryStore> = match self.store {
            Some(store) => store,
            None => match config.storage.backend {
                StorageBackend::Memory => Arc::new(InMemoryStore::new()),
                StorageBackend::Sqlite => Arc::new(SqliteStore::new(&config.storage.path)?),
            },
        };

        let indexer = Arc::new(TriLayerIndexer::new(store.clone(), embedder.clone()));
        let synthesizer: Arc<dyn Synthesizer> = match self.synthesizer {
            Some(synthesizer) => synthesizer,
            None => Arc::new(ExtractiveSynthesizer::new()),
        };
        let consolidator = Arc::new(ConsolidationManager::new(
            indexer.clone(),
            synthesizer,
            config.consolidation.clone(),
        ));

        let complexity: Arc<dyn ComplexityEstimator> = match self.complexity {
            Some(complexity) => complexity,
            None => Arc::new(HeuristicComplexity::new()),
        };
        let planner: Arc<dyn QueryPlanner> = match self.planner {
            Some(planner) => planner,
            None => Arc::new(ConjunctionPlanner::new()),
        };
        let mut retrieval = RetrievalEngine::new(
            store.clone(),
            embedder.clone(),
            complexity,
            config.retrieval.clone(),
        )
        .with_planner(planner);
        if let Some(reflector) = self.reflector {
            retrieval = retrieval.with_reflector(reflector);
        }

        let history = seed_history(store.as_ref(), config.gate.history_size, embedder.dimension())?;

        info!(
            backend = %config.storage.backend,
            embedder = embedder.model_name(),
            dims = embedder.dimension(),
            history = history.len(),
            "Memory initialized"
        );

        Ok(Memory {
            gate: EntropyGate::new(config.gate.clone(), embedder),
            atomizer: Atomizer::new(config.atomizer.clone()),
            history: Mutex::new(history),
            store,
            indexer,
            retrieval,
            consolidator,
            config,
        })
    }
}

/// Gate history rebuilt from the most recently stored windows.
fn seed_history(store: &dyn EntryStore, capacity: usize, dims: usize) -> SimpleMemResult<RecentHistory> {
    let mut atoms = store.recent_atoms(capacity.saturating_mul(SEED_ATOMS_PER_WINDOW))?;
    atoms.retain(|a| a.embedding.len() == dims);
    Ok(RecentHistory::from_atoms(capacity, &atoms))
}

//! Core Memory implementation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::builder::MemoryBuilder;
use crate::config::MemoryConfig;
use crate::consolidation::{
    ConsolidationManager, ConsolidationReport, ConsolidationScheduler, ConsolidationScope,
};
use crate::error::{SimpleMemError, SimpleMemResult};
use crate::index::{EntryStore, StoreStats, TriLayerIndexer};
use crate::ingestion::{
    split_windows, Atomizer, EntropyGate, GateDecision, IngestResult, RecentHistory, WindowReport,
};
use crate::retrieval::{QueryConstraints, QueryResult, RetrievalEngine};
use crate::types::{DialogueWindow, IngestInput, MemoryAtom, MemoryMolecule};

/// A memory space: ingestion, retrieval and consolidation over one store.
pub struct Memory {
    pub(super) config: MemoryConfig,
    pub(super) store: Arc<dyn EntryStore>,
    pub(super) indexer: Arc<TriLayerIndexer>,
    pub(super) gate: EntropyGate,
    pub(super) atomizer: Atomizer,
    pub(super) history: Mutex<RecentHistory>,
    pub(super) retrieval: RetrievalEngine,
    pub(super) consolidator: Arc<ConsolidationManager>,
}

impl Memory {
    /// Memory with built-in capabilities and the configured storage backend.
    pub fn from_config(config: MemoryConfig) -> SimpleMemResult<Self> {
        MemoryBuilder::new(config).build()
    }

    /// Start building a memory with injected capabilities.
    pub fn builder(config: MemoryConfig) -> MemoryBuilder {
        MemoryBuilder::new(config)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Ingest dialogue observed now.
    pub async fn ingest(&self, input: impl Into<IngestInput>) -> SimpleMemResult<IngestResult> {
        self.ingest_at(input, Utc::now()).await
    }

    /// Ingest dialogue observed at `created_at`, the reference time for
    /// relative expressions in utterances without their own timestamp.
    ///
    /// Windows are processed in order. Each accepted window is written to
    /// the store and then to the recent history with no suspension point in
    /// between, so dropping this future never leaves one without the other.
    pub async fn ingest_at(
        &self,
        input: impl Into<IngestInput>,
        created_at: DateTime<Utc>,
    ) -> SimpleMemResult<IngestResult> {
        let utterances = input.into().into_utterances();
        let mut result = IngestResult::default();
        if utterances.is_empty() {
            debug!("Nothing to ingest");
            return Ok(result);
        }

        let windows = split_windows(utterances, &self.config.windowing, created_at);
        let mut history = self.history.lock().await;
        for window in &windows {
            let report = self.ingest_window(window, &mut history).await?;
            result.accepted |= report.decision == GateDecision::Accept;
            result.atom_ids.extend(report.atom_ids.iter().cloned());
            result.windows.push(report);
        }

        info!(
            windows = result.windows.len(),
            atoms = result.atom_ids.len(),
            accepted = result.accepted,
            "Ingest complete"
        );
        Ok(result)
    }

    async fn ingest_window(
        &self,
        window: &DialogueWindow,
        history: &mut RecentHistory,
    ) -> SimpleMemResult<WindowReport> {
        let evaluation = self.gate.evaluate(window, history).await?;
        let mut report = WindowReport {
            window_id: window.id.clone(),
            decision: evaluation.decision,
            score: evaluation.score.clone(),
            atom_ids: Vec::new(),
            dropped: Vec::new(),
            discarded: 0,
        };
        if !evaluation.accepted() {
            debug!(window_id = %window.id, score = evaluation.score.score, "Window rejected");
            return Ok(report);
        }

        let output = self.atomizer.atomize(window, history);
        let batch = self.indexer.insert_batch(output.candidates).await?;
        for failure in &batch.failures {
            warn!(window_id = %window.id, reason = %failure.reason, "Atom discarded");
        }
        self.gate.commit(history, evaluation, output.last_anchor);

        report.atom_ids = batch.atoms.iter().map(|a| a.id.clone()).collect();
        report.dropped = output.dropped;
        report.discarded = batch.failures.len();
        debug!(
            window_id = %window.id,
            atoms = report.atom_ids.len(),
            dropped = report.dropped.len(),
            discarded = report.discarded,
            "Window ingested"
        );
        Ok(report)
    }

    /// Retrieve context for `text`.
    pub async fn query(
        &self,
        text: &str,
        constraints: Option<QueryConstraints>,
    ) -> SimpleMemResult<QueryResult> {
        let constraints = constraints.unwrap_or_default();
        self.retrieval.query(text, &constraints).await
    }

    /// Run one consolidation pass now.
    pub async fn consolidate(
        &self,
        scope: Option<ConsolidationScope>,
    ) -> SimpleMemResult<ConsolidationReport> {
        let scope = scope.unwrap_or_default();
        self.consolidator.consolidate(&scope).await
    }

    pub fn get_atom(&self, id: &str) -> SimpleMemResult<MemoryAtom> {
        self.indexer.get(id)
    }

    pub fn get_molecule(&self, id: &str) -> SimpleMemResult<MemoryMolecule> {
        self.store
            .get_molecule(id)?
            .ok_or_else(|| SimpleMemError::not_found(id))
    }

    /// Source atoms of a molecule, oldest first.
    pub fn drill_down(&self, molecule_id: &str) -> SimpleMemResult<Vec<MemoryAtom>> {
        let molecule = self.get_molecule(molecule_id)?;
        let mut atoms = self.store.atoms_by_ids(&molecule.source_atom_ids)?;
        atoms.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(atoms)
    }

    pub fn stats(&self) -> SimpleMemResult<StoreStats> {
        self.store.stats()
    }

    /// The consolidation manager, for running passes off the ingest path.
    pub fn consolidator(&self) -> Arc<ConsolidationManager> {
        self.consolidator.clone()
    }

    /// A scheduler running consolidation every `interval_minutes`. Call
    /// `start()` on it to begin.
    pub async fn scheduler(&self) -> SimpleMemResult<ConsolidationScheduler> {
        ConsolidationScheduler::from_manager(self.consolidator()).await
    }

    /// Number of windows in the recent history.
    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }
}

//! Tri-layer indexer: projects atom candidates into the semantic, lexical
//! and symbolic layers and writes them to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ErrorCode, SimpleMemError, SimpleMemResult};
use crate::index::store::{EntryStore, ScanFilter};
use crate::text::lexical_signature;
use crate::traits::{EmbeddingAction, Embedder};
use crate::types::{
    AtomCandidate, EntryKind, EntryStatus, LexicalSignature, MemoryAtom, Metadata, META_DATE,
    META_ENTITIES, META_KIND, META_SPEAKER, META_WINDOW_ID,
};

/// Index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Dimension of every stored embedding.
    pub embedding_dims: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embedding_dims: 1536,
        }
    }
}

impl IndexConfig {
    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.embedding_dims == 0 {
            return Err("embedding_dims must be greater than 0");
        }
        Ok(())
    }
}

/// A candidate that could not be indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFailure {
    pub content: String,
    pub reason: String,
}

/// Result of `insert_batch`.
#[derive(Debug, Clone, Default)]
pub struct BatchInsert {
    /// Atoms committed, in candidate order.
    pub atoms: Vec<MemoryAtom>,
    /// Candidates discarded before the commit.
    pub failures: Vec<IndexFailure>,
}

/// Writes atoms with all three layers populated.
pub struct TriLayerIndexer {
    store: Arc<dyn EntryStore>,
    embedder: Arc<dyn Embedder>,
    dims: usize,
}

impl TriLayerIndexer {
    /// The store's vectors will have the embedder's dimension.
    pub fn new(store: Arc<dyn EntryStore>, embedder: Arc<dyn Embedder>) -> Self {
        let dims = embedder.dimension();
        Self {
            store,
            embedder,
            dims,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Index one candidate.
    pub async fn insert(&self, candidate: AtomCandidate) -> SimpleMemResult<MemoryAtom> {
        let embedding = self
            .embedder
            .embed(&candidate.content, Some(EmbeddingAction::Add))
            .await?;
        let atom = self.prepare(candidate, embedding)?;
        self.store.insert_atoms(std::slice::from_ref(&atom))?;
        debug!(atom_id = %atom.id, "Atom indexed");
        Ok(atom)
    }

    /// Index many candidates.
    ///
    /// Every atom is prepared and validated first; the valid ones are then
    /// written in a single synchronous store transaction. Invalid atoms are
    /// discarded and reported in `failures`.
    pub async fn insert_batch(&self, candidates: Vec<AtomCandidate>) -> SimpleMemResult<BatchInsert> {
        if candidates.is_empty() {
            return Ok(BatchInsert::default());
        }

        let embeddings = self.embed_all(&candidates).await;

        let mut batch = BatchInsert::default();
        for (candidate, embedding) in candidates.into_iter().zip(embeddings) {
            let content = candidate.content.clone();
            match embedding.and_then(|e| self.prepare(candidate, e)) {
                Ok(atom) => batch.atoms.push(atom),
                Err(e) => {
                    warn!(content = %content, error = %e, "Atom discarded");
                    batch.failures.push(IndexFailure {
                        content,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.store.insert_atoms(&batch.atoms)?;
        debug!(
            indexed = batch.atoms.len(),
            discarded = batch.failures.len(),
            "Batch indexed"
        );
        Ok(batch)
    }

    /// Embed every candidate, one result per candidate. A failed batch call
    /// falls back to embedding one at a time.
    async fn embed_all(&self, candidates: &[AtomCandidate]) -> Vec<SimpleMemResult<Vec<f32>>> {
        let texts: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        match self
            .embedder
            .embed_batch(&texts, Some(EmbeddingAction::Add))
            .await
        {
            Ok(vectors) if vectors.len() == texts.len() => vectors.into_iter().map(Ok).collect(),
            Ok(vectors) => {
                warn!(
                    expected = texts.len(),
                    got = vectors.len(),
                    "Embedding batch size mismatch, embedding individually"
                );
                self.embed_each(&texts).await
            }
            Err(e) => {
                warn!(error = %e, "Embedding batch failed, embedding individually");
                self.embed_each(&texts).await
            }
        }
    }

    async fn embed_each(&self, texts: &[String]) -> Vec<SimpleMemResult<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embedder.embed(text, Some(EmbeddingAction::Add)).await);
        }
        results
    }

    /// Build a complete atom and check its three layers.
    fn prepare(&self, candidate: AtomCandidate, embedding: Vec<f32>) -> SimpleMemResult<MemoryAtom> {
        let signature = lexical_signature(&candidate.content);
        let metadata = atom_metadata(&candidate);
        self.validate_layers(&embedding, &signature, &metadata)?;

        Ok(MemoryAtom {
            id: Uuid::new_v4().to_string(),
            content: candidate.content,
            timestamp: candidate.timestamp,
            created_at: candidate.created_at,
            embedding,
            lexical_signature: signature,
            metadata,
            status: EntryStatus::Active,
            molecule_id: None,
        })
    }

    /// Embed and sign arbitrary content, as for a synthesized molecule.
    pub async fn represent(&self, content: &str) -> SimpleMemResult<(Vec<f32>, LexicalSignature)> {
        let embedding = self
            .embedder
            .embed(content, Some(EmbeddingAction::Add))
            .await?;
        let signature = lexical_signature(content);
        Ok((embedding, signature))
    }

    /// Dimension, finiteness and non-emptiness of the three layers.
    pub fn validate_layers(
        &self,
        embedding: &[f32],
        signature: &LexicalSignature,
        metadata: &Metadata,
    ) -> SimpleMemResult<()> {
        if embedding.len() != self.dims {
            return Err(SimpleMemError::index_write(
                ErrorCode::IdxDimensionMismatch,
                format!("expected {} dimensions, got {}", self.dims, embedding.len()),
            ));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(SimpleMemError::index_write(
                ErrorCode::IdxWriteFailed,
                "embedding contains non-finite values",
            ));
        }
        if signature.is_empty() {
            return Err(SimpleMemError::index_write(
                ErrorCode::IdxMissingLayer,
                "lexical signature is empty",
            ));
        }
        if signature.values().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(SimpleMemError::index_write(
                ErrorCode::IdxWriteFailed,
                "lexical signature has invalid weights",
            ));
        }
        if metadata.is_empty() {
            return Err(SimpleMemError::index_write(
                ErrorCode::IdxMissingLayer,
                "metadata is empty",
            ));
        }
        Ok(())
    }

    /// Fetch an atom by id.
    pub fn get(&self, id: &str) -> SimpleMemResult<MemoryAtom> {
        self.store
            .get_atom(id)?
            .ok_or_else(|| SimpleMemError::not_found(id))
    }

    /// Snapshot the matching atoms into a restartable iterator.
    pub fn scan(&self, filter: &ScanFilter) -> SimpleMemResult<AtomScan> {
        Ok(AtomScan::new(self.store.scan_atoms(filter)?))
    }
}

/// Symbolic layer of an atom.
fn atom_metadata(candidate: &AtomCandidate) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(META_SPEAKER.to_string(), candidate.speaker.clone().into());
    metadata.insert(META_ENTITIES.to_string(), candidate.entities.clone().into());
    metadata.insert(META_WINDOW_ID.to_string(), candidate.window_id.clone().into());
    metadata.insert(META_KIND.to_string(), EntryKind::Atom.to_string().into());
    metadata.insert(META_DATE.to_string(), date_string(&candidate.timestamp).into());
    metadata
}

pub(crate) fn date_string(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d").to_string()
}

/// Finite iterator over a snapshot of atoms. `reset` restarts it from the
/// beginning over the same snapshot.
#[derive(Debug, Clone)]
pub struct AtomScan {
    atoms: Arc<[MemoryAtom]>,
    position: usize,
}

impl AtomScan {
    fn new(atoms: Vec<MemoryAtom>) -> Self {
        Self {
            atoms: atoms.into(),
            position: 0,
        }
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Total atoms in the snapshot.
    pub fn snapshot_len(&self) -> usize {
        self.atoms.len()
    }
}

impl Iterator for AtomScan {
    type Item = MemoryAtom;

    fn next(&mut self) -> Option<Self::Item> {
        let atom = self.atoms.get(self.position)?.clone();
        self.position += 1;
        Some(atom)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.atoms.len() - self.position;
        (left, Some(left))
    }
}

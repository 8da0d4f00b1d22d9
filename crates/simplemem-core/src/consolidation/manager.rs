//! Consolidation manager: turns dense clusters of atoms into molecules.
//!
//! A pass snapshots the free atoms in scope plus nearby members of existing
//! molecules, scores an affinity graph off that snapshot, and then writes one
//! compare-and-swap transaction per cluster. No lock is held across the pass;
//! a cluster that loses a race is skipped and retried on the next pass.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::consolidation::affinity::{arrange, plan_clusters, score_pairs, Slot};
use crate::error::{SimpleMemError, SimpleMemResult};
use crate::index::indexer::date_string;
use crate::index::{ScanFilter, TriLayerIndexer};
use crate::traits::Synthesizer;
use crate::types::{
    EntryKind, Filter, MemoryAtom, MemoryMolecule, Metadata, META_DATE, META_ENTITIES, META_KIND,
    META_MEMBER_COUNT, META_SPEAKERS,
};

/// Configuration for consolidation passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Weight of semantic similarity against temporal proximity (default: 0.7)
    pub beta: f32,
    /// Temporal decay per day of separation (default: 0.1)
    pub decay_per_day: f32,
    /// Minimum affinity for an edge (default: 0.75)
    pub edge_threshold: f32,
    /// Mean affinity a cluster must exceed (default: 0.8)
    pub cluster_threshold: f32,
    /// Only atoms this many days apart are scored (default: 14)
    pub candidate_window_days: u32,
    /// Forward neighbours scored per atom (default: 32)
    pub max_neighbors: usize,
    /// Smallest cluster that becomes a molecule (default: 2)
    pub min_cluster_size: usize,
    /// Minutes between scheduled passes (default: 15)
    pub interval_minutes: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            beta: 0.7,
            decay_per_day: 0.1,
            edge_threshold: 0.75,
            cluster_threshold: 0.8,
            candidate_window_days: 14,
            max_neighbors: 32,
            min_cluster_size: 2,
            interval_minutes: 15,
        }
    }
}

impl ConsolidationConfig {
    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !(0.0..=1.0).contains(&self.beta) {
            return Err("beta must be between 0.0 and 1.0");
        }
        if !self.decay_per_day.is_finite() || self.decay_per_day < 0.0 {
            return Err("decay_per_day must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.edge_threshold) {
            return Err("edge_threshold must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.cluster_threshold) {
            return Err("cluster_threshold must be between 0.0 and 1.0");
        }
        if self.candidate_window_days == 0 {
            return Err("candidate_window_days must be greater than 0");
        }
        if self.max_neighbors == 0 {
            return Err("max_neighbors must be greater than 0");
        }
        if self.min_cluster_size < 2 {
            return Err("min_cluster_size must be at least 2");
        }
        if self.interval_minutes == 0 {
            return Err("interval_minutes must be greater than 0");
        }
        Ok(())
    }
}

/// Which free atoms a pass considers.
#[derive(Debug, Clone, Default)]
pub struct ConsolidationScope {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub metadata: Option<Filter>,
}

impl ConsolidationScope {
    fn scan_filter(&self) -> ScanFilter {
        let mut filter = ScanFilter::free().with_time_range(self.after, self.before);
        filter.metadata = self.metadata.clone();
        filter
    }
}

/// A cluster that could not be written this pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedCluster {
    pub atom_ids: Vec<String>,
    /// Set when the cluster was meant to extend an existing molecule.
    pub molecule_id: Option<String>,
    pub code: String,
    pub reason: String,
}

/// Result of a consolidation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Ids of new molecules.
    pub created: Vec<String>,
    /// Ids of molecules extended and re-synthesized.
    pub resynthesized: Vec<String>,
    /// Clusters left for the next pass.
    pub skipped: Vec<SkippedCluster>,
    /// Connected groups that were too small or too loose.
    pub below_threshold: usize,
    /// Free atoms in scope.
    pub atoms_scanned: usize,
    /// Pairs scored.
    pub edges_scored: usize,
    /// Non-fatal problems outside any one cluster.
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConsolidationReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            ..Default::default()
        }
    }

    fn complete(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }

    /// Whether the pass wrote anything.
    pub fn changed(&self) -> bool {
        !self.created.is_empty() || !self.resynthesized.is_empty()
    }

    /// Duration of the pass.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// Runs consolidation passes against the index.
pub struct ConsolidationManager {
    indexer: Arc<TriLayerIndexer>,
    synthesizer: Arc<dyn Synthesizer>,
    config: ConsolidationConfig,
}

impl ConsolidationManager {
    pub fn new(
        indexer: Arc<TriLayerIndexer>,
        synthesizer: Arc<dyn Synthesizer>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            indexer,
            synthesizer,
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Run one pass over `scope`.
    ///
    /// Only store read failures abort the pass. Failures while writing a
    /// cluster are recorded in `skipped` and leave its atoms active.
    pub async fn consolidate(&self, scope: &ConsolidationScope) -> SimpleMemResult<ConsolidationReport> {
        let mut report = ConsolidationReport::new();
        let store = self.indexer.store();

        let free = store.scan_atoms(&scope.scan_filter())?;
        report.atoms_scanned = free.len();
        if free.is_empty() {
            return Ok(report.complete());
        }

        let molecules = store.list_molecules()?;
        let anchors = self.load_anchors(&free, &molecules, &mut report);

        let mut slots: Vec<Slot<'_>> = free
            .iter()
            .map(|atom| Slot { atom, owner: None })
            .chain(anchors.iter().map(|(owner, atom)| Slot {
                atom,
                owner: Some(*owner),
            }))
            .collect();
        arrange(&mut slots);

        let edges = score_pairs(&slots, &self.config);
        report.edges_scored = edges.len();
        let plan = plan_clusters(&slots, &edges, &self.config);
        report.below_threshold = plan.below_threshold;
        debug!(
            atoms = free.len(),
            anchors = anchors.len(),
            edges = edges.len(),
            clusters = plan.clusters.len(),
            joins = plan.joins.len(),
            "Affinity graph scored"
        );

        for join in &plan.joins {
            let molecule = &molecules[join.molecule];
            let newcomers: Vec<MemoryAtom> =
                join.members.iter().map(|&i| slots[i].atom.clone()).collect();
            match self.resynthesize(molecule, newcomers).await {
                Ok(updated) => {
                    debug!(
                        molecule_id = %updated.id,
                        revision = updated.revision,
                        members = updated.source_atom_ids.len(),
                        "Molecule re-synthesized"
                    );
                    report.resynthesized.push(updated.id);
                }
                Err(e) => {
                    let atom_ids = join.members.iter().map(|&i| slots[i].atom.id.clone()).collect();
                    skip(&mut report, atom_ids, Some(molecule.id.clone()), e);
                }
            }
        }

        for cluster in &plan.clusters {
            let atoms: Vec<MemoryAtom> = cluster.members.iter().map(|&i| slots[i].atom.clone()).collect();
            match self.create(atoms).await {
                Ok(molecule) => {
                    debug!(
                        molecule_id = %molecule.id,
                        members = molecule.source_atom_ids.len(),
                        mean_weight = cluster.mean_weight,
                        "Molecule created"
                    );
                    report.created.push(molecule.id);
                }
                Err(e) => {
                    let atom_ids = cluster.members.iter().map(|&i| slots[i].atom.id.clone()).collect();
                    skip(&mut report, atom_ids, None, e);
                }
            }
        }

        let report = report.complete();
        info!(
            created = report.created.len(),
            resynthesized = report.resynthesized.len(),
            skipped = report.skipped.len(),
            atoms_scanned = report.atoms_scanned,
            duration_ms = report.duration_ms().unwrap_or(0),
            "Consolidation pass complete"
        );
        Ok(report)
    }

    /// Members of existing molecules within reach of the free atoms' time range.
    fn load_anchors(
        &self,
        free: &[MemoryAtom],
        molecules: &[MemoryMolecule],
        report: &mut ConsolidationReport,
    ) -> Vec<(usize, MemoryAtom)> {
        let reach = Duration::days(self.config.candidate_window_days as i64);
        let (Some(first), Some(last)) = (free.first(), free.last()) else {
            return Vec::new();
        };
        let (lo, hi) = (first.timestamp - reach, last.timestamp + reach);

        let mut anchors = Vec::new();
        for (index, molecule) in molecules.iter().enumerate() {
            if molecule.time_span.1 < lo || molecule.time_span.0 > hi {
                continue;
            }
            match self.indexer.store().atoms_by_ids(&molecule.source_atom_ids) {
                Ok(members) => anchors.extend(
                    members
                        .into_iter()
                        .filter(|a| a.timestamp >= lo && a.timestamp <= hi)
                        .map(|a| (index, a)),
                ),
                Err(e) => {
                    warn!(molecule_id = %molecule.id, error = %e, "Could not load molecule members");
                    report
                        .errors
                        .push(format!("molecule {}: {}", molecule.id, e));
                }
            }
        }
        anchors
    }

    async fn create(&self, atoms: Vec<MemoryAtom>) -> SimpleMemResult<MemoryMolecule> {
        let now = Utc::now();
        let molecule = self
            .synthesize(Uuid::new_v4().to_string(), atoms, now, 0)
            .await?;
        self.indexer.store().commit_molecule(&molecule, None)?;
        Ok(molecule)
    }

    async fn resynthesize(
        &self,
        existing: &MemoryMolecule,
        newcomers: Vec<MemoryAtom>,
    ) -> SimpleMemResult<MemoryMolecule> {
        let mut atoms = self.indexer.store().atoms_by_ids(&existing.source_atom_ids)?;
        if atoms.len() != existing.source_atom_ids.len() {
            return Err(SimpleMemError::conflict(format!(
                "molecule {} lost members since the snapshot",
                existing.id
            )));
        }
        atoms.extend(newcomers);
        let molecule = self
            .synthesize(
                existing.id.clone(),
                atoms,
                existing.created_at,
                existing.revision + 1,
            )
            .await?;
        self.indexer
            .store()
            .commit_molecule(&molecule, Some(existing.revision))?;
        Ok(molecule)
    }

    /// Build a complete molecule record over `atoms`.
    async fn synthesize(
        &self,
        id: String,
        mut atoms: Vec<MemoryAtom>,
        created_at: DateTime<Utc>,
        revision: u32,
    ) -> SimpleMemResult<MemoryMolecule> {
        atoms.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        let (Some(first), Some(last)) = (atoms.first(), atoms.last()) else {
            return Err(SimpleMemError::consolidation_skipped("empty cluster"));
        };
        let time_span = (first.timestamp, last.timestamp);

        let content = self
            .synthesizer
            .synthesize(&atoms)
            .await
            .map_err(|e| SimpleMemError::consolidation_skipped(format!("synthesis failed: {}", e)))?;
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(SimpleMemError::consolidation_skipped(
                "synthesizer returned empty content",
            ));
        }

        let (embedding, lexical_signature) = self.indexer.represent(&content).await?;
        let metadata = molecule_metadata(&atoms, time_span.1);
        self.indexer
            .validate_layers(&embedding, &lexical_signature, &metadata)?;

        let mut source_atom_ids: Vec<String> = atoms.into_iter().map(|a| a.id).collect();
        source_atom_ids.sort();

        Ok(MemoryMolecule {
            id,
            content,
            timestamp: time_span.1,
            time_span,
            created_at,
            updated_at: Utc::now(),
            embedding,
            lexical_signature,
            metadata,
            source_atom_ids,
            revision,
        })
    }
}

fn skip(
    report: &mut ConsolidationReport,
    atom_ids: Vec<String>,
    molecule_id: Option<String>,
    error: SimpleMemError,
) {
    warn!(
        atoms = atom_ids.len(),
        molecule_id = molecule_id.as_deref().unwrap_or(""),
        code = error.code().as_str(),
        error = %error,
        "Cluster skipped"
    );
    report.skipped.push(SkippedCluster {
        atom_ids,
        molecule_id,
        code: error.code().as_str().to_string(),
        reason: error.to_string(),
    });
}

/// Speakers and entities aggregated over the members.
fn molecule_metadata(atoms: &[MemoryAtom], latest: DateTime<Utc>) -> Metadata {
    let speakers: BTreeSet<&str> = atoms.iter().filter_map(|a| a.speaker()).collect();
    let mut entities: Vec<String> = Vec::new();
    for entity in atoms.iter().flat_map(|a| a.entities()) {
        if !entities.contains(&entity) {
            entities.push(entity);
        }
    }

    let mut metadata = Metadata::new();
    metadata.insert(
        META_SPEAKERS.to_string(),
        speakers.into_iter().collect::<Vec<_>>().into(),
    );
    metadata.insert(META_ENTITIES.to_string(), entities.into());
    metadata.insert(META_KIND.to_string(), EntryKind::Molecule.to_string().into());
    metadata.insert(META_MEMBER_COUNT.to_string(), atoms.len().into());
    metadata.insert(META_DATE.to_string(), date_string(&latest).into());
    metadata
}

//! Storage seam for atoms and molecules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SimpleMemError, SimpleMemResult};
use crate::types::{EntryStatus, Filter, MemoryAtom, MemoryMolecule};

/// Selects atoms for a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Only atoms with this status.
    pub status: Option<EntryStatus>,
    /// Only atoms that belong to no molecule.
    pub unowned_only: bool,
    /// Inclusive lower bound on `timestamp`.
    pub after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`.
    pub before: Option<DateTime<Utc>>,
    /// Symbolic-layer filter.
    pub metadata: Option<Filter>,
}

impl ScanFilter {
    /// Every atom, archived ones included.
    pub fn all() -> Self {
        Self::default()
    }

    /// Active atoms only.
    pub fn active() -> Self {
        Self {
            status: Some(EntryStatus::Active),
            ..Default::default()
        }
    }

    /// Active atoms not yet absorbed into a molecule.
    pub fn free() -> Self {
        Self {
            status: Some(EntryStatus::Active),
            unowned_only: true,
            ..Default::default()
        }
    }

    pub fn with_time_range(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.after = after;
        self.before = before;
        self
    }

    pub fn with_metadata(mut self, filter: Filter) -> Self {
        self.metadata = Some(filter);
        self
    }

    pub fn matches(&self, atom: &MemoryAtom) -> bool {
        if self.status.is_some_and(|s| s != atom.status) {
            return false;
        }
        if self.unowned_only && atom.molecule_id.is_some() {
            return false;
        }
        if self.after.is_some_and(|t| atom.timestamp < t) {
            return false;
        }
        if self.before.is_some_and(|t| atom.timestamp > t) {
            return false;
        }
        self.metadata
            .as_ref()
            .map_or(true, |f| f.matches(&atom.metadata))
    }
}

/// Entry counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub atoms: usize,
    pub active_atoms: usize,
    pub archived_atoms: usize,
    pub molecules: usize,
}

/// Backing store for the three layers of every entry.
///
/// All three representations of an entry are written in one transaction.
/// Methods are synchronous so that no await point can fall inside a write.
pub trait EntryStore: Send + Sync {
    /// Insert atoms, all or nothing.
    fn insert_atoms(&self, atoms: &[MemoryAtom]) -> SimpleMemResult<()>;

    fn get_atom(&self, id: &str) -> SimpleMemResult<Option<MemoryAtom>>;

    /// Atoms with the given ids, in the order given; unknown ids are skipped.
    fn atoms_by_ids(&self, ids: &[String]) -> SimpleMemResult<Vec<MemoryAtom>>;

    /// Snapshot of the matching atoms, sorted by `(timestamp, id)`.
    fn scan_atoms(&self, filter: &ScanFilter) -> SimpleMemResult<Vec<MemoryAtom>>;

    /// Up to `limit` atoms in reverse insertion order, archived ones included.
    fn recent_atoms(&self, limit: usize) -> SimpleMemResult<Vec<MemoryAtom>>;

    fn get_molecule(&self, id: &str) -> SimpleMemResult<Option<MemoryMolecule>>;

    /// All molecules, sorted by id.
    fn list_molecules(&self) -> SimpleMemResult<Vec<MemoryMolecule>>;

    /// Write a molecule and archive its members in one transaction.
    ///
    /// `expected_revision` is `None` for a new molecule (the id must be
    /// unused) and the currently stored revision for a re-synthesis. Every
    /// source atom must be active and unowned, or already owned by this
    /// molecule. Any mismatch fails with a conflict and changes nothing.
    fn commit_molecule(
        &self,
        molecule: &MemoryMolecule,
        expected_revision: Option<u32>,
    ) -> SimpleMemResult<()>;

    fn stats(&self) -> SimpleMemResult<StoreStats>;
}

/// Compare-and-swap check on the molecule record.
pub(crate) fn check_revision(
    molecule: &MemoryMolecule,
    expected: Option<u32>,
    stored: Option<u32>,
) -> SimpleMemResult<()> {
    if molecule.source_atom_ids.is_empty() {
        return Err(SimpleMemError::validation(format!(
            "molecule {} has no source atoms",
            molecule.id
        )));
    }
    match (expected, stored) {
        (None, None) => Ok(()),
        (Some(e), Some(s)) if e == s => Ok(()),
        (None, Some(s)) => Err(SimpleMemError::conflict(format!(
            "molecule {} already exists at revision {}",
            molecule.id, s
        ))),
        (Some(e), s) => Err(SimpleMemError::conflict(format!(
            "molecule {} expected at revision {}, found {:?}",
            molecule.id, e, s
        ))),
    }
}

/// Compare-and-swap check on one member atom.
pub(crate) fn check_member(molecule_id: &str, atom_id: &str, atom: Option<&MemoryAtom>) -> SimpleMemResult<()> {
    let Some(atom) = atom else {
        return Err(SimpleMemError::conflict(format!("atom {} no longer exists", atom_id)));
    };
    match atom.molecule_id.as_deref() {
        Some(owner) if owner == molecule_id => Ok(()),
        Some(owner) => Err(SimpleMemError::conflict(format!(
            "atom {} already belongs to molecule {}",
            atom_id, owner
        ))),
        None if atom.is_active() => Ok(()),
        None => Err(SimpleMemError::conflict(format!("atom {} is not active", atom_id))),
    }
}

/// Counts shared by both stores.
pub(crate) fn count_atoms<'a>(atoms: impl Iterator<Item = &'a MemoryAtom>, molecules: usize) -> StoreStats {
    let mut stats = StoreStats {
        molecules,
        ..Default::default()
    };
    for atom in atoms {
        stats.atoms += 1;
        match atom.status {
            EntryStatus::Active => stats.active_atoms += 1,
            EntryStatus::Archived => stats.archived_atoms += 1,
        }
    }
    stats
}

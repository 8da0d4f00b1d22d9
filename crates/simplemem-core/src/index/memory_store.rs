//! Process-local store.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{SimpleMemError, SimpleMemResult};
use crate::index::store::{check_member, check_revision, count_atoms, EntryStore, ScanFilter, StoreStats};
use crate::types::{EntryStatus, MemoryAtom, MemoryMolecule};

#[derive(Default)]
struct Entries {
    atoms: HashMap<String, MemoryAtom>,
    /// Atom ids in insertion order.
    inserted: Vec<String>,
    molecules: HashMap<String, MemoryMolecule>,
}

/// `RwLock`-guarded maps. Writers hold the write lock for a whole insert or
/// molecule commit; readers clone what they return.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Entries>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> SimpleMemResult<std::sync::RwLockReadGuard<'_, Entries>> {
        self.entries
            .read()
            .map_err(|e| SimpleMemError::database(e.to_string()))
    }

    fn write(&self) -> SimpleMemResult<std::sync::RwLockWriteGuard<'_, Entries>> {
        self.entries
            .write()
            .map_err(|e| SimpleMemError::database(e.to_string()))
    }
}

impl EntryStore for InMemoryStore {
    fn insert_atoms(&self, atoms: &[MemoryAtom]) -> SimpleMemResult<()> {
        let mut entries = self.write()?;
        if let Some(dup) = atoms.iter().find(|a| entries.atoms.contains_key(&a.id)) {
            return Err(SimpleMemError::database(format!("atom {} already exists", dup.id)));
        }
        for atom in atoms {
            entries.inserted.push(atom.id.clone());
            entries.atoms.insert(atom.id.clone(), atom.clone());
        }
        Ok(())
    }

    fn get_atom(&self, id: &str) -> SimpleMemResult<Option<MemoryAtom>> {
        Ok(self.read()?.atoms.get(id).cloned())
    }

    fn atoms_by_ids(&self, ids: &[String]) -> SimpleMemResult<Vec<MemoryAtom>> {
        let entries = self.read()?;
        Ok(ids.iter().filter_map(|id| entries.atoms.get(id).cloned()).collect())
    }

    fn scan_atoms(&self, filter: &ScanFilter) -> SimpleMemResult<Vec<MemoryAtom>> {
        let entries = self.read()?;
        let mut atoms: Vec<MemoryAtom> = entries
            .atoms
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        atoms.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(atoms)
    }

    fn recent_atoms(&self, limit: usize) -> SimpleMemResult<Vec<MemoryAtom>> {
        let entries = self.read()?;
        Ok(entries
            .inserted
            .iter()
            .rev()
            .filter_map(|id| entries.atoms.get(id).cloned())
            .take(limit)
            .collect())
    }

    fn get_molecule(&self, id: &str) -> SimpleMemResult<Option<MemoryMolecule>> {
        Ok(self.read()?.molecules.get(id).cloned())
    }

    fn list_molecules(&self) -> SimpleMemResult<Vec<MemoryMolecule>> {
        let entries = self.read()?;
        let mut molecules: Vec<MemoryMolecule> = entries.molecules.values().cloned().collect();
        molecules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(molecules)
    }

    fn commit_molecule(
        &self,
        molecule: &MemoryMolecule,
        expected_revision: Option<u32>,
    ) -> SimpleMemResult<()> {
        let mut entries = self.write()?;
        let stored = entries.molecules.get(&molecule.id).map(|m| m.revision);
        check_revision(molecule, expected_revision, stored)?;
        for atom_id in &molecule.source_atom_ids {
            check_member(&molecule.id, atom_id, entries.atoms.get(atom_id))?;
        }

        for atom_id in &molecule.source_atom_ids {
            if let Some(atom) = entries.atoms.get_mut(atom_id) {
                atom.status = EntryStatus::Archived;
                atom.molecule_id = Some(molecule.id.clone());
            }
        }
        entries.molecules.insert(molecule.id.clone(), molecule.clone());
        Ok(())
    }

    fn stats(&self) -> SimpleMemResult<StoreStats> {
        let entries = self.read()?;
        Ok(count_atoms(entries.atoms.values(), entries.molecules.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::index::testing::{sample_atom, sample_molecule};

    #[test]
    fn test_insert_and_scan_order() {
        let store = InMemoryStore::new();
        store
            .insert_atoms(&[sample_atom("b", 2), sample_atom("a", 2), sample_atom("c", 1)])
            .unwrap();

        let ids: Vec<String> = store
            .scan_atoms(&ScanFilter::all())
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(store.stats().unwrap().active_atoms, 3);
    }

    #[test]
    fn test_recent_atoms_newest_first() {
        let store = InMemoryStore::new();
        store.insert_atoms(&[sample_atom("b", 2), sample_atom("a", 5)]).unwrap();
        store.insert_atoms(&[sample_atom("c", 1)]).unwrap();

        let ids = |limit| -> Vec<String> {
            store.recent_atoms(limit).unwrap().into_iter().map(|a| a.id).collect()
        };
        assert_eq!(ids(10), vec!["c", "a", "b"]);
        assert_eq!(ids(2), vec!["c", "a"]);
        assert!(ids(0).is_empty());
    }

    #[test]
    fn test_duplicate_insert_is_all_or_nothing() {
        let store = InMemoryStore::new();
        store.insert_atoms(&[sample_atom("a", 1)]).unwrap();
        assert!(store
            .insert_atoms(&[sample_atom("b", 1), sample_atom("a", 1)])
            .is_err());
        assert!(store.get_atom("b").unwrap().is_none());
    }

    #[test]
    fn test_commit_molecule_archives_members() {
        let store = InMemoryStore::new();
        store
            .insert_atoms(&[sample_atom("a", 1), sample_atom("b", 2), sample_atom("c", 3)])
            .unwrap();

        let molecule = sample_molecule("m", &["a", "b"], 0);
        store.commit_molecule(&molecule, None).unwrap();

        let a = store.get_atom("a").unwrap().unwrap();
        assert_eq!(a.status, EntryStatus::Archived);
        assert_eq!(a.molecule_id.as_deref(), Some("m"));
        assert_eq!(store.scan_atoms(&ScanFilter::free()).unwrap().len(), 1);

        // Re-synthesis extends the member set under the stored revision.
        let extended = sample_molecule("m", &["a", "b", "c"], 1);
        store.commit_molecule(&extended, Some(0)).unwrap();
        assert_eq!(store.get_molecule("m").unwrap().unwrap().revision, 1);
        assert_eq!(store.stats().unwrap().archived_atoms, 3);
    }

    #[test]
    fn test_commit_conflicts_leave_state_unchanged() {
        let store = InMemoryStore::new();
        store
            .insert_atoms(&[sample_atom("a", 1), sample_atom("b", 2)])
            .unwrap();
        store
            .commit_molecule(&sample_molecule("m1", &["a"], 0), None)
            .unwrap();

        let err = store
            .commit_molecule(&sample_molecule("m2", &["b", "a"], 0), None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConCasConflict);
        assert!(store.get_atom("b").unwrap().unwrap().is_active());

        let err = store
            .commit_molecule(&sample_molecule("m1", &["a", "b"], 1), Some(5))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConCasConflict);

        let err = store
            .commit_molecule(&sample_molecule("m1", &["a"], 0), None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConCasConflict);
    }
}

//! Tri-layer index: dense vectors, sparse term signatures and symbolic
//! metadata per entry, kept in one store.

pub mod indexer;
pub mod memory_store;
pub mod sqlite_store;
pub mod store;

pub use indexer::{AtomScan, BatchInsert, IndexConfig, IndexFailure, TriLayerIndexer};
pub use memory_store::InMemoryStore;
pub use sqlite_store::SqliteStore;
pub use store::{EntryStore, ScanFilter, StoreStats};

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{Duration, TimeZone, Utc};

    use crate::text::lexical_signature;
    use crate::types::{
        EntryStatus, MemoryAtom, MemoryMolecule, Metadata, META_ENTITIES, META_KIND,
        META_MEMBER_COUNT, META_SPEAKER,
    };

    /// Active atom timestamped `hour` hours after 2024-05-01.
    pub fn sample_atom(id: &str, hour: i64) -> MemoryAtom {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let content = format!("Alice ordered a latte at the cafe ({})", id);
        let mut metadata = Metadata::new();
        metadata.insert(META_SPEAKER.to_string(), "Alice".into());
        metadata.insert(META_ENTITIES.to_string(), serde_json::json!(["Alice"]));
        metadata.insert(META_KIND.to_string(), "atom".into());
        MemoryAtom {
            id: id.to_string(),
            lexical_signature: lexical_signature(&content),
            content,
            timestamp: base + Duration::hours(hour),
            created_at: base,
            embedding: vec![0.6, 0.8, 0.0],
            metadata,
            status: EntryStatus::Active,
            molecule_id: None,
        }
    }

    pub fn sample_molecule(id: &str, members: &[&str], revision: u32) -> MemoryMolecule {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let content = "Alice orders lattes (recurring)".to_string();
        let mut metadata = Metadata::new();
        metadata.insert(META_KIND.to_string(), "molecule".into());
        metadata.insert(META_MEMBER_COUNT.to_string(), members.len().into());
        let mut source_atom_ids: Vec<String> = members.iter().map(|m| m.to_string()).collect();
        source_atom_ids.sort();
        MemoryMolecule {
            id: id.to_string(),
            lexical_signature: lexical_signature(&content),
            content,
            timestamp: base,
            time_span: (base, base),
            created_at: base,
            updated_at: base,
            embedding: vec![0.6, 0.8, 0.0],
            metadata,
            source_atom_ids,
            revision,
        }
    }
}

//! Memory entry types: atoms, molecules and the candidates they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strum::{Display, EnumString};

/// Sparse term → weight mapping (the lexical layer).
///
/// Ordered so that score accumulation is reproducible across runs.
pub type LexicalSignature = BTreeMap<String, f32>;

/// Symbolic key → value mapping (the symbolic layer).
pub type Metadata = HashMap<String, serde_json::Value>;

/// Metadata key: speaker of the source utterance.
pub const META_SPEAKER: &str = "speaker";
/// Metadata key: speakers aggregated over a molecule's members.
pub const META_SPEAKERS: &str = "speakers";
/// Metadata key: entity names mentioned by the entry.
pub const META_ENTITIES: &str = "entities";
/// Metadata key: id of the dialogue window an atom came from.
pub const META_WINDOW_ID: &str = "window_id";
/// Metadata key: `atom` or `molecule`.
pub const META_KIND: &str = "kind";
/// Metadata key: `YYYY-MM-DD` of the entry timestamp.
pub const META_DATE: &str = "date";
/// Metadata key: number of atoms summarized by a molecule.
pub const META_MEMBER_COUNT: &str = "member_count";

/// Lifecycle status of an atom.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryStatus {
    /// Part of the default candidate set.
    #[default]
    Active,
    /// Absorbed into a molecule; reachable through drill-down only.
    Archived,
}

/// Whether an entry is an atom or a molecule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryKind {
    Atom,
    Molecule,
}

/// An atom produced by the atomizer but not yet indexed.
///
/// It has resolved content and an absolute timestamp, but no id and no
/// dense or lexical representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomCandidate {
    /// Self-contained statement.
    pub content: String,
    /// Absolute time the fact pertains to.
    pub timestamp: DateTime<Utc>,
    /// Ingestion time.
    pub created_at: DateTime<Utc>,
    /// Speaker of the source utterance.
    pub speaker: String,
    /// Entities mentioned after coreference resolution.
    pub entities: Vec<String>,
    /// Source window id.
    pub window_id: String,
}

/// The unit of stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAtom {
    /// Unique identifier, immutable.
    pub id: String,
    /// Self-contained statement, immutable.
    pub content: String,
    /// Absolute time the fact pertains to, immutable.
    pub timestamp: DateTime<Utc>,
    /// Ingestion time.
    pub created_at: DateTime<Utc>,
    /// Dense representation.
    pub embedding: Vec<f32>,
    /// Sparse lexical representation.
    pub lexical_signature: LexicalSignature,
    /// Symbolic representation.
    pub metadata: Metadata,
    /// Active or archived.
    pub status: EntryStatus,
    /// Molecule this atom was archived into, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub molecule_id: Option<String>,
}

impl MemoryAtom {
    /// Whether the atom is in the default candidate set.
    pub fn is_active(&self) -> bool {
        self.status == EntryStatus::Active
    }

    /// Speaker recorded in metadata.
    pub fn speaker(&self) -> Option<&str> {
        self.metadata.get(META_SPEAKER).and_then(|v| v.as_str())
    }

    /// Entities recorded in metadata.
    pub fn entities(&self) -> Vec<String> {
        metadata_strings(&self.metadata, META_ENTITIES)
    }
}

/// A synthesized generalization over a cluster of atoms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMolecule {
    /// Unique identifier, stable across re-synthesis.
    pub id: String,
    /// Generalized statement.
    pub content: String,
    /// Latest member timestamp.
    pub timestamp: DateTime<Utc>,
    /// Earliest and latest member timestamps.
    pub time_span: (DateTime<Utc>, DateTime<Utc>),
    /// First synthesis time.
    pub created_at: DateTime<Utc>,
    /// Latest synthesis time.
    pub updated_at: DateTime<Utc>,
    /// Dense representation of `content`.
    pub embedding: Vec<f32>,
    /// Sparse lexical representation of `content`.
    pub lexical_signature: LexicalSignature,
    /// Aggregated symbolic representation.
    pub metadata: Metadata,
    /// Atoms summarized by this molecule, sorted.
    pub source_atom_ids: Vec<String>,
    /// Incremented on every re-synthesis; compared on write.
    pub revision: u32,
}

/// Borrowed view over either entry kind, used by retrieval.
#[derive(Debug, Clone, Copy)]
pub enum EntryRef<'a> {
    Atom(&'a MemoryAtom),
    Molecule(&'a MemoryMolecule),
}

impl<'a> EntryRef<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            EntryRef::Atom(a) => &a.id,
            EntryRef::Molecule(m) => &m.id,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            EntryRef::Atom(_) => EntryKind::Atom,
            EntryRef::Molecule(_) => EntryKind::Molecule,
        }
    }

    pub fn content(&self) -> &'a str {
        match self {
            EntryRef::Atom(a) => &a.content,
            EntryRef::Molecule(m) => &m.content,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EntryRef::Atom(a) => a.timestamp,
            EntryRef::Molecule(m) => m.timestamp,
        }
    }

    pub fn embedding(&self) -> &'a [f32] {
        match self {
            EntryRef::Atom(a) => &a.embedding,
            EntryRef::Molecule(m) => &m.embedding,
        }
    }

    pub fn lexical_signature(&self) -> &'a LexicalSignature {
        match self {
            EntryRef::Atom(a) => &a.lexical_signature,
            EntryRef::Molecule(m) => &m.lexical_signature,
        }
    }

    pub fn metadata(&self) -> &'a Metadata {
        match self {
            EntryRef::Atom(a) => &a.metadata,
            EntryRef::Molecule(m) => &m.metadata,
        }
    }

    /// Time range covered by the entry (a point for atoms).
    pub fn time_span(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            EntryRef::Atom(a) => (a.timestamp, a.timestamp),
            EntryRef::Molecule(m) => m.time_span,
        }
    }
}

/// Read a string-array metadata value, accepting a lone string too.
pub fn metadata_strings(metadata: &Metadata, key: &str) -> Vec<String> {
    match metadata.get(key) {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

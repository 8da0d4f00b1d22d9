//! SQLite-backed store.
//!
//! Each layer has its own table keyed by atom id: `atom_vectors` holds the
//! embedding as little-endian `f32`, `atom_terms` the lexical signature and
//! `atom_metadata` one JSON value per key. Times are RFC 3339 strings in a
//! fixed-width UTC form so they sort lexically.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::error::{SimpleMemError, SimpleMemResult};
use crate::index::store::{check_member, check_revision, EntryStore, ScanFilter, StoreStats};
use crate::types::{EntryStatus, LexicalSignature, MemoryAtom, MemoryMolecule, Metadata};

/// SQLite store holding atoms, their three layers, and molecules.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> SimpleMemResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (useful for testing).
    pub fn in_memory() -> SimpleMemResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> SimpleMemResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SimpleMemError::database(e.to_string()))
    }

    fn init_schema(&self) -> SimpleMemResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS atoms (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                molecule_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_atoms_timestamp ON atoms(timestamp);
            CREATE INDEX IF NOT EXISTS idx_atoms_status ON atoms(status);
            CREATE INDEX IF NOT EXISTS idx_atoms_molecule_id ON atoms(molecule_id);

            CREATE TABLE IF NOT EXISTS atom_vectors (
                atom_id TEXT PRIMARY KEY REFERENCES atoms(id),
                dims INTEGER NOT NULL,
                vector BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS atom_terms (
                atom_id TEXT NOT NULL REFERENCES atoms(id),
                term TEXT NOT NULL,
                weight REAL NOT NULL,
                PRIMARY KEY (atom_id, term)
            );

            CREATE INDEX IF NOT EXISTS idx_atom_terms_term ON atom_terms(term);

            CREATE TABLE IF NOT EXISTS atom_metadata (
                atom_id TEXT NOT NULL REFERENCES atoms(id),
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (atom_id, key)
            );

            CREATE TABLE IF NOT EXISTS molecules (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                span_start TEXT NOT NULL,
                span_end TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                vector BLOB NOT NULL,
                terms TEXT NOT NULL,
                metadata TEXT NOT NULL,
                revision INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS molecule_members (
                molecule_id TEXT NOT NULL REFERENCES molecules(id),
                atom_id TEXT NOT NULL REFERENCES atoms(id),
                PRIMARY KEY (molecule_id, atom_id)
            );
            ",
        )?;

        Ok(())
    }
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> SimpleMemResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SimpleMemError::database(format!("invalid timestamp '{}': {}", s, e)))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Raw `atoms` row before the layer tables are joined in.
struct AtomRow {
    id: String,
    content: String,
    timestamp: String,
    created_at: String,
    status: String,
    molecule_id: Option<String>,
}

const ATOM_COLUMNS: &str = "id, content, timestamp, created_at, status, molecule_id";

fn atom_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AtomRow> {
    Ok(AtomRow {
        id: row.get(0)?,
        content: row.get(1)?,
        timestamp: row.get(2)?,
        created_at: row.get(3)?,
        status: row.get(4)?,
        molecule_id: row.get(5)?,
    })
}

/// Join the vector, term and metadata layers onto an atom row.
fn load_atom(conn: &Connection, row: AtomRow) -> SimpleMemResult<MemoryAtom> {
    let embedding = conn
        .prepare_cached("SELECT vector FROM atom_vectors WHERE atom_id = ?1")?
        .query_row(params![row.id], |r| r.get::<_, Vec<u8>>(0))
        .optional()?
        .map(|bytes| decode_vector(&bytes))
        .unwrap_or_default();

    let mut lexical_signature = LexicalSignature::new();
    let mut stmt = conn.prepare_cached("SELECT term, weight FROM atom_terms WHERE atom_id = ?1")?;
    let terms = stmt.query_map(params![row.id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })?;
    for term in terms {
        let (term, weight) = term?;
        lexical_signature.insert(term, weight as f32);
    }

    let mut metadata = Metadata::new();
    let mut stmt = conn.prepare_cached("SELECT key, value FROM atom_metadata WHERE atom_id = ?1")?;
    let values = stmt.query_map(params![row.id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;
    for value in values {
        let (key, raw) = value?;
        metadata.insert(key, serde_json::from_str(&raw)?);
    }

    let status = EntryStatus::from_str(&row.status)
        .map_err(|_| SimpleMemError::database(format!("invalid status '{}'", row.status)))?;

    Ok(MemoryAtom {
        timestamp: parse_time(&row.timestamp)?,
        created_at: parse_time(&row.created_at)?,
        id: row.id,
        content: row.content,
        embedding,
        lexical_signature,
        metadata,
        status,
        molecule_id: row.molecule_id,
    })
}

fn fetch_atom(conn: &Connection, id: &str) -> SimpleMemResult<Option<MemoryAtom>> {
    let row = conn
        .prepare_cached(&format!("SELECT {} FROM atoms WHERE id = ?1", ATOM_COLUMNS))?
        .query_row(params![id], atom_row)
        .optional()?;
    row.map(|row| load_atom(conn, row)).transpose()
}

fn insert_atom(tx: &Transaction<'_>, atom: &MemoryAtom) -> SimpleMemResult<()> {
    tx.execute(
        "INSERT INTO atoms (id, content, timestamp, created_at, status, molecule_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            atom.id,
            atom.content,
            format_time(&atom.timestamp),
            format_time(&atom.created_at),
            atom.status.to_string(),
            atom.molecule_id,
        ],
    )?;
    tx.execute(
        "INSERT INTO atom_vectors (atom_id, dims, vector) VALUES (?1, ?2, ?3)",
        params![atom.id, atom.embedding.len() as i64, encode_vector(&atom.embedding)],
    )?;
    for (term, weight) in &atom.lexical_signature {
        tx.execute(
            "INSERT INTO atom_terms (atom_id, term, weight) VALUES (?1, ?2, ?3)",
            params![atom.id, term, *weight as f64],
        )?;
    }
    for (key, value) in &atom.metadata {
        tx.execute(
            "INSERT INTO atom_metadata (atom_id, key, value) VALUES (?1, ?2, ?3)",
            params![atom.id, key, serde_json::to_string(value)?],
        )?;
    }
    Ok(())
}

fn molecule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MoleculeRow> {
    Ok(MoleculeRow {
        id: row.get(0)?,
        content: row.get(1)?,
        timestamp: row.get(2)?,
        span_start: row.get(3)?,
        span_end: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        vector: row.get(7)?,
        terms: row.get(8)?,
        metadata: row.get(9)?,
        revision: row.get(10)?,
    })
}

struct MoleculeRow {
    id: String,
    content: String,
    timestamp: String,
    span_start: String,
    span_end: String,
    created_at: String,
    updated_at: String,
    vector: Vec<u8>,
    terms: String,
    metadata: String,
    revision: i64,
}

const MOLECULE_COLUMNS: &str = "id, content, timestamp, span_start, span_end, created_at, \
                                updated_at, vector, terms, metadata, revision";

fn load_molecule(conn: &Connection, row: MoleculeRow) -> SimpleMemResult<MemoryMolecule> {
    let mut stmt = conn.prepare_cached(
        "SELECT atom_id FROM molecule_members WHERE molecule_id = ?1 ORDER BY atom_id",
    )?;
    let source_atom_ids = stmt
        .query_map(params![row.id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MemoryMolecule {
        timestamp: parse_time(&row.timestamp)?,
        time_span: (parse_time(&row.span_start)?, parse_time(&row.span_end)?),
        created_at: parse_time(&row.created_at)?,
        updated_at: parse_time(&row.updated_at)?,
        embedding: decode_vector(&row.vector),
        lexical_signature: serde_json::from_str(&row.terms)?,
        metadata: serde_json::from_str(&row.metadata)?,
        revision: row.revision as u32,
        source_atom_ids,
        id: row.id,
        content: row.content,
    })
}

impl EntryStore for SqliteStore {
    fn insert_atoms(&self, atoms: &[MemoryAtom]) -> SimpleMemResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for atom in atoms {
            insert_atom(&tx, atom)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_atom(&self, id: &str) -> SimpleMemResult<Option<MemoryAtom>> {
        let conn = self.lock()?;
        fetch_atom(&conn, id)
    }

    fn atoms_by_ids(&self, ids: &[String]) -> SimpleMemResult<Vec<MemoryAtom>> {
        let conn = self.lock()?;
        let mut atoms = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(atom) = fetch_atom(&conn, id)? {
                atoms.push(atom);
            }
        }
        Ok(atoms)
    }

    fn scan_atoms(&self, filter: &ScanFilter) -> SimpleMemResult<Vec<MemoryAtom>> {
        let conn = self.lock()?;

        let mut sql = format!("SELECT {} FROM atoms WHERE 1 = 1", ATOM_COLUMNS);
        let mut args: Vec<String> = Vec::new();
        if let Some(status) = filter.status {
            args.push(status.to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if filter.unowned_only {
            sql.push_str(" AND molecule_id IS NULL");
        }
        if let Some(after) = filter.after {
            args.push(format_time(&after));
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len()));
        }
        if let Some(before) = filter.before {
            args.push(format_time(&before));
            sql.push_str(&format!(" AND timestamp <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY timestamp, id");

        let rows = {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), atom_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut atoms = Vec::with_capacity(rows.len());
        for row in rows {
            let atom = load_atom(&conn, row)?;
            if filter.metadata.as_ref().map_or(true, |f| f.matches(&atom.metadata)) {
                atoms.push(atom);
            }
        }
        Ok(atoms)
    }

    fn recent_atoms(&self, limit: usize) -> SimpleMemResult<Vec<MemoryAtom>> {
        let conn = self.lock()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM atoms ORDER BY rowid DESC LIMIT ?1",
                ATOM_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![limit], atom_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut atoms = Vec::with_capacity(rows.len());
        for row in rows {
            atoms.push(load_atom(&conn, row)?);
        }
        Ok(atoms)
    }

    fn get_molecule(&self, id: &str) -> SimpleMemResult<Option<MemoryMolecule>> {
        let conn = self.lock()?;
        let row = conn
            .prepare_cached(&format!("SELECT {} FROM molecules WHERE id = ?1", MOLECULE_COLUMNS))?
            .query_row(params![id], molecule_from_row)
            .optional()?;
        row.map(|row| load_molecule(&conn, row)).transpose()
    }

    fn list_molecules(&self) -> SimpleMemResult<Vec<MemoryMolecule>> {
        let conn = self.lock()?;
        let rows = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM molecules ORDER BY id",
                MOLECULE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], molecule_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(|row| load_molecule(&conn, row)).collect()
    }

    fn commit_molecule(
        &self,
        molecule: &MemoryMolecule,
        expected_revision: Option<u32>,
    ) -> SimpleMemResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let stored: Option<u32> = tx
            .query_row(
                "SELECT revision FROM molecules WHERE id = ?1",
                params![molecule.id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .map(|r| r as u32);
        check_revision(molecule, expected_revision, stored)?;
        for atom_id in &molecule.source_atom_ids {
            let atom = fetch_atom(&tx, atom_id)?;
            check_member(&molecule.id, atom_id, atom.as_ref())?;
        }

        tx.execute(
            "INSERT INTO molecules (id, content, timestamp, span_start, span_end, created_at,
                                    updated_at, vector, terms, metadata, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                timestamp = excluded.timestamp,
                span_start = excluded.span_start,
                span_end = excluded.span_end,
                updated_at = excluded.updated_at,
                vector = excluded.vector,
                terms = excluded.terms,
                metadata = excluded.metadata,
                revision = excluded.revision",
            params![
                molecule.id,
                molecule.content,
                format_time(&molecule.timestamp),
                format_time(&molecule.time_span.0),
                format_time(&molecule.time_span.1),
                format_time(&molecule.created_at),
                format_time(&molecule.updated_at),
                encode_vector(&molecule.embedding),
                serde_json::to_string(&molecule.lexical_signature)?,
                serde_json::to_string(&molecule.metadata)?,
                molecule.revision as i64,
            ],
        )?;
        tx.execute(
            "DELETE FROM molecule_members WHERE molecule_id = ?1",
            params![molecule.id],
        )?;
        for atom_id in &molecule.source_atom_ids {
            tx.execute(
                "INSERT INTO molecule_members (molecule_id, atom_id) VALUES (?1, ?2)",
                params![molecule.id, atom_id],
            )?;
            tx.execute(
                "UPDATE atoms SET status = ?1, molecule_id = ?2 WHERE id = ?3",
                params![EntryStatus::Archived.to_string(), molecule.id, atom_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn stats(&self) -> SimpleMemResult<StoreStats> {
        let conn = self.lock()?;
        let mut counts: HashMap<String, i64> = HashMap::new();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM atoms GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            counts.insert(status, count);
        }
        let molecules: i64 = conn.query_row("SELECT COUNT(*) FROM molecules", [], |r| r.get(0))?;

        let active = counts.get("active").copied().unwrap_or(0) as usize;
        let archived = counts.get("archived").copied().unwrap_or(0) as usize;
        Ok(StoreStats {
            atoms: active + archived,
            active_atoms: active,
            archived_atoms: archived,
            molecules: molecules as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::index::testing::{sample_atom, sample_molecule};
    use crate::types::Filter;

    #[test]
    fn test_atom_round_trips_all_layers() {
        let store = SqliteStore::in_memory().unwrap();
        let atom = sample_atom("a", 3);
        store.insert_atoms(&[atom.clone()]).unwrap();

        let loaded = store.get_atom("a").unwrap().unwrap();
        assert_eq!(loaded, atom);
        assert!(store.get_atom("missing").unwrap().is_none());
    }

    #[test]
    fn test_scan_filters() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_atoms(&[sample_atom("a", 1), sample_atom("b", 5), sample_atom("c", 9)])
            .unwrap();

        let window = ScanFilter::active().with_time_range(
            Some(sample_atom("x", 2).timestamp),
            Some(sample_atom("x", 9).timestamp),
        );
        let ids: Vec<String> = store
            .scan_atoms(&window)
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);

        let by_speaker = ScanFilter::all().with_metadata(Filter::eq("speaker", "Nobody"));
        assert!(store.scan_atoms(&by_speaker).unwrap().is_empty());
    }

    #[test]
    fn test_molecule_commit_and_conflict() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_atoms(&[sample_atom("a", 1), sample_atom("b", 2), sample_atom("c", 3)])
            .unwrap();

        let molecule = sample_molecule("m", &["a", "b"], 0);
        store.commit_molecule(&molecule, None).unwrap();
        assert_eq!(store.get_molecule("m").unwrap().unwrap(), molecule);

        let stats = store.stats().unwrap();
        assert_eq!(stats.archived_atoms, 2);
        assert_eq!(stats.molecules, 1);

        let err = store
            .commit_molecule(&sample_molecule("m", &["a", "b", "c"], 1), Some(3))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConCasConflict);
        assert!(store.get_atom("c").unwrap().unwrap().is_active());

        store
            .commit_molecule(&sample_molecule("m", &["a", "b", "c"], 1), Some(0))
            .unwrap();
        let listed = store.list_molecules().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].source_atom_ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reopen_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.insert_atoms(&[sample_atom("a", 1)]).unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.stats().unwrap().atoms, 1);
    }

    #[test]
    fn test_recent_atoms_follow_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.insert_atoms(&[sample_atom("b", 2), sample_atom("a", 5)]).unwrap();
            store.insert_atoms(&[sample_atom("c", 1)]).unwrap();
            store
                .commit_molecule(&sample_molecule("m1", &["a", "b"], 0), None)
                .unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        let recent = store.recent_atoms(2).unwrap();
        let ids: Vec<&str> = recent.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
        assert_eq!(recent[1].molecule_id.as_deref(), Some("m1"));
        assert_eq!(recent[1].embedding, sample_atom("a", 5).embedding);
        assert_eq!(store.recent_atoms(10).unwrap().len(), 3);
    }
}

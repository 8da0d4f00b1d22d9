//! End-to-end tests through the `Memory` facade.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use simplemem_core::builtin::HashingEmbedder;
use simplemem_core::index::{IndexConfig, TriLayerIndexer};
use simplemem_core::ingestion::GateConfig;
use simplemem_core::text::{contains_relative_expression, extract_timestamp};
use simplemem_core::types::AtomCandidate;
use simplemem_core::{
    EntryKind, ErrorCode, GateDecision, InMemoryStore, Memory, MemoryConfig, QueryConstraints,
};

const DIMS: usize = 256;

fn config() -> MemoryConfig {
    MemoryConfig::builder()
        .in_memory()
        .index(IndexConfig {
            embedding_dims: DIMS,
        })
        .gate(GateConfig {
            alpha: 1.0,
            redundancy_threshold: 0.1,
            history_size: 8,
        })
        .build()
        .unwrap()
}

fn monday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 13, 10, 0, 0).unwrap()
}

#[tokio::test]
async fn test_coffee_plan_is_atomized_and_acknowledgement_rejected() {
    let memory = Memory::from_config(config()).unwrap();

    let first = memory
        .ingest_at("Alice: I'll meet Bob for coffee next Monday", monday())
        .await
        .unwrap();
    assert!(first.accepted);
    assert_eq!(first.atom_ids.len(), 1);

    let atom = memory.get_atom(&first.atom_ids[0]).unwrap();
    assert_eq!(atom.timestamp, Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap());
    assert!(atom.content.contains("Alice") && atom.content.contains("Bob"));
    assert_eq!(atom.entities(), vec!["Alice", "Bob"]);
    assert!(!contains_relative_expression(&atom.content));
    assert_eq!(extract_timestamp(&atom.content), Some(atom.timestamp));

    let second = memory
        .ingest_at("Bob: Sounds good, see you then", monday())
        .await
        .unwrap();
    assert!(!second.accepted);
    assert_eq!(second.windows[0].decision, GateDecision::Reject);
    assert!(second.atom_ids.is_empty());
    assert_eq!(memory.stats().unwrap().atoms, 1);
    assert_eq!(memory.history_len().await, 1);
}

#[tokio::test]
async fn test_default_gate_accepts_acknowledgement_without_atoms() {
    let config = MemoryConfig::builder()
        .in_memory()
        .index(IndexConfig {
            embedding_dims: DIMS,
        })
        .build()
        .unwrap();
    assert_eq!(config.gate.alpha, 0.5);
    assert_eq!(config.gate.redundancy_threshold, 0.3);
    let memory = Memory::from_config(config).unwrap();

    let first = memory
        .ingest_at("Alice: I'll meet Bob for coffee next Monday", monday())
        .await
        .unwrap();
    assert_eq!(first.atom_ids.len(), 1);

    // Nothing new by entity, but the wording is far from the plan, so the
    // blended score clears the threshold and the atomizer drops the filler.
    let second = memory
        .ingest_at("Bob: Sounds good, see you then", monday())
        .await
        .unwrap();
    let report = &second.windows[0];
    assert!(second.accepted);
    assert_eq!(report.decision, GateDecision::Accept);
    assert_eq!(report.score.entity_novelty, 0.0);
    assert!(report.score.score >= GateConfig::default().redundancy_threshold);
    assert!(second.atom_ids.is_empty());
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(memory.stats().unwrap().atoms, 1);
    assert_eq!(memory.history_len().await, 2);
}

#[tokio::test]
async fn test_out_of_range_offsets_drop_the_claim() {
    let memory = Memory::from_config(config()).unwrap();
    let result = memory
        .ingest_at(
            "Dave: I'll renew my passport in 100000000 days\nErin: I'll visit Porto in 4294967297 months\nCarol: I adopted a kitten named Miso",
            monday(),
        )
        .await
        .unwrap();

    assert!(result.accepted);
    assert_eq!(result.atom_ids.len(), 1);
    let atom = memory.get_atom(&result.atom_ids[0]).unwrap();
    assert!(atom.content.contains("Miso"));

    let dropped: Vec<&str> = result
        .windows
        .iter()
        .flat_map(|w| w.dropped.iter().map(|d| d.text.as_str()))
        .collect();
    assert!(dropped.iter().any(|t| t.contains("100000000 days")));
    assert!(dropped.iter().any(|t| t.contains("4294967297 months")));
}

#[tokio::test]
async fn test_plan_query_finds_the_atom() {
    let memory = Memory::from_config(config()).unwrap();
    for line in [
        "Carol: I adopted a kitten named Miso",
        "Dave: I repaired the garden fence in Leeds",
        "Erin: I finished reading a novel about Lisbon",
    ] {
        memory.ingest_at(line, monday()).await.unwrap();
    }
    let plan = memory
        .ingest_at("Alice: I'll meet Bob for coffee next Monday", monday())
        .await
        .unwrap();
    let atom_id = plan.atom_ids[0].clone();
    assert_eq!(memory.stats().unwrap().atoms, 4);

    let result = memory
        .query("What did Alice plan with Bob?", None)
        .await
        .unwrap();
    let k_min = memory.config().retrieval.k_min;
    assert!(!result.no_relevant_memory);
    assert!(result.entry_ids.iter().take(k_min).any(|id| *id == atom_id));
    assert!(result.context.contains("[2024-05-20T00:00:00Z]: Alice will meet Bob"));
    assert!(result.tokens_used <= memory.config().retrieval.token_budget);
}

#[tokio::test]
async fn test_retrieval_is_deterministic() {
    let memory = Memory::from_config(config()).unwrap();
    memory
        .ingest_at(
            "Alice: I'll meet Bob for coffee next Monday\nCarol: I adopted a kitten named Miso\nDave: I repaired the garden fence in Leeds",
            monday(),
        )
        .await
        .unwrap();

    let a = memory.query("coffee kitten fence", None).await.unwrap();
    let b = memory.query("coffee kitten fence", None).await.unwrap();
    assert_eq!(a.entry_ids, b.entry_ids);
    assert_eq!(a.context, b.context);
    let scores: Vec<f32> = a.entries.iter().map(|e| e.score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_malformed_and_empty_queries() {
    let memory = Memory::from_config(config()).unwrap();
    memory
        .ingest_at("Alice: I'll meet Bob for coffee next Monday", monday())
        .await
        .unwrap();

    let inverted = QueryConstraints::new()
        .after(monday())
        .before(monday() - Duration::days(1));
    let err = memory.query("coffee", Some(inverted)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValInvalidConstraint);

    let empty = QueryConstraints::new().before(monday() - Duration::days(30));
    let result = memory.query("coffee", Some(empty)).await.unwrap();
    assert!(result.no_relevant_memory);
    assert!(result.context.is_empty());
    assert!(result.entry_ids.is_empty());
}

/// 50 identical weekday-morning atoms starting Monday 2024-04-01.
fn latte_mornings() -> Vec<AtomCandidate> {
    let start = Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap();
    (0..)
        .map(|day| start + Duration::days(day))
        .filter(|t| !matches!(t.weekday(), Weekday::Sat | Weekday::Sun))
        .take(50)
        .enumerate()
        .map(|(i, t)| AtomCandidate {
            content: "Alice orders a latte at the corner cafe".to_string(),
            timestamp: t + Duration::minutes((i % 3) as i64 * 10),
            created_at: t,
            speaker: "Alice".to_string(),
            entities: vec!["Alice".to_string()],
            window_id: format!("w{}", i),
        })
        .collect()
}

#[tokio::test]
async fn test_latte_mornings_consolidate_into_one_molecule() {
    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(HashingEmbedder::new(DIMS).unwrap());
    let indexer = TriLayerIndexer::new(store.clone(), embedder.clone());
    let batch = indexer.insert_batch(latte_mornings()).await.unwrap();
    assert_eq!(batch.atoms.len(), 50);

    let memory = Memory::builder(config())
        .store(store)
        .embedder(embedder)
        .build()
        .unwrap();

    let report = memory.consolidate(None).await.unwrap();
    assert_eq!(report.created.len(), 1);
    assert!(report.skipped.is_empty());

    let molecule = memory.get_molecule(&report.created[0]).unwrap();
    assert_eq!(molecule.source_atom_ids.len(), 50);
    let stats = memory.stats().unwrap();
    assert_eq!(stats.molecules, 1);
    assert_eq!(stats.archived_atoms, 50);
    assert_eq!(stats.active_atoms, 0);

    let again = memory.consolidate(None).await.unwrap();
    assert!(!again.changed());
    assert_eq!(memory.stats().unwrap(), stats);

    // Archived atoms leave the default candidate set but stay reachable.
    let result = memory.query("latte", None).await.unwrap();
    assert_eq!(result.entry_ids, vec![molecule.id.clone()]);

    let sources = memory.drill_down(&molecule.id).unwrap();
    assert_eq!(sources.len(), 50);
    assert!(sources.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(sources.iter().all(|a| a.molecule_id.as_deref() == Some(molecule.id.as_str())));

    let drilled = memory
        .query("latte", Some(QueryConstraints::new().drill_down()))
        .await
        .unwrap();
    assert!(drilled.entries.iter().any(|e| e.kind == EntryKind::Atom));

    let within = memory
        .query("latte", Some(QueryConstraints::new().molecule(molecule.id.clone())))
        .await
        .unwrap();
    assert!(within
        .entry_ids
        .iter()
        .all(|id| molecule.source_atom_ids.contains(id)));
}

#[tokio::test]
async fn test_sqlite_memory_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("memory.db");
    let config = MemoryConfig {
        storage: MemoryConfig::builder().sqlite(&path).build().unwrap().storage,
        ..config()
    };

    let atom_id = {
        let memory = Memory::from_config(config.clone()).unwrap();
        let result = memory
            .ingest_at("Alice: I'll meet Bob for coffee next Monday", monday())
            .await
            .unwrap();
        result.atom_ids[0].clone()
    };

    let reopened = Memory::from_config(config).unwrap();
    let atom = reopened.get_atom(&atom_id).unwrap();
    assert_eq!(atom.timestamp.date_naive().to_string(), "2024-05-20");
    assert_eq!(atom.embedding.len(), DIMS);

    let result = reopened.query("coffee with Bob", None).await.unwrap();
    assert_eq!(result.entry_ids, vec![atom_id]);
}

#[tokio::test]
async fn test_sqlite_reopen_keeps_gate_history() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    let config = MemoryConfig {
        storage: MemoryConfig::builder().sqlite(&path).build().unwrap().storage,
        ..config()
    };

    {
        let memory = Memory::from_config(config.clone()).unwrap();
        let result = memory
            .ingest_at("Alice: I'll meet Bob for coffee next Monday", monday())
            .await
            .unwrap();
        assert_eq!(result.atom_ids.len(), 1);
    }

    let reopened = Memory::from_config(config).unwrap();
    assert_eq!(reopened.history_len().await, 1);

    // Bob is already known, so the acknowledgement stays redundant.
    let second = reopened
        .ingest_at("Bob: Sounds good, see you then", monday())
        .await
        .unwrap();
    assert!(!second.accepted);
    assert_eq!(second.windows[0].decision, GateDecision::Reject);
    assert!(second.windows[0].score.new_entities.is_empty());
    assert_eq!(reopened.stats().unwrap().atoms, 1);
}

#[tokio::test]
async fn test_ingest_and_query_run_concurrently() {
    let memory = Memory::from_config(config()).unwrap();
    memory
        .ingest_at("Carol: I adopted a kitten named Miso", monday())
        .await
        .unwrap();

    let (ingested, queried) = tokio::join!(
        memory.ingest_at("Dave: I repaired the garden fence in Leeds", monday()),
        memory.query("kitten", None),
    );
    assert_eq!(ingested.unwrap().atom_ids.len(), 1);
    assert!(!queried.unwrap().entry_ids.is_empty());
}

//! Core types for gated ingestion.

use serde::{Deserialize, Serialize};

use crate::text::TimeAnchor;
use crate::types::AtomCandidate;

/// Outcome of the entropy gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Information-dense enough to atomize.
    Accept,
    /// Redundant with recent history; produces no atoms.
    Reject,
}

/// Breakdown of a window's information score.
///
/// `score = alpha * entity_novelty + (1 - alpha) * semantic_novelty`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateScore {
    /// Combined score `H`.
    pub score: f32,
    /// `min(1, |new entities| / |window|)`.
    pub entity_novelty: f32,
    /// `1 - cos(window, recent history)`; 0 with empty history.
    pub semantic_novelty: f32,
    /// Entities not present in recent history.
    pub new_entities: Vec<String>,
}

impl GateScore {
    pub(crate) fn empty() -> Self {
        Self {
            score: 0.0,
            entity_novelty: 0.0,
            semantic_novelty: 0.0,
            new_entities: Vec::new(),
        }
    }
}

/// Why a claim did not become an atom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedClaim {
    pub speaker: String,
    pub text: String,
    pub reason: String,
}

/// Atomizer output for one window. Ordering of `candidates` is not significant.
#[derive(Debug, Clone, Default)]
pub struct AtomizeOutput {
    pub candidates: Vec<AtomCandidate>,
    pub dropped: Vec<DroppedClaim>,
    /// Latest anchor resolved in the window, for later `then` references.
    pub last_anchor: Option<TimeAnchor>,
}

/// What happened to one dialogue window during ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowReport {
    pub window_id: String,
    pub decision: GateDecision,
    pub score: GateScore,
    /// Ids of atoms committed from this window.
    pub atom_ids: Vec<String>,
    /// Claims dropped by the atomizer.
    pub dropped: Vec<DroppedClaim>,
    /// Prepared atoms that failed validation and were discarded.
    pub discarded: usize,
}

/// Result of `Memory::ingest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestResult {
    /// Whether any window passed the gate.
    pub accepted: bool,
    /// Ids of all atoms committed, in window order.
    pub atom_ids: Vec<String>,
    pub windows: Vec<WindowReport>,
}

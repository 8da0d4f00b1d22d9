//! Entropy gate: scores a dialogue window for information density.
//!
//! `H = alpha * min(1, new_entities / |window|) + (1 - alpha) * (1 - cos(window, history))`
//!
//! Windows scoring below the redundancy threshold produce no atoms. Scoring
//! is side-effect free; the history buffer only changes on [`EntropyGate::commit`],
//! which the pipeline calls once the window's atoms are committed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::SimpleMemResult;
use crate::ingestion::atomizer::window_known_names;
use crate::ingestion::history::{HistoryFrame, RecentHistory};
use crate::ingestion::types::{GateDecision, GateScore};
use crate::text::{extract_entities, TimeAnchor};
use crate::traits::{Embedder, EmbeddingAction};
use crate::types::{DialogueWindow, DEFAULT_SPEAKER};
use crate::vector::cosine_similarity;

/// Entropy gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Weight of entity novelty against semantic novelty.
    pub alpha: f32,
    /// Windows with `H` below this are rejected.
    pub redundancy_threshold: f32,
    /// Accepted windows remembered for novelty comparison.
    pub history_size: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            redundancy_threshold: 0.3,
            history_size: 8,
        }
    }
}

impl GateConfig {
    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err("alpha must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.redundancy_threshold) {
            return Err("redundancy_threshold must be between 0.0 and 1.0");
        }
        if self.history_size == 0 {
            return Err("history_size must be at least 1");
        }
        Ok(())
    }
}

/// A scored window waiting to be committed to history.
#[derive(Debug, Clone)]
pub struct GateEvaluation {
    pub window_id: String,
    pub decision: GateDecision,
    pub score: GateScore,
    entities: Vec<String>,
    embedding: Vec<f32>,
    speakers: Vec<String>,
}

impl GateEvaluation {
    pub fn accepted(&self) -> bool {
        self.decision == GateDecision::Accept
    }
}

/// Information-density filter in front of the atomizer.
pub struct EntropyGate {
    config: GateConfig,
    embedder: Arc<dyn Embedder>,
}

impl EntropyGate {
    pub fn new(config: GateConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self { config, embedder }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Score `window` against `history` without modifying either.
    pub async fn evaluate(
        &self,
        window: &DialogueWindow,
        history: &RecentHistory,
    ) -> SimpleMemResult<GateEvaluation> {
        if window.is_empty() {
            debug!(window_id = %window.id, "Empty window rejected");
            return Ok(GateEvaluation {
                window_id: window.id.clone(),
                decision: GateDecision::Reject,
                score: GateScore::empty(),
                entities: Vec::new(),
                embedding: Vec::new(),
                speakers: Vec::new(),
            });
        }

        let speakers = utterance_speakers(window);
        let entities = window_entities(window, history, &speakers);

        let seen = history.seen_entities();
        let new_entities: Vec<String> = entities
            .iter()
            .filter(|e| !seen.contains(&e.to_lowercase()))
            .cloned()
            .collect();
        let entity_novelty = (new_entities.len() as f32 / window.len() as f32).min(1.0);

        let embedding = self
            .embedder
            .embed(&window.text(), Some(EmbeddingAction::Add))
            .await?;
        let similarity = history
            .mean_embedding()
            .map(|mean| cosine_similarity(&embedding, &mean))
            .unwrap_or(0.0);
        let semantic_novelty = (1.0 - similarity).clamp(0.0, 1.0);

        let alpha = self.config.alpha;
        let score = alpha * entity_novelty + (1.0 - alpha) * semantic_novelty;
        let decision = if score < self.config.redundancy_threshold {
            GateDecision::Reject
        } else {
            GateDecision::Accept
        };

        debug!(
            window_id = %window.id,
            utterances = window.len(),
            new_entities = new_entities.len(),
            entity_novelty,
            semantic_novelty,
            score,
            ?decision,
            "Window scored"
        );

        Ok(GateEvaluation {
            window_id: window.id.clone(),
            decision,
            score: GateScore {
                score,
                entity_novelty,
                semantic_novelty,
                new_entities,
            },
            entities,
            embedding,
            speakers,
        })
    }

    /// Record an accepted window in `history`. Rejected windows leave it unchanged.
    pub fn commit(
        &self,
        history: &mut RecentHistory,
        evaluation: GateEvaluation,
        last_anchor: Option<TimeAnchor>,
    ) {
        if !evaluation.accepted() {
            return;
        }
        history.push(HistoryFrame {
            window_id: evaluation.window_id,
            entities: evaluation.entities,
            embedding: evaluation.embedding,
            speakers: evaluation.speakers,
            last_anchor,
        });
    }
}

fn utterance_speakers(window: &DialogueWindow) -> Vec<String> {
    let mut speakers: Vec<String> = Vec::new();
    for u in &window.utterances {
        if u.speaker != DEFAULT_SPEAKER && !speakers.contains(&u.speaker) {
            speakers.push(u.speaker.clone());
        }
    }
    speakers
}

/// Speakers plus proper nouns mentioned in the atomizable turns.
fn window_entities(
    window: &DialogueWindow,
    history: &RecentHistory,
    speakers: &[String],
) -> Vec<String> {
    let known = window_known_names(window, history);
    let mut entities: Vec<String> = speakers.to_vec();
    for u in &window.utterances {
        for entity in extract_entities(&u.text, &known) {
            if !entities.contains(&entity) {
                entities.push(entity);
            }
        }
    }
    entities
}

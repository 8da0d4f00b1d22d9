//! Retrieval engine: hybrid dense + lexical + symbolic ranking with
//! complexity-adjusted depth.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::{CandidateMode, LayerLimits, RetrievalConfig};
use super::constraints::QueryConstraints;
use super::context::{assemble, format_line};
use super::lexical::CandidateIndex;
use super::scoring::{query_terms, HybridWeights};
use crate::error::{SimpleMemError, SimpleMemResult};
use crate::index::{EntryStore, ScanFilter};
use crate::traits::{ComplexityEstimator, Embedder, EmbeddingAction, QueryPlanner, Reflector};
use crate::types::{EntryKind, EntryRef, MemoryAtom, MemoryMolecule};
use crate::vector::cosine_similarity;

/// Per-signal scores behind a ranked entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSignals {
    /// Cosine similarity of the best-scoring sub-query.
    pub semantic: f32,
    /// BM25 normalized over the candidate set.
    pub lexical: f32,
    /// Every soft constraint was satisfied.
    pub soft_match: bool,
}

/// One entry in the ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub id: String,
    pub kind: EntryKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub score: f32,
    pub signals: RetrievalSignals,
}

/// Result of a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// `[timestamp]: content` lines, best first.
    pub context: String,
    /// Ids of the entries in `context`, in the same order.
    pub entry_ids: Vec<String>,
    pub tokens_used: usize,
    /// Nothing made it into the context.
    pub no_relevant_memory: bool,
    /// Estimated query complexity in `[0, 1]`.
    pub complexity: f32,
    /// Result count chosen for that complexity.
    pub depth: usize,
    pub entries: Vec<RankedEntry>,
}

/// Owned candidate set for one query.
#[derive(Default)]
struct Candidates {
    atoms: Vec<MemoryAtom>,
    molecules: Vec<MemoryMolecule>,
}

impl Candidates {
    fn entries(&self) -> impl Iterator<Item = EntryRef<'_>> {
        self.atoms
            .iter()
            .map(EntryRef::Atom)
            .chain(self.molecules.iter().map(EntryRef::Molecule))
    }
}

struct Scored<'a> {
    entry: EntryRef<'a>,
    score: f32,
    signals: RetrievalSignals,
}

/// Ranks atoms and molecules against a query.
pub struct RetrievalEngine {
    store: Arc<dyn EntryStore>,
    embedder: Arc<dyn Embedder>,
    complexity: Arc<dyn ComplexityEstimator>,
    planner: Option<Arc<dyn QueryPlanner>>,
    reflector: Option<Arc<dyn Reflector>>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn EntryStore>,
        embedder: Arc<dyn Embedder>,
        complexity: Arc<dyn ComplexityEstimator>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            complexity,
            planner: None,
            reflector: None,
            config,
        }
    }

    /// Decompose queries with `planner` when `config.planning` is set.
    pub fn with_planner(mut self, planner: Arc<dyn QueryPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Ask `reflector` for follow-up queries, up to `config.reflection_rounds` times.
    pub fn with_reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Rank memory entries for `query` and assemble a context within budget.
    ///
    /// Only malformed constraints fail. An empty candidate set yields an
    /// empty context with `no_relevant_memory` set.
    pub async fn query(
        &self,
        query: &str,
        constraints: &QueryConstraints,
    ) -> SimpleMemResult<QueryResult> {
        constraints.validate()?;

        let complexity = match self.complexity.estimate(query).await {
            Ok(c) if c.is_finite() => c.clamp(0.0, 1.0),
            Ok(_) => 0.0,
            Err(e) => {
                warn!(error = %e, "Complexity estimation failed, using minimum depth");
                0.0
            }
        };
        let depth = self.config.depth_for(complexity);

        let candidates = self.load_candidates(constraints)?;
        let admitted: Vec<EntryRef<'_>> = candidates
            .entries()
            .filter(|e| constraints.admits(*e))
            .collect();

        let mut result = QueryResult {
            complexity,
            depth,
            no_relevant_memory: true,
            ..Default::default()
        };
        if admitted.is_empty() {
            debug!(query, "No candidates after hard filtering");
            return Ok(result);
        }

        let signatures = admitted.iter().map(|e| (e.id(), e.lexical_signature()));
        let lexical_index = match CandidateIndex::build(signatures) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!(error = %e, "Lexical index failed, ranking on semantic and symbolic layers only");
                None
            }
        };

        let mut sub_queries = self.plan(query).await;
        let mut scored = self
            .rank(&sub_queries, &admitted, lexical_index.as_ref(), constraints, depth)
            .await;
        if let Some(reflector) = &self.reflector {
            for round in 0..self.config.reflection_rounds {
                let lines = context_lines(&scored);
                let follow_ups = match reflector.reflect(query, &lines).await {
                    Ok(follow_ups) => follow_ups,
                    Err(e) => {
                        warn!(error = %e, round, "Reflection failed, keeping the current ranking");
                        break;
                    }
                };
                let before = sub_queries.len();
                for follow_up in follow_ups {
                    let follow_up = follow_up.trim();
                    if !follow_up.is_empty() && !sub_queries.iter().any(|q| q == follow_up) {
                        sub_queries.push(follow_up.to_string());
                    }
                }
                if sub_queries.len() == before {
                    debug!(round, "Reflection found the context sufficient");
                    break;
                }
                debug!(round, added = sub_queries.len() - before, "Reflection added follow-up queries");
                scored = self
                    .rank(&sub_queries, &admitted, lexical_index.as_ref(), constraints, depth)
                    .await;
            }
        }

        let lines = context_lines(&scored);
        let budget = constraints.token_budget.unwrap_or(self.config.token_budget);
        let assembled = assemble(&lines, budget);
        scored.truncate(assembled.kept);

        debug!(
            query,
            candidates = admitted.len(),
            sub_queries = sub_queries.len(),
            depth,
            kept = assembled.kept,
            tokens = assembled.tokens_used,
            "Query ranked"
        );

        result.context = assembled.text;
        result.tokens_used = assembled.tokens_used;
        result.no_relevant_memory = scored.is_empty();
        result.entry_ids = scored.iter().map(|s| s.entry.id().to_string()).collect();
        result.entries = scored
            .into_iter()
            .map(|s| RankedEntry {
                id: s.entry.id().to_string(),
                kind: s.entry.kind(),
                content: s.entry.content().to_string(),
                timestamp: s.entry.timestamp(),
                score: s.score,
                signals: s.signals,
            })
            .collect();
        Ok(result)
    }

    fn load_candidates(&self, constraints: &QueryConstraints) -> SimpleMemResult<Candidates> {
        if let Some(id) = &constraints.molecule_id {
            let molecule = self
                .store
                .get_molecule(id)?
                .ok_or_else(|| SimpleMemError::not_found(id))?;
            return Ok(Candidates {
                atoms: self.store.atoms_by_ids(&molecule.source_atom_ids)?,
                molecules: Vec::new(),
            });
        }

        let mode = constraints.mode.unwrap_or(self.config.candidate_mode);
        let scan = if constraints.drill_down {
            Some(ScanFilter::all())
        } else if mode == CandidateMode::Mixed {
            Some(ScanFilter::active())
        } else {
            None
        };
        let atoms = match scan {
            Some(filter) => self
                .store
                .scan_atoms(&filter.with_time_range(constraints.after, constraints.before))?,
            None => Vec::new(),
        };
        Ok(Candidates {
            atoms,
            molecules: self.store.list_molecules()?,
        })
    }

    async fn plan(&self, query: &str) -> Vec<String> {
        let planner = match (&self.planner, self.config.planning) {
            (Some(planner), true) => planner,
            _ => return vec![query.to_string()],
        };
        match planner.plan(query).await {
            Ok(plan) if !plan.is_empty() => plan,
            Ok(_) => vec![query.to_string()],
            Err(e) => {
                warn!(error = %e, "Query planning failed, using the query as is");
                vec![query.to_string()]
            }
        }
    }

    /// Score, pre-select, order and cut the candidates to `depth`.
    async fn rank<'a>(
        &self,
        sub_queries: &[String],
        candidates: &[EntryRef<'a>],
        lexical_index: Option<&CandidateIndex>,
        constraints: &QueryConstraints,
        depth: usize,
    ) -> Vec<Scored<'a>> {
        let mut scored = self
            .score(sub_queries, candidates, lexical_index, constraints)
            .await;
        if let Some(limits) = &self.config.layer_limits {
            scored = preselect(scored, limits);
        }
        scored.sort_by(|a, b| {
            OrderedFloat(b.score)
                .cmp(&OrderedFloat(a.score))
                .then_with(|| b.entry.timestamp().cmp(&a.entry.timestamp()))
                .then_with(|| a.entry.id().cmp(b.entry.id()))
        });
        scored.truncate(depth);
        scored
    }

    /// Score every candidate against every sub-query and keep the best.
    async fn score<'a>(
        &self,
        sub_queries: &[String],
        candidates: &[EntryRef<'a>],
        lexical_index: Option<&CandidateIndex>,
        constraints: &QueryConstraints,
    ) -> Vec<Scored<'a>> {
        let embeddings: Vec<Option<Vec<f32>>> = match self
            .embedder
            .embed_batch(sub_queries, Some(EmbeddingAction::Search))
            .await
        {
            Ok(v) if v.len() == sub_queries.len() => v.into_iter().map(Some).collect(),
            Ok(_) | Err(_) => {
                warn!("Query embedding failed, ranking on lexical and symbolic layers only");
                vec![None; sub_queries.len()]
            }
        };

        let weights = HybridWeights {
            semantic: self.config.semantic_weight,
            lexical: self.config.lexical_weight,
            constraint_bonus: self.config.constraint_bonus,
        };
        let soft: Vec<bool> = candidates.iter().map(|c| constraints.soft_match(*c)).collect();

        let mut scored: Vec<Scored<'a>> = candidates
            .iter()
            .zip(&soft)
            .map(|(entry, &soft_match)| Scored {
                entry: *entry,
                score: f32::NEG_INFINITY,
                signals: RetrievalSignals {
                    soft_match,
                    ..Default::default()
                },
            })
            .collect();

        for (sub_query, embedding) in sub_queries.iter().zip(&embeddings) {
            let terms = query_terms(sub_query);
            let lexical = match lexical_index.map(|index| index.normalized_scores(&terms)) {
                Some(Ok(scores)) => scores,
                Some(Err(e)) => {
                    warn!(error = %e, sub_query = %sub_query, "Lexical scoring failed for sub-query");
                    vec![0.0; scored.len()]
                }
                None => vec![0.0; scored.len()],
            };
            for (s, lexical) in scored.iter_mut().zip(lexical) {
                let semantic = embedding
                    .as_ref()
                    .map(|q| cosine_similarity(q, s.entry.embedding()))
                    .unwrap_or(0.0);
                let score = weights.combine(semantic, lexical, s.signals.soft_match);
                if score > s.score {
                    s.score = score;
                    s.signals.semantic = semantic;
                    s.signals.lexical = lexical;
                }
            }
        }
        scored
    }
}

fn context_lines(scored: &[Scored<'_>]) -> Vec<String> {
    scored
        .iter()
        .map(|s| format_line(&s.entry.timestamp(), s.entry.content()))
        .collect()
}

/// Union of the top candidates of each layer.
fn preselect<'a>(scored: Vec<Scored<'a>>, limits: &LayerLimits) -> Vec<Scored<'a>> {
    let mut keep: BTreeSet<usize> = BTreeSet::new();
    keep.extend(top_by(&scored, limits.semantic_top_k, |s| Some(s.signals.semantic)));
    keep.extend(top_by(&scored, limits.keyword_top_k, |s| {
        (s.signals.lexical > 0.0).then_some(s.signals.lexical)
    }));
    keep.extend(top_by(&scored, limits.structured_top_k, |s| {
        s.signals.soft_match.then_some(s.signals.semantic)
    }));

    scored
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, s)| s)
        .collect()
}

/// Indices of the `k` best candidates by `key`, skipping those without one.
fn top_by<F>(scored: &[Scored<'_>], k: usize, key: F) -> Vec<usize>
where
    F: Fn(&Scored<'_>) -> Option<f32>,
{
    let mut ranked: Vec<(usize, f32)> = scored
        .iter()
        .enumerate()
        .filter_map(|(i, s)| key(s).map(|v| (i, v)))
        .collect();
    ranked.sort_by(|a, b| {
        OrderedFloat(b.1)
            .cmp(&OrderedFloat(a.1))
            .then_with(|| scored[b.0].entry.timestamp().cmp(&scored[a.0].entry.timestamp()))
            .then_with(|| scored[a.0].entry.id().cmp(scored[b.0].entry.id()))
    });
    ranked.into_iter().take(k).map(|(i, _)| i).collect()
}

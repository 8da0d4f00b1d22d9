//! Rule-based query complexity estimation.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::error::SimpleMemResult;
use crate::text::{content_terms, extract_entities};
use crate::traits::ComplexityEstimator;

static AGGREGATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(all|every|each|how many|how often|list|summari[sz]e|compare|history|always|usually)\b")
        .unwrap()
});

static TEMPORAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(when|before|after|since|until|during|first|last|latest|earliest|\d{4})\b")
        .unwrap()
});

static CONJUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\band\b|\bor\b|\bthen\b|;|\?.+\?)").unwrap());

/// Scores a query from surface features: named entities, content length,
/// aggregation words, temporal reasoning and multiple clauses.
#[derive(Debug, Clone, Default)]
pub struct HeuristicComplexity;

impl HeuristicComplexity {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous scoring, in `[0, 1]`.
    pub fn score(&self, query: &str) -> f32 {
        let entities = extract_entities(query, &HashSet::new()).len() as f32;
        let terms = content_terms(query).len() as f32;

        let mut score = 0.15 * entities + 0.05 * (terms - 3.0).max(0.0);
        if AGGREGATION.is_match(query) {
            score += 0.3;
        }
        if TEMPORAL.is_match(query) {
            score += 0.15;
        }
        if CONJUNCTION.is_match(query) {
            score += 0.2;
        }
        score.clamp(0.0, 1.0)
    }
}

#[async_trait]
impl ComplexityEstimator for HeuristicComplexity {
    async fn estimate(&self, query: &str) -> SimpleMemResult<f32> {
        Ok(self.score(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_query_is_low() {
        let c = HeuristicComplexity::new();
        assert!(c.score("coffee?") < 0.2);
    }

    #[test]
    fn test_aggregate_multi_entity_query_is_higher() {
        let c = HeuristicComplexity::new();
        let simple = c.score("What does Alice drink?");
        let complex = c.score("List every time Alice met Bob and Carol before the trip to Paris");
        assert!(complex > simple);
        assert!(complex <= 1.0);
    }
}

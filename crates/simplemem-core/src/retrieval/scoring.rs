//! Query terms and the hybrid score.

use std::collections::BTreeSet;

use crate::text::content_terms;

/// Distinct content terms of a query, sorted.
pub fn query_terms(query: &str) -> Vec<String> {
    content_terms(query)
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Weights of the hybrid score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    pub semantic: f32,
    pub lexical: f32,
    pub constraint_bonus: f32,
}

impl HybridWeights {
    /// `semantic * cos + lexical * bm25 + bonus * soft_match`.
    pub fn combine(&self, cos: f32, bm25: f32, soft_match: bool) -> f32 {
        let bonus = if soft_match { self.constraint_bonus } else { 0.0 };
        self.semantic * cos + self.lexical * bm25 + bonus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms_are_distinct() {
        assert_eq!(
            query_terms("What did Alice plan with Bob and Alice?"),
            vec!["alice", "bob", "plan"]
        );
    }

    #[test]
    fn test_hybrid_combination() {
        let weights = HybridWeights {
            semantic: 0.6,
            lexical: 0.3,
            constraint_bonus: 0.1,
        };
        assert!((weights.combine(1.0, 1.0, true) - 1.0).abs() < 1e-6);
        assert!((weights.combine(0.5, 0.5, false) - 0.45).abs() < 1e-6);
        // Dissimilar entries fall below unrelated ones.
        assert!(weights.combine(-0.5, 0.0, false) < weights.combine(0.0, 0.0, false));
        assert!((weights.combine(-0.5, 0.5, false) + 0.15).abs() < 1e-6);
    }
}

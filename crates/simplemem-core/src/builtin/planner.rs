//! Query decomposition.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SimpleMemResult;
use crate::text::content_terms;
use crate::traits::QueryPlanner;

static QUESTION_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?;]+").unwrap());

static CLAUSE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i),?\s+\b(?:and|but|or|as well as|and also)\b\s+").unwrap());

/// Splits multi-question and conjunctive queries into sub-queries.
///
/// The full query always comes first. A fragment only becomes a sub-query
/// when it carries at least `min_terms` content terms, so "Alice and Bob"
/// stays whole.
#[derive(Debug, Clone)]
pub struct ConjunctionPlanner {
    min_terms: usize,
}

impl Default for ConjunctionPlanner {
    fn default() -> Self {
        Self { min_terms: 2 }
    }
}

impl ConjunctionPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_terms(mut self, min_terms: usize) -> Self {
        self.min_terms = min_terms;
        self
    }

    /// Synchronous planning.
    pub fn split(&self, query: &str) -> Vec<String> {
        let query = query.trim();
        let mut plan = vec![query.to_string()];

        let fragments: Vec<&str> = QUESTION_BREAK
            .split(query)
            .flat_map(|q| CLAUSE_BREAK.split(q))
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        if fragments.len() < 2 {
            return plan;
        }
        if fragments
            .iter()
            .any(|f| content_terms(f).len() < self.min_terms)
        {
            return plan;
        }
        plan.extend(fragments.into_iter().map(str::to_string));
        plan
    }
}

#[async_trait]
impl QueryPlanner for ConjunctionPlanner {
    async fn plan(&self, query: &str) -> SimpleMemResult<Vec<String>> {
        Ok(self.split(query))
    }
}

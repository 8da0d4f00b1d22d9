//! Per-query constraints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SimpleMemError, SimpleMemResult};
use crate::retrieval::CandidateMode;
use crate::types::{EntryRef, Filter};

/// Constraints on a single query.
///
/// Hard constraints (time range, `hard`) exclude candidates. Soft
/// constraints only add the constraint bonus to candidates that satisfy
/// all of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConstraints {
    /// Inclusive lower bound on entry time.
    pub after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on entry time.
    pub before: Option<DateTime<Utc>>,
    /// Metadata every candidate must match.
    pub hard: Option<Filter>,
    /// Metadata that earns the constraint bonus.
    pub soft: Vec<Filter>,
    /// Overrides the configured token budget.
    pub token_budget: Option<usize>,
    /// Include every atom, archived ones too.
    pub drill_down: bool,
    /// Restrict candidates to this molecule's source atoms.
    pub molecule_id: Option<String>,
    /// Overrides the configured candidate mode.
    pub mode: Option<CandidateMode>,
}

impl QueryConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn after(mut self, t: DateTime<Utc>) -> Self {
        self.after = Some(t);
        self
    }

    pub fn before(mut self, t: DateTime<Utc>) -> Self {
        self.before = Some(t);
        self
    }

    pub fn hard(mut self, filter: Filter) -> Self {
        self.hard = Some(match self.hard.take() {
            Some(existing) => Filter::and(vec![existing, filter]),
            None => filter,
        });
        self
    }

    pub fn soft(mut self, filter: Filter) -> Self {
        self.soft.push(filter);
        self
    }

    pub fn token_budget(mut self, budget: usize) -> Self {
        self.token_budget = Some(budget);
        self
    }

    pub fn drill_down(mut self) -> Self {
        self.drill_down = true;
        self
    }

    pub fn molecule(mut self, id: impl Into<String>) -> Self {
        self.molecule_id = Some(id.into());
        self
    }

    pub fn mode(mut self, mode: CandidateMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Reject constraints that no entry could satisfy.
    pub fn validate(&self) -> SimpleMemResult<()> {
        if let (Some(after), Some(before)) = (self.after, self.before) {
            if after > before {
                return Err(SimpleMemError::invalid_constraint(
                    format!("Inverted time range: {} is after {}", after, before),
                    "Swap the after and before bounds",
                ));
            }
        }
        if let Some(hard) = &self.hard {
            hard.validate()?;
        }
        for soft in &self.soft {
            soft.validate()?;
        }
        if self.token_budget == Some(0) {
            return Err(SimpleMemError::invalid_constraint(
                "Token budget must be greater than 0",
                "Omit the budget to use the configured default",
            ));
        }
        Ok(())
    }

    /// Whether an entry passes the hard constraints. A molecule passes the
    /// time range when its span overlaps it.
    pub fn admits(&self, entry: EntryRef<'_>) -> bool {
        let (start, end) = entry.time_span();
        if self.after.is_some_and(|after| end < after) {
            return false;
        }
        if self.before.is_some_and(|before| start > before) {
            return false;
        }
        self.hard
            .as_ref()
            .map_or(true, |f| f.matches(entry.metadata()))
    }

    /// Whether an entry satisfies every soft constraint (false when none is given).
    pub fn soft_match(&self, entry: EntryRef<'_>) -> bool {
        !self.soft.is_empty() && self.soft.iter().all(|f| f.matches(entry.metadata()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::index::testing::{sample_atom, sample_molecule};
    use chrono::TimeZone;

    #[test]
    fn test_inverted_time_range() {
        let t = Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap();
        let err = QueryConstraints::new()
            .after(t)
            .before(t - chrono::Duration::days(1))
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValInvalidConstraint);
    }

    #[test]
    fn test_contradictory_hard_filters() {
        let constraints = QueryConstraints::new()
            .hard(Filter::eq("speaker", "Alice"))
            .hard(Filter::eq("speaker", "Bob"));
        assert!(constraints.validate().is_err());

        // Entities are lists, so both can hold.
        let constraints = QueryConstraints::new()
            .hard(Filter::eq("entities", "Alice"))
            .hard(Filter::eq("entities", "Bob"));
        assert!(constraints.validate().is_ok());
    }

    #[test]
    fn test_admits_and_soft_match() {
        let atom = sample_atom("a", 5);
        let constraints = QueryConstraints::new()
            .after(atom.timestamp)
            .hard(Filter::eq("speaker", "Alice"));
        assert!(constraints.admits(EntryRef::Atom(&atom)));
        assert!(!constraints.soft_match(EntryRef::Atom(&atom)));

        let constraints = constraints.soft(Filter::eq("entities", "Alice"));
        assert!(constraints.soft_match(EntryRef::Atom(&atom)));

        let late = QueryConstraints::new().after(atom.timestamp + chrono::Duration::seconds(1));
        assert!(!late.admits(EntryRef::Atom(&atom)));

        let molecule = sample_molecule("m", &["a"], 0);
        assert!(!QueryConstraints::new()
            .hard(Filter::eq("speaker", "Alice"))
            .admits(EntryRef::Molecule(&molecule)));
    }
}

//! Metadata filters for the symbolic layer.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{SimpleMemError, SimpleMemResult};
use crate::types::Metadata;

/// Filter operator for metadata queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to. Against an array value, matches when the array contains it.
    Eq(serde_json::Value),
    /// Not equal to.
    Ne(serde_json::Value),
    /// Greater than.
    Gt(serde_json::Value),
    /// Greater than or equal to.
    Gte(serde_json::Value),
    /// Less than.
    Lt(serde_json::Value),
    /// Less than or equal to.
    Lte(serde_json::Value),
    /// In list.
    In(Vec<serde_json::Value>),
    /// Not in list.
    Nin(Vec<serde_json::Value>),
    /// Contains substring.
    Contains(String),
    /// Contains substring (case-insensitive).
    Icontains(String),
    /// Inclusive range.
    Between {
        min: serde_json::Value,
        max: serde_json::Value,
    },
    /// Key present.
    Exists,
    /// Key absent.
    NotExists,
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Metadata key to filter on.
    pub field: String,
    /// Operator to apply.
    pub operator: FilterOperator,
}

impl FilterCondition {
    pub fn new(field: impl Into<String>, operator: FilterOperator) -> Self {
        Self {
            field: field.into(),
            operator,
        }
    }

    /// Evaluate against one metadata map.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let value = metadata.get(&self.field);
        match (&self.operator, value) {
            (FilterOperator::Exists, v) => v.is_some_and(|v| !v.is_null()),
            (FilterOperator::NotExists, v) => v.map_or(true, |v| v.is_null()),
            (_, None) => false,
            (FilterOperator::Eq(expected), Some(v)) => value_matches(v, expected),
            (FilterOperator::Ne(expected), Some(v)) => !value_matches(v, expected),
            (FilterOperator::Gt(bound), Some(v)) => {
                compare_any(v, bound, |o| o == Ordering::Greater)
            }
            (FilterOperator::Gte(bound), Some(v)) => {
                compare_any(v, bound, |o| o != Ordering::Less)
            }
            (FilterOperator::Lt(bound), Some(v)) => compare_any(v, bound, |o| o == Ordering::Less),
            (FilterOperator::Lte(bound), Some(v)) => {
                compare_any(v, bound, |o| o != Ordering::Greater)
            }
            (FilterOperator::In(options), Some(v)) => options.iter().any(|o| value_matches(v, o)),
            (FilterOperator::Nin(options), Some(v)) => !options.iter().any(|o| value_matches(v, o)),
            (FilterOperator::Contains(needle), Some(v)) => {
                string_values(v).iter().any(|s| s.contains(needle.as_str()))
            }
            (FilterOperator::Icontains(needle), Some(v)) => {
                let needle = needle.to_lowercase();
                string_values(v)
                    .iter()
                    .any(|s| s.to_lowercase().contains(&needle))
            }
            (FilterOperator::Between { min, max }, Some(v)) => {
                compare_any(v, min, |o| o != Ordering::Less)
                    && compare_any(v, max, |o| o != Ordering::Greater)
            }
        }
    }
}

/// Composite filter with AND/OR/NOT logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Single condition.
    Condition(FilterCondition),
    /// AND of multiple filters.
    And(Vec<Filter>),
    /// OR of multiple filters.
    Or(Vec<Filter>),
    /// NOT of a filter.
    Not(Box<Filter>),
}

impl Filter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Eq(value.into())))
    }

    /// Create an inequality filter.
    pub fn ne(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Ne(value.into())))
    }

    /// Create a greater than or equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Gte(value.into())))
    }

    /// Create a less than or equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Lte(value.into())))
    }

    /// Create an in-list filter.
    pub fn in_list(field: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::In(values)))
    }

    /// Create a case-insensitive contains filter.
    pub fn icontains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Condition(FilterCondition::new(
            field,
            FilterOperator::Icontains(value.into()),
        ))
    }

    /// Create an exists filter.
    pub fn exists(field: impl Into<String>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Exists))
    }

    /// Create an inclusive range filter.
    pub fn between(
        field: impl Into<String>,
        min: impl Into<serde_json::Value>,
        max: impl Into<serde_json::Value>,
    ) -> Self {
        Filter::Condition(FilterCondition::new(
            field,
            FilterOperator::Between {
                min: min.into(),
                max: max.into(),
            },
        ))
    }

    /// Create an AND filter.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Create an OR filter.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Create a NOT filter.
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Evaluate against one metadata map.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Filter::Condition(c) => c.matches(metadata),
            Filter::And(filters) => filters.iter().all(|f| f.matches(metadata)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(metadata)),
            Filter::Not(inner) => !inner.matches(metadata),
        }
    }

    /// Reject filters that can never match: an inverted `between`, or two
    /// conjunctive equality conditions on one scalar field with different values.
    pub fn validate(&self) -> SimpleMemResult<()> {
        self.validate_ranges()?;
        let mut equalities: HashMap<&str, &serde_json::Value> = HashMap::new();
        self.collect_conjunctive_eq(&mut equalities)
    }

    fn validate_ranges(&self) -> SimpleMemResult<()> {
        match self {
            Filter::Condition(FilterCondition {
                field,
                operator: FilterOperator::Between { min, max },
            }) => {
                if compare_values(min, max) == Some(Ordering::Greater) {
                    return Err(SimpleMemError::invalid_constraint(
                        format!("Inverted range on '{}': {} > {}", field, min, max),
                        "Swap the bounds of the between filter",
                    ));
                }
                Ok(())
            }
            Filter::Condition(_) => Ok(()),
            Filter::And(filters) | Filter::Or(filters) => {
                filters.iter().try_for_each(Filter::validate_ranges)
            }
            Filter::Not(inner) => inner.validate_ranges(),
        }
    }

    fn collect_conjunctive_eq<'a>(
        &'a self,
        seen: &mut HashMap<&'a str, &'a serde_json::Value>,
    ) -> SimpleMemResult<()> {
        match self {
            Filter::Condition(FilterCondition {
                field,
                operator: FilterOperator::Eq(value),
            }) => {
                if let Some(previous) = seen.insert(field.as_str(), value) {
                    // Array-valued keys (entities) can hold both values at once.
                    let scalar = !previous.is_array() && !value.is_array();
                    if scalar && previous != value && field_is_scalar(field) {
                        return Err(SimpleMemError::invalid_constraint(
                            format!(
                                "Contradictory equality filters on '{}': {} and {}",
                                field, previous, value
                            ),
                            "Use an in-list filter to match either value",
                        ));
                    }
                }
                Ok(())
            }
            Filter::Condition(_) => Ok(()),
            Filter::And(filters) => filters
                .iter()
                .try_for_each(|f| f.collect_conjunctive_eq(seen)),
            // Disjunctions and negations do not constrain every match.
            Filter::Or(_) | Filter::Not(_) => Ok(()),
        }
    }
}

/// Keys known to hold lists; equality on them means membership.
fn field_is_scalar(field: &str) -> bool {
    !matches!(
        field,
        crate::types::META_ENTITIES | crate::types::META_SPEAKERS
    )
}

/// Convert a simple key-value map to a conjunction of equality filters.
pub fn from_simple_filters(filters: &HashMap<String, serde_json::Value>) -> Option<Filter> {
    let mut keys: Vec<&String> = filters.keys().collect();
    keys.sort();
    let mut conditions: Vec<Filter> = keys
        .into_iter()
        .map(|k| Filter::eq(k.clone(), filters[k].clone()))
        .collect();

    match conditions.len() {
        0 => None,
        1 => conditions.pop(),
        _ => Some(Filter::And(conditions)),
    }
}

fn value_matches(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    match actual {
        serde_json::Value::Array(items) => items.iter().any(|item| scalar_eq(item, expected)),
        _ => scalar_eq(actual, expected),
    }
}

fn scalar_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_any(
    actual: &serde_json::Value,
    bound: &serde_json::Value,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    match actual {
        serde_json::Value::Array(items) => items
            .iter()
            .any(|item| compare_values(item, bound).is_some_and(&accept)),
        _ => compare_values(actual, bound).is_some_and(accept),
    }
}

/// Numbers compare numerically, strings lexicographically (which orders
/// ISO dates correctly); mixed types are incomparable.
fn compare_values(a: &serde_json::Value, b: &serde_json::Value) -> Option<Ordering> {
    match (a, b) {
        (serde_json::Value::Number(x), serde_json::Value::Number(y)) => {
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (serde_json::Value::String(x), serde_json::Value::String(y)) => Some(x.cmp(y)),
        (serde_json::Value::Bool(x), serde_json::Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn string_values(value: &serde_json::Value) -> Vec<&str> {
    match value {
        serde_json::Value::String(s) => vec![s.as_str()],
        serde_json::Value::Array(items) => items.iter().filter_map(|v| v.as_str()).collect(),
        _ => Vec::new(),
    }
}

//! Text analysis: tokenization, entity extraction and temporal anchoring.

pub mod entities;
pub mod temporal;
pub mod tokenizer;

pub use entities::extract_entities;
pub use temporal::{
    contains_relative_expression, extract_timestamp, resolve_temporal, Granularity,
    TemporalResolution, TimeAnchor,
};
pub use tokenizer::{content_terms, is_stopword, lexical_signature, tokenize};

//! Error types for simplemem operations.
//!
//! This module provides an error hierarchy with structured error codes and
//! suggestions for resolution. Several variants describe per-item failures
//! (an unresolvable claim, a discarded atom, a skipped cluster) that the
//! pipelines log and step over rather than propagate.

use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for simplemem operations.
pub type SimpleMemResult<T> = Result<T, SimpleMemError>;

/// Main error type for all simplemem operations.
#[derive(Error, Debug)]
pub enum SimpleMemError {
    /// Input validation failed (malformed constraints, bad configuration values).
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        details: HashMap<String, String>,
        suggestion: Option<String>,
    },

    /// Entry not found.
    #[error("Entry not found: {message}")]
    NotFound {
        message: String,
        code: ErrorCode,
        entry_id: Option<String>,
    },

    /// A claim referenced a pronoun or time anaphor with no known antecedent.
    #[error("Resolution error: {message}")]
    Resolution {
        message: String,
        code: ErrorCode,
        /// The unresolved reference.
        reference: String,
    },

    /// An index write was rejected because one of the three layers was missing or invalid.
    #[error("Index write failure: {message}")]
    IndexWrite {
        message: String,
        code: ErrorCode,
        entry_id: Option<String>,
    },

    /// A consolidation cluster could not be synthesized or committed.
    #[error("Consolidation skipped: {message}")]
    ConsolidationSkipped {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A compare-and-swap write lost against a concurrent writer.
    #[error("Write conflict: {message}")]
    Conflict {
        message: String,
        code: ErrorCode,
    },

    /// LLM operation failed.
    #[error("LLM error: {message}")]
    Llm {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Embedding generation failed.
    #[error("Embedding error: {message}")]
    Embedding {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Parse error.
    #[error("Parse error: {message}")]
    Parse { message: String, code: ErrorCode },

    /// Scheduler error.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (VAL_xxx)
    ValInvalidInput,
    ValInvalidConstraint,
    ValInvalidConfig,

    // Memory (MEM_xxx)
    MemNotFound,
    MemCorrupted,

    // Resolution (RES_xxx)
    ResUnresolvedPronoun,
    ResUnresolvedTime,

    // Index (IDX_xxx)
    IdxDimensionMismatch,
    IdxMissingLayer,
    IdxWriteFailed,

    // Consolidation (CON_xxx)
    ConSynthesisFailed,
    ConCasConflict,

    // LLM (LLM_xxx)
    LlmGenerationFailed,
    LlmInvalidResponse,

    // Embedding (EMB_xxx)
    EmbGenerationFailed,

    // Database (DB_xxx)
    DbConnectionFailed,
    DbOperationFailed,
    DbSearchFailed,

    // Parse (PARSE_xxx)
    ParseInvalidJson,
    ParseInvalidTranscript,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValInvalidConstraint => "VAL_002",
            ErrorCode::ValInvalidConfig => "VAL_003",
            ErrorCode::MemNotFound => "MEM_001",
            ErrorCode::MemCorrupted => "MEM_002",
            ErrorCode::ResUnresolvedPronoun => "RES_001",
            ErrorCode::ResUnresolvedTime => "RES_002",
            ErrorCode::IdxDimensionMismatch => "IDX_001",
            ErrorCode::IdxMissingLayer => "IDX_002",
            ErrorCode::IdxWriteFailed => "IDX_003",
            ErrorCode::ConSynthesisFailed => "CON_001",
            ErrorCode::ConCasConflict => "CON_002",
            ErrorCode::LlmGenerationFailed => "LLM_001",
            ErrorCode::LlmInvalidResponse => "LLM_002",
            ErrorCode::EmbGenerationFailed => "EMB_001",
            ErrorCode::DbConnectionFailed => "DB_001",
            ErrorCode::DbOperationFailed => "DB_002",
            ErrorCode::DbSearchFailed => "DB_003",
            ErrorCode::ParseInvalidJson => "PARSE_001",
            ErrorCode::ParseInvalidTranscript => "PARSE_002",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl SimpleMemError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            details: HashMap::new(),
            suggestion: None,
        }
    }

    /// Create a validation error for malformed query constraints.
    pub fn invalid_constraint(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidConstraint,
            details: HashMap::new(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Create a validation error for an out-of-range configuration value.
    pub fn invalid_config(field: &str, message: impl Into<String>) -> Self {
        let mut details = HashMap::new();
        details.insert("field".to_string(), field.to_string());
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidConfig,
            details,
            suggestion: None,
        }
    }

    /// Create a not found error.
    pub fn not_found(entry_id: impl Into<String>) -> Self {
        let id = entry_id.into();
        Self::NotFound {
            message: format!("Entry with id '{}' not found", id),
            code: ErrorCode::MemNotFound,
            entry_id: Some(id),
        }
    }

    /// Create a resolution error for an unresolvable pronoun.
    pub fn unresolved_pronoun(pronoun: impl Into<String>) -> Self {
        let reference = pronoun.into();
        Self::Resolution {
            message: format!("no antecedent for '{}'", reference),
            code: ErrorCode::ResUnresolvedPronoun,
            reference,
        }
    }

    /// Create a resolution error for an unresolvable time anaphor.
    pub fn unresolved_time(expression: impl Into<String>) -> Self {
        let reference = expression.into();
        Self::Resolution {
            message: format!("no time anchor for '{}'", reference),
            code: ErrorCode::ResUnresolvedTime,
            reference,
        }
    }

    /// Create an index write failure.
    pub fn index_write(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::IndexWrite {
            message: message.into(),
            code,
            entry_id: None,
        }
    }

    /// Create a consolidation-skipped error.
    pub fn consolidation_skipped(message: impl Into<String>) -> Self {
        Self::ConsolidationSkipped {
            message: message.into(),
            code: ErrorCode::ConSynthesisFailed,
            source: None,
        }
    }

    /// Create a compare-and-swap conflict.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            code: ErrorCode::ConCasConflict,
        }
    }

    /// Create an LLM error.
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
            code: ErrorCode::LlmGenerationFailed,
            source: None,
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            code: ErrorCode::EmbGenerationFailed,
            source: None,
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            code: ErrorCode::ParseInvalidJson,
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } => *code,
            Self::NotFound { code, .. } => *code,
            Self::Resolution { code, .. } => *code,
            Self::IndexWrite { code, .. } => *code,
            Self::ConsolidationSkipped { code, .. } => *code,
            Self::Conflict { code, .. } => *code,
            Self::Llm { code, .. } => *code,
            Self::Embedding { code, .. } => *code,
            Self::Database { code, .. } => *code,
            Self::Parse { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether this error only affects a single claim, atom or cluster.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Resolution { .. }
                | Self::IndexWrite { .. }
                | Self::ConsolidationSkipped { .. }
                | Self::Conflict { .. }
        )
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::NotFound { .. } => Some("Please check the entry ID and ensure it exists"),
            Self::Validation { suggestion, .. } => suggestion.as_deref(),
            Self::Embedding { .. } => Some("Please check your embedding capability configuration"),
            Self::Llm { .. } => Some("Please check your LLM capability configuration"),
            Self::IndexWrite { .. } => {
                Some("Check that embedding_dims matches the injected embedder")
            }
            Self::Conflict { .. } => Some("The cluster will be retried on the next pass"),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SimpleMemError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}

impl From<tantivy::TantivyError> for SimpleMemError {
    fn from(err: tantivy::TantivyError) -> Self {
        Self::Database {
            message: format!("lexical index: {}", err),
            code: ErrorCode::DbSearchFailed,
            source: None,
        }
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for SimpleMemError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::Scheduler(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = SimpleMemError::validation("Invalid input");
        assert_eq!(err.code(), ErrorCode::ValInvalidInput);
        assert!(err.to_string().contains("Invalid input"));
    }

    #[test]
    fn test_not_found_error() {
        let err = SimpleMemError::not_found("test-id");
        assert_eq!(err.code(), ErrorCode::MemNotFound);
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_resolution_error_is_local() {
        let err = SimpleMemError::unresolved_pronoun("she");
        assert_eq!(err.code(), ErrorCode::ResUnresolvedPronoun);
        assert!(err.is_local());
        assert!(err.to_string().contains("she"));
    }

    #[test]
    fn test_invalid_constraint_carries_suggestion() {
        let err = SimpleMemError::invalid_constraint("after > before", "swap the bounds");
        assert_eq!(err.code(), ErrorCode::ValInvalidConstraint);
        assert_eq!(err.suggestion(), Some("swap the bounds"));
        assert!(!err.is_local());
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::MemNotFound.as_str(), "MEM_001");
        assert_eq!(ErrorCode::ConCasConflict.as_str(), "CON_002");
    }
}

use std::fmt;

use thiserror::Error;

/// Coarse classification of engine errors.
///
/// Callers that only care about "what went wrong" match on the kind rather
/// than on the structured payload of [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// One or more symptom ids do not exist in the knowledge base.
    InvalidSymptom,
    /// Inference ran but no rule fired (or the goal has no rules).
    NoMatchingRule,
    /// A case or trace lookup failed.
    NotFound,
    /// Caller input was rejected before reaching the knowledge base.
    InvalidInput,
    /// Storage failure or any other unexpected internal error.
    EngineFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::InvalidSymptom => "invalid_symptom",
            ErrorKind::NoMatchingRule => "no_matching_rule",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::EngineFailure => "engine_failure",
        };
        f.write_str(label)
    }
}

/// Entity that a [`EngineError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingEntity {
    /// A persisted patient case.
    Case,
    /// The inference trace belonging to a case.
    Trace,
}

impl fmt::Display for MissingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingEntity::Case => f.write_str("Patient case"),
            MissingEntity::Trace => f.write_str("Inference trace for case"),
        }
    }
}

/// Inference engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("The following symptom IDs do not exist: {missing_ids:?}")]
    InvalidSymptom { missing_ids: Vec<i64> },

    #[error("No diagnostic rules matched the provided symptoms. Symptom IDs: {symptom_ids:?}")]
    NoMatchingRule {
        symptom_ids: Vec<i64>,
        target_disease_id: Option<i64>,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: MissingEntity, id: i64 },

    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("{message}: {context}")]
    Failure { message: String, context: String },
}

impl EngineError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidSymptom { .. } => ErrorKind::InvalidSymptom,
            EngineError::NoMatchingRule { .. } => ErrorKind::NoMatchingRule,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidInput { .. } => ErrorKind::InvalidInput,
            EngineError::Failure { .. } => ErrorKind::EngineFailure,
        }
    }

    /// Wrap an unexpected failure, keeping the original error text as context.
    pub fn failure(message: impl Into<String>, source: impl fmt::Display) -> Self {
        EngineError::Failure {
            message: message.into(),
            context: source.to_string(),
        }
    }

    pub(crate) fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        EngineError::failure("Storage error during inference", err)
    }
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Invalid knowledge base entry: {message}")]
    InvalidEntry { message: String },

    #[error("Case not found: {case_id}")]
    CaseNotFound { case_id: i64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {message}")]
    Invalid { message: String },
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

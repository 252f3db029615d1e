//! # Error Types
//!
//! The unified error taxonomy returned at the repository boundary.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  repokit-core errors (this file)                                       │
//! │  ├── RepoError        - What every adapter returns                     │
//! │  └── ValidationError  - Bad identifiers, keys, options                 │
//! │                                                                         │
//! │  repokit-db errors (separate crate)                                    │
//! │  └── DbError          - sqlx failures, categorized                     │
//! │                                                                         │
//! │  Flow: sqlx::Error → DbError → RepoError → caller                      │
//! │        ValidationError → RepoError::Configuration                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (key, collection, path)
//! 3. Errors are enum variants, never String
//! 4. Adapters never retry; the caller decides what to do with each kind

use thiserror::Error;

use crate::key::Key;

// =============================================================================
// Repository Error
// =============================================================================

/// Errors returned by every [`Repository`](crate::Repository) adapter.
#[derive(Debug, Error)]
pub enum RepoError {
    /// No entity is stored under the key.
    ///
    /// ## When This Occurs
    /// - `remove` on a missing key
    /// - `update*` on a missing key
    /// - Patching an object context whose entity is absent
    #[error("{collection} entity not found: {key}")]
    NotFound { collection: String, key: Key },

    /// The backend rejected the write (unique key, foreign key, NOT NULL).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The backend could not be reached or the session could not be opened.
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// The adapter does not support the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The key tuple does not match the collection's key shape.
    #[error("Invalid key {key}: expected {expected} component(s), got {actual}")]
    InvalidKey {
        key: Key,
        expected: usize,
        actual: usize,
    },

    /// An update changed the fields the entity's key is read from.
    ///
    /// ## When This Occurs
    /// - A patch or path update rewrites a key field
    /// - A context is committed after its entity's key was edited
    #[error("Update would move entity from key {key} to {new_key}")]
    KeyChanged { key: Key, new_key: Key },

    /// A property path could not be parsed or navigated.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// An entity could not be converted to or from its serialized form.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The repository was constructed with an unusable configuration.
    ///
    /// Raised at construction time, never deferred to first use.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// One or more chunks of a batched store failed.
    ///
    /// Chunks are committed independently: `committed` entities are durable,
    /// the keys listed in `failures` were not stored.
    #[error("Batch store failed: {} chunk(s) failed, {committed} entities committed", failures.len())]
    BatchFailed {
        committed: usize,
        failures: Vec<ChunkFailure>,
    },

    /// Any other backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl RepoError {
    /// Creates a NotFound error for a collection and key.
    pub fn not_found(collection: impl Into<String>, key: &Key) -> Self {
        RepoError::NotFound {
            collection: collection.into(),
            key: key.clone(),
        }
    }

    /// Creates an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RepoError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is a NotFound error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        RepoError::Serialization(err.to_string())
    }
}

impl From<ValidationError> for RepoError {
    fn from(err: ValidationError) -> Self {
        RepoError::Configuration(err.to_string())
    }
}

/// A chunk of a batched store that failed to commit.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    /// Position of the chunk in the partitioned input.
    pub index: usize,
    /// Keys of every entity in the chunk (none of them were stored).
    pub keys: Vec<Key>,
    /// Rendered backend error.
    pub reason: String,
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Used for early validation of identifiers and options before any
/// backend call is made.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., identifier with spaces).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., a column listed twice).
    #[error("{field} '{value}' is listed more than once")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with RepoError.
pub type RepoResult<T> = Result<T, RepoError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RepoError::not_found("objects", &Key::from(7));
        assert_eq!(err.to_string(), "objects entity not found: (7)");
        assert!(err.is_not_found());

        let err = RepoError::InvalidKey {
            key: Key::from((1, "a")),
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "Invalid key (1, \"a\"): expected 1 component(s), got 2"
        );
    }

    #[test]
    fn test_key_changed_message() {
        let err = RepoError::KeyChanged {
            key: Key::from(1),
            new_key: Key::from(5),
        };
        assert_eq!(err.to_string(), "Update would move entity from key (1) to (5)");
    }

    #[test]
    fn test_batch_failed_message() {
        let err = RepoError::BatchFailed {
            committed: 90,
            failures: vec![ChunkFailure {
                index: 3,
                keys: vec![Key::from(30)],
                reason: "boom".to_string(),
            }],
        };
        assert_eq!(
            err.to_string(),
            "Batch store failed: 1 chunk(s) failed, 90 entities committed"
        );
    }

    #[test]
    fn test_validation_converts_to_configuration_error() {
        let validation_err = ValidationError::Required {
            field: "table".to_string(),
        };
        let err: RepoError = validation_err.into();
        assert!(matches!(err, RepoError::Configuration(_)));
        assert_eq!(err.to_string(), "Configuration error: table is required");
    }
}

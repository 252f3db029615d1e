//! # Database Error Types
//!
//! Error types for SQLite operations, and their mapping onto the shared
//! repository taxonomy.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  RepoError (repokit-core) ← What Repository callers see                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use repokit_core::RepoError;
use thiserror::Error;

/// Database operation errors.
///
/// These errors wrap sqlx errors and provide additional context
/// for debugging.
#[derive(Debug, Error)]
pub enum DbError {
    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting a row whose primary key already exists
    /// - Any UNIQUE index violation
    #[error("Duplicate value for {field}")]
    UniqueViolation { field: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// NOT NULL constraint violation.
    ///
    /// ## When This Occurs
    /// - An entity field serialized as `null` maps to a NOT NULL column
    #[error("Missing value for {column}")]
    NotNullViolation { column: String },

    /// Another connection holds the lock this statement needs.
    ///
    /// ## When This Occurs
    /// - `SQLITE_BUSY` after the busy timeout ran out
    /// - `SQLITE_LOCKED` and the extended codes of both
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file doesn't exist and can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    ///
    /// ## When This Occurs
    /// - Runtime SQL error (missing table, column type mismatch)
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A row or document body could not be converted to the entity type.
    #[error("Row conversion failed: {0}")]
    Serialization(String),

    /// Configuration could not be read or is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

/// SQLite primary result codes for lock contention.
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

/// True when an SQLite result code (primary or extended) is BUSY or LOCKED.
///
/// Extended codes carry the primary code in their low byte, so
/// `SQLITE_BUSY_SNAPSHOT` (517) counts as busy.
fn is_lock_contention(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i64>().ok())
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::Database       → Busy for lock codes, else analyze message
/// sqlx::Error::ColumnDecode   → DbError::Serialization
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                if is_lock_contention(db_err.code().as_deref()) {
                    return DbError::Busy(msg.to_string());
                }

                // SQLite constraint messages:
                // "UNIQUE constraint failed: <table>.<column>"
                // "NOT NULL constraint failed: <table>.<column>"
                // "FOREIGN KEY constraint failed"
                if let Some(field) = msg.split("UNIQUE constraint failed: ").nth(1) {
                    DbError::UniqueViolation {
                        field: field.to_string(),
                    }
                } else if let Some(column) = msg.split("NOT NULL constraint failed: ").nth(1) {
                    DbError::NotNullViolation {
                        column: column.to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
                DbError::Serialization(err.to_string())
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::InvalidConfig(err.to_string())
    }
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        DbError::InvalidConfig(err.to_string())
    }
}

/// Maps database failures onto the repository taxonomy.
///
/// ```text
/// UniqueViolation / ForeignKeyViolation / NotNullViolation → ConstraintViolation
/// Busy / ConnectionFailed / PoolExhausted                  → ConnectionFailure
/// Serialization                                            → Serialization
/// InvalidConfig                                            → Configuration
/// Everything else                                          → Backend
/// ```
impl From<DbError> for RepoError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UniqueViolation { .. }
            | DbError::ForeignKeyViolation { .. }
            | DbError::NotNullViolation { .. } => RepoError::ConstraintViolation(err.to_string()),
            DbError::Busy(_) | DbError::ConnectionFailed(_) | DbError::PoolExhausted => {
                RepoError::ConnectionFailure(err.to_string())
            }
            DbError::Serialization(msg) => RepoError::Serialization(msg),
            DbError::InvalidConfig(msg) => RepoError::Configuration(msg),
            DbError::MigrationFailed(_) | DbError::QueryFailed(_) | DbError::Internal(_) => {
                RepoError::Backend(err.to_string())
            }
        }
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================

//! # Repository Module
//!
//! SQLite implementations of the repokit repository contract.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    SQL Repository Layers                                │
//! │                                                                         │
//! │  Caller                                                                │
//! │       │  repo.update(patch, &key)                                      │
//! │       ▼                                                                 │
//! │  SqlRepository<T, C>   (sql.rs)                                        │
//! │  ├── opens one write transaction per call / commit                     │
//! │  ├── validates key arity                                               │
//! │  └── batches store_all                                                 │
//! │       │  Collection<T> calls on &mut SqliteConnection                  │
//! │       ▼                                                                 │
//! │  ┌──────────────────────────┐    ┌──────────────────────────┐          │
//! │  │ Table (table.rs)         │    │ DocumentCollection       │          │
//! │  │ one row per entity,      │    │ (document.rs)            │          │
//! │  │ one column per field     │    │ one JSON body per key    │          │
//! │  └──────────────────────────┘    └──────────────────────────┘          │
//! │       │                                │                                │
//! │       ▼                                ▼                                │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`TableRepository`] - Entities mapped onto a caller-owned table
//! - [`DocumentRepository`] - Entities stored as JSON documents

use async_trait::async_trait;
use sqlx::SqliteConnection;

use repokit_core::{Entity, Key};

use crate::error::DbResult;

pub mod document;
pub mod sql;
pub mod table;

pub use document::{DocumentCollection, DocumentRepository};
pub use sql::{SqlItems, SqlObjectContext, SqlRepository};
pub use table::{Table, TableRepository};

/// Storage layout of one collection: the SQL a repository runs inside its
/// transactions.
///
/// Every method runs on a connection owned by the caller (usually an open
/// transaction); none of them commit.
#[async_trait]
pub trait Collection<T: Entity>: Send + Sync + 'static {
    /// Name used in errors and logs.
    fn name(&self) -> &str;

    /// Required number of key components, `None` if any shape is accepted.
    fn key_arity(&self) -> Option<usize>;

    /// Reads the entity stored under `key`.
    async fn fetch(&self, conn: &mut SqliteConnection, key: &Key) -> DbResult<Option<T>>;

    /// Returns true if a row exists under `key`.
    async fn exists(&self, conn: &mut SqliteConnection, key: &Key) -> DbResult<bool>;

    /// Writes a new entity. Duplicate handling is layout-specific.
    async fn insert(&self, conn: &mut SqliteConnection, key: &Key, entity: &T) -> DbResult<()>;

    /// Overwrites the entity stored under `key`, returning rows affected.
    async fn save(&self, conn: &mut SqliteConnection, key: &Key, entity: &T) -> DbResult<u64>;

    /// Deletes the entity stored under `key`, returning rows affected.
    async fn delete(&self, conn: &mut SqliteConnection, key: &Key) -> DbResult<u64>;

    /// Reads up to `limit` entities with a rowid greater than `after`, in
    /// rowid order.
    async fn fetch_page(
        &self,
        conn: &mut SqliteConnection,
        after: Option<i64>,
        limit: usize,
    ) -> DbResult<Vec<(i64, T)>>;

    /// Counts stored entities.
    async fn count(&self, conn: &mut SqliteConnection) -> DbResult<i64>;
}

//! # Database Pool Management
//!
//! The SQLite pool is the session factory every SQL repository is bound to.
//! A repository never owns a connection for longer than one call, one
//! commit, or one cursor's pending writes.
//!
//! ## Sessions Drawn From The Pool
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Database (one SqlitePool)                            │
//! │                                                                         │
//! │  repo.exists(k) / repo.find(k)  ──► connection, one SELECT, returned   │
//! │  repo.store(e) / ctx.commit()   ──► write transaction, committed       │
//! │  repo.store_all(v)              ──► one write transaction per chunk    │
//! │                                      (max_parallel_batches in flight)  │
//! │  items.save(e)                  ──► write transaction until commit     │
//! │                                                                         │
//! │  Writers queue on SQLite's lock for up to `busy_timeout`;              │
//! │  callers queue on the pool for up to `acquire_timeout`.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Connection Settings
//! - WAL journal, so readers and the single writer don't block each other
//! - NORMAL synchronous
//! - Foreign keys on (SQLite leaves them off by default)

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use repokit_core::{Entity, Key, RepoResult};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::{DocumentCollection, DocumentRepository, Table, TableRepository};

const IN_MEMORY: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Pool and connection settings.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("./data/repokit.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DbConfig {
    /// SQLite file, created on first connect. `:memory:` for a private
    /// in-memory database.
    pub path: PathBuf,

    /// Default: 5
    pub max_connections: u32,

    /// Default: 1
    pub min_connections: u32,

    /// How long a call waits for a free pooled connection.
    /// Default: 30 seconds
    pub acquire_timeout: Duration,

    /// How long a write waits for another connection's write lock.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Idle time before a pooled connection is closed.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Apply the embedded migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Settings for the database file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: path.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    /// A private in-memory database.
    ///
    /// Every connection to `:memory:` would see its own empty database, so
    /// the pool is capped at one connection. A cursor with pending writes
    /// occupies it until it is committed or released.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            ..DbConfig::new(IN_MEMORY)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Returns true for the `:memory:` database.
    pub fn is_in_memory(&self) -> bool {
        self.path == Path::new(IN_MEMORY)
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(Some(self.idle_timeout))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Owns the pool and hands out repositories bound to it.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./repokit.db")).await?;
///
/// let customers = db.documents("customers", |c: &Customer| Key::from(c.id))?;
/// customers.store(customer).await?;
///
/// let orders = db.table(
///     Table::new("orders", &["id"], &["id", "customer_id", "total_cents"])?,
///     |o: &Order| Key::from(o.id),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and, if configured, applies the embedded migrations.
    ///
    /// ## Errors
    /// * `ConnectionFailed` - The file could not be opened or created
    /// * `MigrationFailed` - The `documents` migration could not be applied
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.path.display(),
            max_connections = config.max_connections,
            "Opening database"
        );

        let pool = config
            .pool_options()
            .connect_with(config.connect_options())
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        debug!(
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            in_memory = config.is_in_memory(),
            "Database pool ready"
        );

        let db = Database { pool };
        if config.run_migrations {
            db.run_migrations().await?;
        }
        Ok(db)
    }

    /// Wraps a pool created elsewhere. Migrations are not run.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Database { pool }
    }

    /// Applies pending embedded migrations.
    ///
    /// Needed after [`Database::from_pool`] before document repositories
    /// are used.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// The underlying pool, for DDL and queries outside the repository
    /// contract.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// A table repository bound to this pool.
    ///
    /// `table` was validated by [`Table::new`], so this cannot fail.
    pub fn table<T>(
        &self,
        table: Table,
        key_of: impl Fn(&T) -> Key + Send + Sync + 'static,
    ) -> TableRepository<T>
    where
        T: Entity,
    {
        TableRepository::new(self.pool.clone(), table, key_of)
    }

    /// A document repository for `collection`.
    ///
    /// ## Errors
    /// * `Configuration` - Invalid collection name
    pub fn documents<T>(
        &self,
        collection: &str,
        key_of: impl Fn(&T) -> Key + Send + Sync + 'static,
    ) -> RepoResult<DocumentRepository<T>>
    where
        T: Entity,
    {
        let collection = DocumentCollection::new(collection)?;
        Ok(DocumentRepository::new(self.pool.clone(), collection, key_of))
    }

    /// Closes the pool. Repository calls made afterwards fail with
    /// `ConnectionFailure`.
    pub async fn close(&self) {
        info!("Closing database");
        self.pool.close().await;
    }

    /// Returns true if a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let config = DbConfig::in_memory();
        assert!(config.is_in_memory());

        let db = Database::new(config).await.unwrap();
        assert!(db.health_check().await);
        assert_eq!(migrations::migration_status(db.pool()).await.unwrap(), (1, 1));
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2)
            .busy_timeout(Duration::from_millis(250))
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(!config.run_migrations);
        assert!(!config.is_in_memory());

        let memory = DbConfig::in_memory();
        assert_eq!(memory.max_connections, 1);
        assert_eq!(memory.busy_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested-name.db");

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        assert!(db.health_check().await);
        assert!(path.exists());
        db.close().await;
    }

    #[tokio::test]
    async fn test_closed_pool_is_unhealthy() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.close().await;

        assert!(!db.health_check().await);
    }

    #[tokio::test]
    async fn test_invalid_collection_name_fails_fast() {
        #[derive(Clone, serde::Serialize, serde::Deserialize)]
        struct Doc {
            id: i64,
        }

        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db.documents("bad name!", |d: &Doc| Key::from(d.id)).unwrap_err();

        assert!(matches!(err, repokit_core::RepoError::Configuration(_)));
    }
}

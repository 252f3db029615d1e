//! # SQL Repository
//!
//! The transactional half of the SQL adapters: session handling, key
//! validation and batching, shared by every [`Collection`] layout.
//!
//! ## Sessions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  store / exists / remove  → begin ─ statement ─ commit (one call)      │
//! │                                                                         │
//! │  find(k)   → SELECT on a pooled connection ─┐                          │
//! │                                             │ context keeps the entity │
//! │  ctx.commit()  → begin ─ UPDATE ─ commit                               │
//! │  ctx.release() / drop → uncommitted edits are discarded                │
//! │                                                                         │
//! │  items()   → SELECT page ─ SELECT page ─ ... (keyset on rowid)         │
//! │  save(e)   → begin ─ UPDATE ─ UPDATE ...  held until commit/release    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write Transactions
//! Every write transaction starts with its write statement. A transaction
//! that reads first pins a WAL snapshot, and SQLite refuses to upgrade a
//! stale snapshot to a writer (`SQLITE_BUSY_SNAPSHOT`) without consulting
//! the busy timeout. Starting with the write lets SQLite wait for the lock
//! and read the latest snapshot.

use async_trait::async_trait;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use repokit_core::batch::store_in_chunks;
use repokit_core::{
    BatchReport, Entity, EnumerableContext, Key, KeyExtractor, ObjectContext, RepoError,
    RepoResult, Repository, RepositoryOptions,
};

use super::Collection;
use crate::error::DbError;

type Session = Transaction<'static, Sqlite>;

/// Returns the open session in `slot`, beginning one if there is none.
async fn open_session<'a>(
    slot: &'a mut Option<Session>,
    pool: &SqlitePool,
) -> RepoResult<&'a mut SqliteConnection> {
    let tx = match slot.take() {
        Some(tx) => tx,
        None => pool.begin().await.map_err(DbError::from)?,
    };
    let tx: &mut Session = slot.insert(tx);
    Ok(&mut **tx)
}

fn check_key(arity: Option<usize>, key: &Key) -> RepoResult<()> {
    match arity {
        Some(expected) if expected != key.len() => Err(RepoError::InvalidKey {
            key: key.clone(),
            expected,
            actual: key.len(),
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Repository
// =============================================================================

/// A repository bound to a pool, a collection layout and a key extractor.
///
/// Use the [`TableRepository`](super::TableRepository) and
/// [`DocumentRepository`](super::DocumentRepository) aliases.
pub struct SqlRepository<T, C> {
    pool: SqlitePool,
    collection: Arc<C>,
    key_of: KeyExtractor<T>,
    options: RepositoryOptions,
}

impl<T, C> Clone for SqlRepository<T, C> {
    fn clone(&self) -> Self {
        SqlRepository {
            pool: self.pool.clone(),
            collection: self.collection.clone(),
            key_of: self.key_of.clone(),
            options: self.options.clone(),
        }
    }
}

impl<T, C: fmt::Debug> fmt::Debug for SqlRepository<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlRepository")
            .field("collection", &self.collection)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T, C> SqlRepository<T, C> {
    /// Creates a repository with default options.
    pub fn new(
        pool: SqlitePool,
        collection: C,
        key_of: impl Fn(&T) -> Key + Send + Sync + 'static,
    ) -> Self {
        SqlRepository {
            pool,
            collection: Arc::new(collection),
            key_of: Arc::new(key_of),
            options: RepositoryOptions::default(),
        }
    }

    /// Replaces the options.
    ///
    /// ## Errors
    /// * `Configuration` - A size setting is out of range
    pub fn with_options(mut self, options: RepositoryOptions) -> RepoResult<Self> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    /// Current options.
    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    /// The collection layout.
    pub fn layout(&self) -> &C {
        &self.collection
    }
}

impl<T: Entity, C: Collection<T>> SqlRepository<T, C> {
    async fn begin(&self) -> RepoResult<Session> {
        Ok(self.pool.begin().await.map_err(DbError::from)?)
    }

    /// Counts stored entities.
    pub async fn count(&self) -> RepoResult<i64> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Ok(self.collection.count(&mut conn).await?)
    }

    async fn store_chunk(&self, chunk: Vec<T>) -> RepoResult<()> {
        let mut tx = self.begin().await?;

        for entity in &chunk {
            let key = (self.key_of)(entity);
            check_key(self.collection.key_arity(), &key)?;
            self.collection.insert(&mut tx, &key, entity).await?;
        }

        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }
}

#[async_trait]
impl<T: Entity, C: Collection<T>> Repository<T> for SqlRepository<T, C> {
    type Context = SqlObjectContext<T, C>;
    type Items = SqlItems<T, C>;

    fn collection(&self) -> &str {
        self.collection.name()
    }

    fn key_of(&self, entity: &T) -> Key {
        (self.key_of)(entity)
    }

    async fn store(&self, entity: T) -> RepoResult<()> {
        let key = (self.key_of)(&entity);
        check_key(self.collection.key_arity(), &key)?;
        debug!(collection = %self.collection.name(), key = %key, "Storing entity");

        let mut tx = self.begin().await?;
        self.collection.insert(&mut tx, &key, &entity).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }

    async fn store_all(&self, entities: Vec<T>) -> RepoResult<BatchReport> {
        store_in_chunks(
            entities,
            &self.options,
            |entity| (self.key_of)(entity),
            |chunk| self.store_chunk(chunk),
        )
        .await
    }

    async fn find(&self, key: &Key) -> RepoResult<Self::Context> {
        check_key(self.collection.key_arity(), key)?;
        debug!(collection = %self.collection.name(), key = %key, "Finding entity");

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let object = self.collection.fetch(&mut conn, key).await?;

        Ok(SqlObjectContext {
            pool: self.pool.clone(),
            collection: self.collection.clone(),
            key_of: self.key_of.clone(),
            key: key.clone(),
            object,
        })
    }

    async fn exists(&self, key: &Key) -> RepoResult<bool> {
        check_key(self.collection.key_arity(), key)?;

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Ok(self.collection.exists(&mut conn, key).await?)
    }

    async fn remove(&self, key: &Key) -> RepoResult<()> {
        check_key(self.collection.key_arity(), key)?;
        debug!(collection = %self.collection.name(), key = %key, "Removing entity");

        let mut tx = self.begin().await?;
        let removed = self.collection.delete(&mut tx, key).await?;

        if removed == 0 {
            return Err(RepoError::not_found(self.collection.name(), key));
        }

        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }

    async fn items(&self) -> RepoResult<Self::Items> {
        Ok(SqlItems {
            pool: self.pool.clone(),
            collection: self.collection.clone(),
            key_of: self.key_of.clone(),
            page_size: self.options.page_size,
            session: None,
            buffer: VecDeque::new(),
            last_rowid: None,
            exhausted: false,
        })
    }
}

// =============================================================================
// Object Context
// =============================================================================

/// Object context holding the entity read by `find`.
///
/// No transaction is held between `find` and `commit`; each commit writes
/// in a transaction of its own. Dropping the context discards anything not
/// committed.
pub struct SqlObjectContext<T, C> {
    pool: SqlitePool,
    collection: Arc<C>,
    key_of: KeyExtractor<T>,
    key: Key,
    object: Option<T>,
}

impl<T: fmt::Debug, C: fmt::Debug> fmt::Debug for SqlObjectContext<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlObjectContext")
            .field("collection", &self.collection)
            .field("key", &self.key)
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Entity, C: Collection<T>> ObjectContext<T> for SqlObjectContext<T, C> {
    fn collection(&self) -> &str {
        self.collection.name()
    }

    fn key(&self) -> &Key {
        &self.key
    }

    fn object(&self) -> Option<&T> {
        self.object.as_ref()
    }

    fn object_mut(&mut self) -> Option<&mut T> {
        self.object.as_mut()
    }

    async fn commit(&mut self) -> RepoResult<()> {
        let Some(object) = self.object.as_ref() else {
            return Ok(());
        };

        let new_key = (self.key_of)(object);
        if new_key != self.key {
            return Err(RepoError::KeyChanged {
                key: self.key.clone(),
                new_key,
            });
        }

        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let saved = self.collection.save(&mut tx, &self.key, object).await?;

        if saved == 0 {
            // Removed by someone else since find
            return Err(RepoError::not_found(self.collection.name(), &self.key));
        }

        tx.commit().await.map_err(DbError::from)?;

        debug!(collection = %self.collection.name(), key = %self.key, "Committed entity");
        Ok(())
    }

    async fn release(self) -> RepoResult<()> {
        Ok(())
    }
}

// =============================================================================
// Enumerable Context
// =============================================================================

/// Cursor over a whole collection, read in pages of `page_size` rows.
///
/// Pages are keyed on `rowid`, so rows inserted after the cursor passed
/// their position are not yielded and no row is yielded twice. Each page
/// is read on a pooled connection until the first `save`, which opens the
/// write transaction that later pages are read through.
pub struct SqlItems<T, C> {
    pool: SqlitePool,
    collection: Arc<C>,
    key_of: KeyExtractor<T>,
    page_size: usize,
    session: Option<Session>,
    buffer: VecDeque<T>,
    last_rowid: Option<i64>,
    exhausted: bool,
}

impl<T, C: fmt::Debug> fmt::Debug for SqlItems<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlItems")
            .field("collection", &self.collection)
            .field("page_size", &self.page_size)
            .field("buffered", &self.buffer.len())
            .field("last_rowid", &self.last_rowid)
            .field("exhausted", &self.exhausted)
            .field("pending_writes", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Entity, C: Collection<T>> EnumerableContext<T> for SqlItems<T, C> {
    async fn next(&mut self) -> RepoResult<Option<T>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = match self.session.as_mut() {
                Some(tx) => {
                    self.collection
                        .fetch_page(tx, self.last_rowid, self.page_size)
                        .await?
                }
                None => {
                    let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
                    self.collection
                        .fetch_page(&mut conn, self.last_rowid, self.page_size)
                        .await?
                }
            };

            debug!(
                collection = %self.collection.name(),
                after = ?self.last_rowid,
                rows = page.len(),
                "Fetched page"
            );

            self.exhausted = page.len() < self.page_size;
            for (rowid, entity) in page {
                self.last_rowid = Some(rowid);
                self.buffer.push_back(entity);
            }
        }

        Ok(self.buffer.pop_front())
    }

    async fn save(&mut self, entity: &T) -> RepoResult<()> {
        let key = (self.key_of)(entity);
        check_key(self.collection.key_arity(), &key)?;

        let conn = open_session(&mut self.session, &self.pool).await?;
        let saved = self.collection.save(conn, &key, entity).await?;

        if saved == 0 {
            return Err(RepoError::not_found(self.collection.name(), &key));
        }
        Ok(())
    }

    async fn commit(&mut self) -> RepoResult<()> {
        if let Some(tx) = self.session.take() {
            tx.commit().await.map_err(DbError::from)?;
        }
        Ok(())
    }

    async fn release(self) -> RepoResult<()> {
        if let Some(tx) = self.session {
            tx.rollback().await.map_err(DbError::from)?;
        }
        Ok(())
    }
}

//! # Repository Contract
//!
//! The CRUD contract every backend adapter implements.
//!
//! ## Control Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    One Repository Call                                  │
//! │                                                                         │
//! │  caller ──► repo.update(patch, &key)                                   │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │  open session (transaction / entry lock)                               │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │  one backend operation (find → apply patch → write)                    │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │  commit + release session                                              │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │  Ok(()) / Err(RepoError)                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Contexts
//! `find` and `items` hand the session to the caller inside a context.
//! The context owns the session: it is released exactly once, either by
//! `release()` or when the context is dropped, on every exit path.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::batch::BatchReport;
use crate::error::{RepoError, RepoResult};
use crate::key::Key;
use crate::patch::Patch;
use crate::path::{update_entity, UpdateType};

// =============================================================================
// Entity
// =============================================================================

/// Anything a repository can hold.
///
/// Serde is the only structural requirement; it drives path updates and
/// the document adapter. Implemented for every qualifying type.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Entity for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

// =============================================================================
// Object Context
// =============================================================================

/// A found entity (possibly absent) paired with the session that found it.
///
/// ## Lifecycle
/// ```text
/// find(key) ──► mutate 0..n times ──► commit() ──► release() / drop
///                  │
///                  └── object_mut(), update(patch), update_field(...)
/// ```
#[async_trait]
pub trait ObjectContext<T: Entity>: Send {
    /// Collection the entity was read from.
    fn collection(&self) -> &str;

    /// Key the context was opened with.
    fn key(&self) -> &Key;

    /// The wrapped entity, `None` if nothing matched the key.
    fn object(&self) -> Option<&T>;

    /// Mutable access to the wrapped entity.
    fn object_mut(&mut self) -> Option<&mut T>;

    /// Returns true if an entity was found.
    fn is_found(&self) -> bool {
        self.object().is_some()
    }

    /// Returns a copy of the wrapped entity.
    fn to_object(&self) -> Option<T> {
        self.object().cloned()
    }

    /// Applies a patch to the entity root.
    ///
    /// ## Errors
    /// * `NotFound` - The context wraps no entity
    fn update<P>(&mut self, patch: P) -> RepoResult<()>
    where
        P: Patch<T>,
    {
        match self.object_mut() {
            Some(object) => patch.apply(object),
            None => Err(RepoError::not_found(self.collection(), self.key())),
        }
    }

    /// Applies a patch to the part of the entity chosen by `selector`.
    ///
    /// ## Example
    /// ```rust,ignore
    /// ctx.update_field(|a: &mut Address| a.city = "Paris".into(), |c: &mut Customer| &mut c.address)?;
    /// ```
    fn update_field<U, S, P>(&mut self, patch: P, selector: S) -> RepoResult<()>
    where
        U: ?Sized,
        S: FnOnce(&mut T) -> &mut U,
        P: Patch<U>,
    {
        match self.object_mut() {
            Some(object) => patch.apply(selector(object)),
            None => Err(RepoError::not_found(self.collection(), self.key())),
        }
    }

    /// Applies JSON at a property path (see [`crate::path`]).
    fn update_path(&mut self, path: &str, json: &str, update_type: UpdateType) -> RepoResult<()> {
        match self.object_mut() {
            Some(object) => update_entity(object, path, json, update_type),
            None => Err(RepoError::not_found(self.collection(), self.key())),
        }
    }

    /// Persists the wrapped entity. May be called more than once.
    async fn commit(&mut self) -> RepoResult<()>;

    /// Releases the session. Uncommitted changes are discarded by
    /// adapters with transactional sessions.
    async fn release(self) -> RepoResult<()>
    where
        Self: Sized;
}

// =============================================================================
// Enumerable Context
// =============================================================================

/// A lazy, single-pass cursor over a whole collection, paired with its
/// session.
#[async_trait]
pub trait EnumerableContext<T: Entity>: Send {
    /// Fetches the next entity, `None` once the collection is exhausted.
    async fn next(&mut self) -> RepoResult<Option<T>>;

    /// Stages a write-back of a (mutated) entity in this session.
    async fn save(&mut self, entity: &T) -> RepoResult<()>;

    /// Persists staged writes.
    async fn commit(&mut self) -> RepoResult<()>;

    /// Releases the session, discarding uncommitted writes where the
    /// backend is transactional.
    async fn release(self) -> RepoResult<()>
    where
        Self: Sized;

    /// Drains the remaining entities into a Vec.
    async fn collect_remaining(&mut self) -> RepoResult<Vec<T>> {
        let mut all = Vec::new();
        while let Some(entity) = self.next().await? {
            all.push(entity);
        }
        Ok(all)
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Applies `change` to a copy of the context's entity and swaps the copy in
/// only if the change succeeded and left the entity's key alone.
fn apply_keeping_key<T, R, F>(
    repo: &R,
    context: &mut <R as Repository<T>>::Context,
    change: F,
) -> RepoResult<()>
where
    T: Entity,
    R: Repository<T> + ?Sized,
    F: FnOnce(&mut T) -> RepoResult<()>,
{
    let Some(current) = context.object() else {
        return Err(RepoError::not_found(context.collection(), context.key()));
    };

    let mut changed = current.clone();
    change(&mut changed)?;

    let new_key = repo.key_of(&changed);
    if &new_key != context.key() {
        return Err(RepoError::KeyChanged {
            key: context.key().clone(),
            new_key,
        });
    }

    if let Some(object) = context.object_mut() {
        *object = changed;
    }
    Ok(())
}

/// Uniform CRUD contract over a backend collection.
///
/// ## Update Overloads
/// All `update*` methods find the entity, apply the change, commit and
/// release. A missing key is `RepoError::NotFound`; a change that rewrites
/// the key fields is `RepoError::KeyChanged` and leaves the entity as it was.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Context returned by [`Repository::find`].
    type Context: ObjectContext<T>;

    /// Context returned by [`Repository::items`].
    type Items: EnumerableContext<T>;

    /// Name of the backing collection (table, document collection).
    fn collection(&self) -> &str;

    /// Key of an entity, per the repository's key extractor.
    fn key_of(&self, entity: &T) -> Key;

    /// Inserts one entity and commits.
    async fn store(&self, entity: T) -> RepoResult<()>;

    /// Inserts many entities in independently committed chunks.
    ///
    /// ## Guarantees
    /// - Chunks of `batch_size`, up to `max_parallel_batches` in flight
    /// - No ordering between chunks
    /// - A failed chunk does not roll back committed chunks; the failure is
    ///   reported as `RepoError::BatchFailed` listing the keys not stored
    async fn store_all(&self, entities: Vec<T>) -> RepoResult<BatchReport>;

    /// Finds one entity by key. The context wraps `None` when nothing matches.
    async fn find(&self, key: &Key) -> RepoResult<Self::Context>;

    /// Returns true if an entity is stored under the key.
    async fn exists(&self, key: &Key) -> RepoResult<bool>;

    /// Deletes the entity under the key.
    ///
    /// ## Errors
    /// * `NotFound` - Nothing is stored under the key
    async fn remove(&self, key: &Key) -> RepoResult<()>;

    /// Applies a patch to the entity root, commits and releases.
    async fn update<P>(&self, patch: P, key: &Key) -> RepoResult<()>
    where
        P: Patch<T> + Send + 'static,
    {
        let mut context = self.find(key).await?;
        apply_keeping_key(self, &mut context, |entity| patch.apply(entity))?;
        context.commit().await?;
        context.release().await
    }

    /// Applies a patch to the part of the entity chosen by `selector`,
    /// commits and releases.
    async fn update_field<U, S, P>(&self, patch: P, selector: S, key: &Key) -> RepoResult<()>
    where
        U: ?Sized + 'static,
        S: FnOnce(&mut T) -> &mut U + Send + 'static,
        P: Patch<U> + Send + 'static,
    {
        let mut context = self.find(key).await?;
        apply_keeping_key(self, &mut context, |entity| patch.apply(selector(entity)))?;
        context.commit().await?;
        context.release().await
    }

    /// Applies JSON at a property path, commits and releases.
    async fn update_path(
        &self,
        path: &str,
        json: &str,
        update_type: UpdateType,
        key: &Key,
    ) -> RepoResult<()> {
        let mut context = self.find(key).await?;
        apply_keeping_key(self, &mut context, |entity| {
            update_entity(entity, path, json, update_type)
        })?;
        context.commit().await?;
        context.release().await
    }

    /// Applies JSON at the entity root, commits and releases.
    async fn update_json(&self, json: &str, update_type: UpdateType, key: &Key) -> RepoResult<()> {
        self.update_path("", json, update_type, key).await
    }

    /// Opens a cursor over the whole collection.
    async fn items(&self) -> RepoResult<Self::Items>;

    /// Releases resources held by the repository itself.
    ///
    /// A no-op for adapters that open a fresh session per call.
    async fn close(&self) -> RepoResult<()> {
        Ok(())
    }
}

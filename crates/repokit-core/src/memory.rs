//! # In-Memory Repository
//!
//! Map-backed reference adapter with no persistence.
//!
//! ## Storage Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    InMemoryRepository<T>                                │
//! │                                                                         │
//! │  Arc<RwLock<HashMap<Key, Arc<Mutex<T>>>>>                              │
//! │        │                        │                                       │
//! │        │                        └── entry lock: held by an object      │
//! │        │                            context from find() until release  │
//! │        └── map lock: held only for lookups, inserts, removals          │
//! │                                                                         │
//! │  find(key) ──► context holds the entry guard                           │
//! │                mutations land directly in the map,                     │
//! │                commit() only checks the key is unchanged               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Entry Locks
//! An entry lock behaves like a row lock: while a context for `k` is alive,
//! `store`/`update*` of `k` wait for it. Release contexts before updating
//! the same key through the repository.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::batch::{store_in_chunks, BatchReport};
use crate::error::{RepoError, RepoResult};
use crate::key::{Key, KeyExtractor};
use crate::options::RepositoryOptions;
use crate::repository::{Entity, EnumerableContext, ObjectContext, Repository};

type Entry<T> = Arc<Mutex<T>>;
type EntryMap<T> = Arc<RwLock<HashMap<Key, Entry<T>>>>;

/// Default collection name for in-memory repositories.
pub const DEFAULT_COLLECTION: &str = "memory";

// =============================================================================
// Repository
// =============================================================================

/// A process-local repository. Clones share the same map.
///
/// ## Usage
/// ```rust
/// use repokit_core::{InMemoryRepository, Key, ObjectContext, Repository};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Item { id: i64, value: String }
///
/// # tokio_test_block(async {
/// let repo = InMemoryRepository::new(|i: &Item| Key::from(i.id));
/// repo.store(Item { id: 1, value: "a".into() }).await.unwrap();
/// assert!(repo.exists(&Key::from(1)).await.unwrap());
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f);
/// # }
/// ```
pub struct InMemoryRepository<T> {
    name: String,
    entries: EntryMap<T>,
    key_of: KeyExtractor<T>,
    options: RepositoryOptions,
}

impl<T> Clone for InMemoryRepository<T> {
    fn clone(&self) -> Self {
        InMemoryRepository {
            name: self.name.clone(),
            entries: self.entries.clone(),
            key_of: self.key_of.clone(),
            options: self.options.clone(),
        }
    }
}

impl<T> fmt::Debug for InMemoryRepository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T: Entity> InMemoryRepository<T> {
    /// Creates an empty repository with default options.
    pub fn new(key_of: impl Fn(&T) -> Key + Send + Sync + 'static) -> Self {
        InMemoryRepository {
            name: DEFAULT_COLLECTION.to_string(),
            entries: Arc::new(RwLock::new(HashMap::new())),
            key_of: Arc::new(key_of),
            options: RepositoryOptions::default(),
        }
    }

    /// Sets the collection name used in errors and logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
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

    /// Number of stored entities.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn put(&self, entity: T) {
        let key = (self.key_of)(&entity);

        loop {
            let mut map = self.entries.write().await;
            let Some(entry) = map.get(&key).cloned() else {
                map.insert(key, Arc::new(Mutex::new(entity)));
                return;
            };
            drop(map);

            let mut guard = entry.lock().await;

            // The entry may have been removed or replaced while we waited
            let map = self.entries.read().await;
            if map.get(&key).is_some_and(|live| Arc::ptr_eq(live, &entry)) {
                *guard = entity;
                return;
            }
        }
    }

    async fn entry(&self, key: &Key) -> Option<Entry<T>> {
        self.entries.read().await.get(key).cloned()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    type Context = MemoryObjectContext<T>;
    type Items = MemoryItems<T>;

    fn collection(&self) -> &str {
        &self.name
    }

    fn key_of(&self, entity: &T) -> Key {
        (self.key_of)(entity)
    }

    async fn store(&self, entity: T) -> RepoResult<()> {
        debug!(collection = %self.name, key = %self.key_of(&entity), "Storing entity");
        self.put(entity).await;
        Ok(())
    }

    async fn store_all(&self, entities: Vec<T>) -> RepoResult<BatchReport> {
        store_in_chunks(
            entities,
            &self.options,
            |e| (self.key_of)(e),
            |chunk| async move {
                for entity in chunk {
                    self.put(entity).await;
                }
                Ok(())
            },
        )
        .await
    }

    async fn find(&self, key: &Key) -> RepoResult<Self::Context> {
        debug!(collection = %self.name, key = %key, "Finding entity");

        let guard = match self.entry(key).await {
            Some(entry) => Some(entry.lock_owned().await),
            None => None,
        };

        Ok(MemoryObjectContext {
            collection: self.name.clone(),
            key: key.clone(),
            key_of: self.key_of.clone(),
            guard,
        })
    }

    async fn exists(&self, key: &Key) -> RepoResult<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn remove(&self, key: &Key) -> RepoResult<()> {
        debug!(collection = %self.name, key = %key, "Removing entity");

        match self.entries.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(RepoError::not_found(&self.name, key)),
        }
    }

    async fn items(&self) -> RepoResult<Self::Items> {
        let mut snapshot: Vec<(Key, Entry<T>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(MemoryItems {
            pending: snapshot.into_iter().map(|(_, entry)| entry).collect(),
            repository: self.clone(),
        })
    }
}

// =============================================================================
// Object Context
// =============================================================================

/// Object context holding the entry lock of the found entity.
pub struct MemoryObjectContext<T> {
    collection: String,
    key: Key,
    key_of: KeyExtractor<T>,
    guard: Option<OwnedMutexGuard<T>>,
}

#[async_trait]
impl<T: Entity> ObjectContext<T> for MemoryObjectContext<T> {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn key(&self) -> &Key {
        &self.key
    }

    fn object(&self) -> Option<&T> {
        self.guard.as_deref()
    }

    fn object_mut(&mut self) -> Option<&mut T> {
        self.guard.as_deref_mut()
    }

    async fn commit(&mut self) -> RepoResult<()> {
        // Mutations already live in the map; only the key needs checking
        if let Some(object) = self.guard.as_deref() {
            let new_key = (self.key_of)(object);
            if new_key != self.key {
                return Err(RepoError::KeyChanged {
                    key: self.key.clone(),
                    new_key,
                });
            }
        }
        Ok(())
    }

    async fn release(self) -> RepoResult<()> {
        drop(self.guard);
        Ok(())
    }
}

// =============================================================================
// Enumerable Context
// =============================================================================

/// Cursor over a snapshot of the keys present when `items()` was called,
/// in key order. Entities removed since are still yielded.
pub struct MemoryItems<T> {
    pending: VecDeque<Entry<T>>,
    repository: InMemoryRepository<T>,
}

#[async_trait]
impl<T: Entity> EnumerableContext<T> for MemoryItems<T> {
    async fn next(&mut self) -> RepoResult<Option<T>> {
        match self.pending.pop_front() {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn save(&mut self, entity: &T) -> RepoResult<()> {
        self.repository.put(entity.clone()).await;
        Ok(())
    }

    async fn commit(&mut self) -> RepoResult<()> {
        Ok(())
    }

    async fn release(self) -> RepoResult<()> {
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::MergePatch;
    use crate::path::UpdateType;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Property {
        value1: Option<i64>,
        value2: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestClass {
        key: i64,
        value2: Option<String>,
        property: Property,
    }

    impl TestClass {
        fn new() -> Self {
            TestClass {
                key: 1,
                value2: None,
                property: Property {
                    value1: Some(1),
                    value2: None,
                },
            }
        }
    }

    fn repo() -> InMemoryRepository<TestClass> {
        InMemoryRepository::new(|t: &TestClass| Key::from(t.key))
    }

    #[tokio::test]
    async fn test_update_root_and_nested_property() {
        let repository = repo();
        repository.store(TestClass::new()).await.unwrap();

        repository
            .update(MergePatch::new(json!({ "value2": "max" })), &Key::from(1))
            .await
            .unwrap();

        let val = repository.find(&Key::from(1)).await.unwrap().to_object().unwrap();
        assert_eq!(val.value2.as_deref(), Some("max"));

        repository
            .update_field(
                MergePatch::new(json!({ "value2": "max" })),
                |t: &mut TestClass| &mut t.property,
                &Key::from(1),
            )
            .await
            .unwrap();

        let val = repository.find(&Key::from(1)).await.unwrap().to_object().unwrap();
        assert_eq!(val.property.value2.as_deref(), Some("max"));
        assert_eq!(val.property.value1, Some(1));
    }

    #[tokio::test]
    async fn test_context_mutations_visible_without_commit() {
        let repository = repo();
        repository.store(TestClass::new()).await.unwrap();

        let mut ctx = repository.find(&Key::from(1)).await.unwrap();
        ctx.object_mut().unwrap().value2 = Some("direct".to_string());
        ctx.release().await.unwrap();

        let ctx = repository.find(&Key::from(1)).await.unwrap();
        assert_eq!(ctx.object().unwrap().value2.as_deref(), Some("direct"));
    }

    #[tokio::test]
    async fn test_find_absent() {
        let repository = repo();
        let mut ctx = repository.find(&Key::from(999)).await.unwrap();

        assert!(!ctx.is_found());
        assert!(ctx.update(|t: &mut TestClass| t.key = 5).unwrap_err().is_not_found());
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let repository = repo();
        repository.store(TestClass::new()).await.unwrap();

        let mut replacement = TestClass::new();
        replacement.value2 = Some("second".to_string());
        repository.store(replacement.clone()).await.unwrap();

        assert_eq!(repository.len().await, 1);
        let ctx = repository.find(&Key::from(1)).await.unwrap();
        assert_eq!(ctx.object(), Some(&replacement));
    }

    #[tokio::test]
    async fn test_remove() {
        let repository = repo();
        repository.store(TestClass::new()).await.unwrap();

        repository.remove(&Key::from(1)).await.unwrap();
        assert!(!repository.exists(&Key::from(1)).await.unwrap());
        assert!(repository.remove(&Key::from(1)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let repository = repo();
        let err = repository
            .update(|t: &mut TestClass| t.value2 = None, &Key::from(3))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_path() {
        let repository = repo();
        repository.store(TestClass::new()).await.unwrap();

        repository
            .update_path("property.value1", "42", UpdateType::Set, &Key::from(1))
            .await
            .unwrap();
        repository
            .update_json(r#"{ "value2": "json" }"#, UpdateType::Merge, &Key::from(1))
            .await
            .unwrap();

        let val = repository.find(&Key::from(1)).await.unwrap().to_object().unwrap();
        assert_eq!(val.property.value1, Some(42));
        assert_eq!(val.value2.as_deref(), Some("json"));
    }

    #[tokio::test]
    async fn test_items_in_key_order_and_save() {
        let repository = repo();
        for key in [3, 1, 2] {
            let mut t = TestClass::new();
            t.key = key;
            repository.store(t).await.unwrap();
        }

        let mut items = repository.items().await.unwrap();
        let mut keys = Vec::new();
        while let Some(mut t) = items.next().await.unwrap() {
            keys.push(t.key);
            t.value2 = Some("seen".to_string());
            items.save(&t).await.unwrap();
        }
        items.commit().await.unwrap();
        items.release().await.unwrap();

        assert_eq!(keys, vec![1, 2, 3]);
        let ctx = repository.find(&Key::from(2)).await.unwrap();
        assert_eq!(ctx.object().unwrap().value2.as_deref(), Some("seen"));
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let repository = repo().named("shared");
        let other = repository.clone();
        repository.store(TestClass::new()).await.unwrap();

        assert!(other.exists(&Key::from(1)).await.unwrap());
        assert_eq!(other.collection(), "shared");
    }

    #[tokio::test]
    async fn test_store_survives_remove_while_waiting_for_entry() {
        let repository = repo();
        repository.store(TestClass::new()).await.unwrap();

        let ctx = repository.find(&Key::from(1)).await.unwrap();

        let writer = repository.clone();
        let mut replacement = TestClass::new();
        replacement.value2 = Some("stored".to_string());
        let store = tokio::spawn(async move { writer.store(replacement).await });

        // Let the store block on the entry held by the context
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        repository.remove(&Key::from(1)).await.unwrap();
        ctx.release().await.unwrap();

        store.await.unwrap().unwrap();
        assert!(repository.exists(&Key::from(1)).await.unwrap());
        let val = repository.find(&Key::from(1)).await.unwrap().to_object().unwrap();
        assert_eq!(val.value2.as_deref(), Some("stored"));
    }

    #[tokio::test]
    async fn test_update_cannot_change_key() {
        let repository = repo();
        repository.store(TestClass::new()).await.unwrap();

        let err = repository
            .update(|t: &mut TestClass| t.key = 5, &Key::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::KeyChanged { .. }));

        let err = repository
            .update_path("key", "7", UpdateType::Set, &Key::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::KeyChanged { .. }));

        // The stored entity is untouched and still under its key
        let val = repository.find(&Key::from(1)).await.unwrap().to_object().unwrap();
        assert_eq!(val.key, 1);
        assert!(!repository.exists(&Key::from(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_rejects_edited_key() {
        let repository = repo();
        repository.store(TestClass::new()).await.unwrap();

        let mut ctx = repository.find(&Key::from(1)).await.unwrap();
        ctx.object_mut().unwrap().key = 9;
        assert!(matches!(
            ctx.commit().await.unwrap_err(),
            RepoError::KeyChanged { .. }
        ));
        ctx.object_mut().unwrap().key = 1;
        ctx.commit().await.unwrap();
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let result = repo().with_options(RepositoryOptions::new().batch_size(0));
        assert!(matches!(result, Err(RepoError::Configuration(_))));
    }
}

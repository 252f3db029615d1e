//! # Adapter Conformance Checks
//!
//! Behaviour every [`Repository`] adapter must share, written once and run
//! against each adapter's test fixture. The in-memory adapter is the
//! baseline.
//!
//! ## Usage
//! ```rust,ignore
//! #[tokio::test]
//! async fn test_table_repository_conformance() {
//!     let repo = fixture().await;
//!     repokit_core::conformance::run_all(&repo).await;
//! }
//! ```
//!
//! Key ranges used (the repository should start empty):
//! `1`, `10..=12`, `20`, `999`, `1000..1100`.

use serde_json::json;
use std::fmt::Debug;

use crate::key::Key;
use crate::patch::MergePatch;
use crate::path::UpdateType;
use crate::repository::{Entity, EnumerableContext, ObjectContext, Repository};

/// The shape the checks need from a test entity: an integer id plus a
/// text field named `value`.
pub trait ConformanceEntity: Entity + PartialEq + Debug {
    fn new(id: i64, value: &str) -> Self;
    fn id(&self) -> i64;
    fn value(&self) -> &str;
    fn value_mut(&mut self) -> &mut String;
}

/// Runs every check in sequence. The repository must use a batch size of
/// 10 or less for the batching check to span several chunks.
pub async fn run_all<R, T>(repo: &R)
where
    R: Repository<T>,
    T: ConformanceEntity,
{
    store_then_find(repo).await;
    find_absent(repo).await;
    remove_then_missing(repo).await;
    update_changes_only_patched_fields(repo).await;
    update_field_and_path(repo).await;
    batched_store(repo).await;
    enumerate_everything(repo).await;
}

/// After `store(e)`, `exists(k)` is true and `find(k)` yields `e`.
pub async fn store_then_find<R, T>(repo: &R)
where
    R: Repository<T>,
    T: ConformanceEntity,
{
    let entity = T::new(10, "stored");
    repo.store(entity.clone()).await.unwrap();

    let key = Key::from(10);
    assert!(repo.exists(&key).await.unwrap());

    let ctx = repo.find(&key).await.unwrap();
    assert_eq!(ctx.object(), Some(&entity));
    ctx.release().await.unwrap();
}

/// `find` on a missing key wraps nothing; `exists` is false.
pub async fn find_absent<R, T>(repo: &R)
where
    R: Repository<T>,
    T: ConformanceEntity,
{
    let key = Key::from(999);
    assert!(!repo.exists(&key).await.unwrap());

    let ctx = repo.find(&key).await.unwrap();
    assert!(ctx.object().is_none());
    ctx.release().await.unwrap();
}

/// `remove` deletes, and removing again is `NotFound`.
pub async fn remove_then_missing<R, T>(repo: &R)
where
    R: Repository<T>,
    T: ConformanceEntity,
{
    repo.store(T::new(11, "doomed")).await.unwrap();
    let key = Key::from(11);

    repo.remove(&key).await.unwrap();
    assert!(!repo.exists(&key).await.unwrap());
    assert!(repo.remove(&key).await.unwrap_err().is_not_found());
}

/// `{id: 1, value: "a"}` updated with `{value: "b"}` becomes `{id: 1, value: "b"}`.
pub async fn update_changes_only_patched_fields<R, T>(repo: &R)
where
    R: Repository<T>,
    T: ConformanceEntity,
{
    repo.store(T::new(1, "a")).await.unwrap();
    let key = Key::from(1);

    repo.update(MergePatch::new(json!({ "value": "b" })), &key)
        .await
        .unwrap();

    let ctx = repo.find(&key).await.unwrap();
    assert_eq!(ctx.object(), Some(&T::new(1, "b")));
    ctx.release().await.unwrap();

    let missing = repo
        .update(MergePatch::new(json!({ "value": "c" })), &Key::from(999))
        .await
        .unwrap_err();
    assert!(missing.is_not_found());
}

/// Selector-based and path-based updates both commit.
pub async fn update_field_and_path<R, T>(repo: &R)
where
    R: Repository<T>,
    T: ConformanceEntity,
{
    repo.store(T::new(12, "start")).await.unwrap();
    let key = Key::from(12);

    repo.update_field(
        |value: &mut String| value.push_str("-field"),
        |entity: &mut T| entity.value_mut(),
        &key,
    )
    .await
    .unwrap();

    repo.update_path("value", "\"path\"", UpdateType::Set, &key)
        .await
        .unwrap();

    let ctx = repo.find(&key).await.unwrap();
    assert_eq!(ctx.object().map(|e| e.value()), Some("path"));
    ctx.release().await.unwrap();

    let mut ctx = repo.find(&key).await.unwrap();
    ctx.update(|entity: &mut T| *entity.value_mut() = "committed".to_string())
        .unwrap();
    ctx.commit().await.unwrap();
    ctx.release().await.unwrap();

    let ctx = repo.find(&key).await.unwrap();
    assert_eq!(ctx.object().map(|e| e.value()), Some("committed"));
    ctx.release().await.unwrap();
}

/// 100 entities stored in batches are all retrievable afterwards.
pub async fn batched_store<R, T>(repo: &R)
where
    R: Repository<T>,
    T: ConformanceEntity,
{
    let entities: Vec<T> = (1000..1100).map(|id| T::new(id, &id.to_string())).collect();
    let report = repo.store_all(entities).await.unwrap();

    assert_eq!(report.stored, 100);
    assert!(report.chunks >= 10);

    for id in 1000..1100 {
        assert!(repo.exists(&Key::from(id)).await.unwrap(), "missing {}", id);
    }
}

/// `items()` yields every stored entity exactly once.
pub async fn enumerate_everything<R, T>(repo: &R)
where
    R: Repository<T>,
    T: ConformanceEntity,
{
    repo.store(T::new(20, "listed")).await.unwrap();

    let mut items = repo.items().await.unwrap();
    let mut ids: Vec<i64> = items
        .collect_remaining()
        .await
        .unwrap()
        .iter()
        .map(|e| e.id())
        .collect();
    items.release().await.unwrap();

    let total = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), total, "an entity was yielded twice");
    assert!(ids.contains(&20));
    assert!(ids.contains(&1050));
}

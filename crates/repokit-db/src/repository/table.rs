//! # Table Repository
//!
//! Maps entities onto a caller-owned SQLite table: one row per entity, one
//! column per serialized field.
//!
//! ## Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Entity ⇄ Row                                         │
//! │                                                                         │
//! │  write: entity ──serde──► { "id": 7, "name": "Ada", "tags": ["a"] }   │
//! │                                  │        │            │                │
//! │                                  ▼        ▼            ▼                │
//! │         INSERT INTO customers (id,    name,      tags)                  │
//! │                        VALUES (7,     'Ada',     '["a"]')  ← JSON text │
//! │                                                                         │
//! │  read:  SELECT id, name, tags ... ──sqlx::FromRow──► entity            │
//! │                                                                         │
//! │  Fields not listed as columns are not written.                         │
//! │  Columns missing from the serialized entity are written as NULL.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```rust,ignore
//! #[derive(Clone, Serialize, Deserialize, sqlx::FromRow)]
//! struct Customer { id: i64, name: String }
//!
//! let table = Table::new("customers", &["id"], &["id", "name"])?;
//! let customers = db.table(table, |c: &Customer| Key::from(c.id));
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{FromRow, Row, Sqlite, SqliteConnection};

use repokit_core::validation::{validate_identifier, validate_identifier_list};
use repokit_core::{Entity, Key, KeyValue, RepoResult, ValidationError};

use super::sql::SqlRepository;
use super::Collection;
use crate::error::{DbError, DbResult};

/// Repository over a caller-owned table.
pub type TableRepository<T> = SqlRepository<T, Table>;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

const ROWID_ALIAS: &str = "repokit_rowid";

// =============================================================================
// Table Descriptor
// =============================================================================

/// Describes the table a [`TableRepository`] reads and writes.
///
/// Statements are rendered once, at construction.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    key_columns: Vec<String>,
    columns: Vec<String>,
    statements: Statements,
}

#[derive(Debug, Clone)]
struct Statements {
    select: String,
    exists: String,
    insert: String,
    update: Option<String>,
    delete: String,
    page: String,
    count: String,
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn key_predicate(key_columns: &[String]) -> String {
    key_columns
        .iter()
        .map(|c| format!("{} = ?", quote(c)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

impl Table {
    /// Creates a table descriptor.
    ///
    /// ## Arguments
    /// * `name` - Table name
    /// * `key_columns` - Primary key columns, in key-component order
    /// * `columns` - Every mapped column, key columns included
    ///
    /// ## Errors
    /// * `Configuration` - Empty or invalid identifiers, duplicate columns,
    ///   or a key column that is not among `columns`
    ///
    /// The table must be a rowid table (not `WITHOUT ROWID`): enumeration
    /// pages on `rowid`.
    pub fn new(name: &str, key_columns: &[&str], columns: &[&str]) -> RepoResult<Self> {
        validate_identifier("table", name)?;

        let key_columns: Vec<String> = key_columns.iter().map(|c| c.to_string()).collect();
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();

        validate_identifier_list("key_columns", &key_columns)?;
        validate_identifier_list("columns", &columns)?;

        if let Some(missing) = key_columns.iter().find(|k| !columns.contains(*k)) {
            return Err(ValidationError::InvalidFormat {
                field: "key_columns".to_string(),
                reason: format!("'{}' is not among the columns", missing),
            }
            .into());
        }

        let statements = Statements::render(name, &key_columns, &columns);

        Ok(Table {
            name: name.to_string(),
            key_columns,
            columns,
            statements,
        })
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key columns, in key-component order.
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Every mapped column.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn value_columns(&self) -> impl Iterator<Item = &String> {
        self.columns
            .iter()
            .filter(move |c| !self.key_columns.contains(*c))
    }

    /// Serializes an entity into its field map.
    fn fields<T: Entity>(&self, entity: &T) -> DbResult<serde_json::Map<String, Value>> {
        match serde_json::to_value(entity)? {
            Value::Object(fields) => Ok(fields),
            other => Err(DbError::Serialization(format!(
                "{} rows need an entity that serializes to an object, got {}",
                self.name, other
            ))),
        }
    }
}

impl Statements {
    fn render(table: &str, key_columns: &[String], columns: &[String]) -> Self {
        let table = quote(table);
        let column_list = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        let predicate = key_predicate(key_columns);

        let assignments: Vec<String> = columns
            .iter()
            .filter(|c| !key_columns.contains(*c))
            .map(|c| format!("{} = ?", quote(c)))
            .collect();

        let update = if assignments.is_empty() {
            None
        } else {
            Some(format!(
                "UPDATE {} SET {} WHERE {}",
                table,
                assignments.join(", "),
                predicate
            ))
        };

        Statements {
            select: format!("SELECT {} FROM {} WHERE {}", column_list, table, predicate),
            exists: format!("SELECT 1 FROM {} WHERE {} LIMIT 1", table, predicate),
            insert: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table, column_list, placeholders
            ),
            update,
            delete: format!("DELETE FROM {} WHERE {}", table, predicate),
            page: format!(
                "SELECT rowid AS {}, {} FROM {} WHERE rowid > ? ORDER BY rowid LIMIT ?",
                ROWID_ALIAS, column_list, table
            ),
            count: format!("SELECT COUNT(*) FROM {}", table),
        }
    }
}

// =============================================================================
// Binding
// =============================================================================

/// Binds one serialized field. Nested arrays and objects are bound as JSON
/// text.
fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        nested => query.bind(nested.to_string()),
    }
}

fn bind_key<'q>(mut query: SqliteQuery<'q>, key: &Key) -> SqliteQuery<'q> {
    for component in key.components() {
        query = match component {
            KeyValue::Int(v) => query.bind(*v),
            KeyValue::Text(v) => query.bind(v.clone()),
            KeyValue::Uuid(v) => query.bind(v.to_string()),
            KeyValue::Bool(v) => query.bind(*v),
        };
    }
    query
}

// =============================================================================
// Collection
// =============================================================================

#[async_trait]
impl<T> Collection<T> for Table
where
    T: Entity + for<'r> FromRow<'r, SqliteRow>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn key_arity(&self) -> Option<usize> {
        Some(self.key_columns.len())
    }

    async fn fetch(&self, conn: &mut SqliteConnection, key: &Key) -> DbResult<Option<T>> {
        let row = bind_key(sqlx::query(&self.statements.select), key)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Some(T::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn exists(&self, conn: &mut SqliteConnection, key: &Key) -> DbResult<bool> {
        let row = bind_key(sqlx::query(&self.statements.exists), key)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.is_some())
    }

    async fn insert(&self, conn: &mut SqliteConnection, _key: &Key, entity: &T) -> DbResult<()> {
        let fields = self.fields(entity)?;

        let mut query = sqlx::query(&self.statements.insert);
        for column in &self.columns {
            query = bind_value(query, fields.get(column).unwrap_or(&Value::Null));
        }

        query.execute(&mut *conn).await?;
        Ok(())
    }

    async fn save(&self, conn: &mut SqliteConnection, key: &Key, entity: &T) -> DbResult<u64> {
        let Some(update) = &self.statements.update else {
            // Every column is a key column: nothing to overwrite
            let found = <Self as Collection<T>>::exists(self, conn, key).await?;
            return Ok(u64::from(found));
        };

        let fields = self.fields(entity)?;

        let mut query = sqlx::query(update);
        for column in self.value_columns() {
            query = bind_value(query, fields.get(column).unwrap_or(&Value::Null));
        }

        let result = bind_key(query, key).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, conn: &mut SqliteConnection, key: &Key) -> DbResult<u64> {
        let result = bind_key(sqlx::query(&self.statements.delete), key)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected())
    }

    async fn fetch_page(
        &self,
        conn: &mut SqliteConnection,
        after: Option<i64>,
        limit: usize,
    ) -> DbResult<Vec<(i64, T)>> {
        let rows = sqlx::query(&self.statements.page)
            .bind(after.unwrap_or(i64::MIN))
            .bind(limit as i64)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| -> DbResult<(i64, T)> {
                let rowid: i64 = row.try_get(ROWID_ALIAS)?;
                Ok((rowid, T::from_row(row)?))
            })
            .collect()
    }

    async fn count(&self, conn: &mut SqliteConnection) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(&self.statements.count)
            .fetch_one(&mut *conn)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use repokit_core::conformance::{self, ConformanceEntity};
    use repokit_core::{
        EnumerableContext, MergePatch, ObjectContext, RepoError, Repository, RepositoryOptions,
        UpdateType,
    };
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
    struct TestObject {
        id: i64,
        value: String,
    }

    impl ConformanceEntity for TestObject {
        fn new(id: i64, value: &str) -> Self {
            TestObject {
                id,
                value: value.to_string(),
            }
        }
        fn id(&self) -> i64 {
            self.id
        }
        fn value(&self) -> &str {
            &self.value
        }
        fn value_mut(&mut self) -> &mut String {
            &mut self.value
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
    struct Price {
        sku: String,
        region: String,
        amount_cents: i64,
        active: bool,
        note: Option<String>,
    }

    async fn test_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query("CREATE TABLE test_objects (id INTEGER PRIMARY KEY, value TEXT NOT NULL)")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE prices (
                sku TEXT NOT NULL,
                region TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                active INTEGER NOT NULL,
                note TEXT,
                PRIMARY KEY (sku, region)
            )",
        )
        .execute(db.pool())
        .await
        .unwrap();
        db
    }

    fn objects(db: &Database) -> TableRepository<TestObject> {
        let table = Table::new("test_objects", &["id"], &["id", "value"]).unwrap();
        db.table(table, |o: &TestObject| Key::from(o.id))
    }

    fn prices(db: &Database) -> TableRepository<Price> {
        let table = Table::new(
            "prices",
            &["sku", "region"],
            &["sku", "region", "amount_cents", "active", "note"],
        )
        .unwrap();
        db.table(table, |p: &Price| Key::from((p.sku.as_str(), p.region.as_str())))
    }

    fn price(sku: &str, region: &str, amount_cents: i64) -> Price {
        Price {
            sku: sku.to_string(),
            region: region.to_string(),
            amount_cents,
            active: true,
            note: None,
        }
    }

    #[test]
    fn test_table_validation() {
        assert!(Table::new("test_objects", &["id"], &["id", "value"]).is_ok());

        let cases = [
            Table::new("", &["id"], &["id"]),
            Table::new("objects; DROP TABLE x", &["id"], &["id"]),
            Table::new("objects", &[], &["id"]),
            Table::new("objects", &["id"], &[]),
            Table::new("objects", &["uid"], &["id", "value"]),
            Table::new("objects", &["id"], &["id", "id"]),
        ];
        for case in cases {
            assert!(matches!(case, Err(RepoError::Configuration(_))));
        }
    }

    #[test]
    fn test_rendered_statements() {
        let table = Table::new("prices", &["sku", "region"], &["sku", "region", "amount_cents"]).unwrap();

        assert_eq!(
            table.statements.update.as_deref(),
            Some(r#"UPDATE "prices" SET "amount_cents" = ? WHERE "sku" = ? AND "region" = ?"#)
        );
        assert_eq!(
            table.statements.insert,
            r#"INSERT INTO "prices" ("sku", "region", "amount_cents") VALUES (?, ?, ?)"#
        );
    }

    #[tokio::test]
    async fn test_table_repository_conformance() {
        let db = test_db().await;
        let repo = objects(&db)
            .with_options(RepositoryOptions::new().batch_size(10))
            .unwrap();

        conformance::run_all::<_, TestObject>(&repo).await;
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_constraint_violation() {
        let db = test_db().await;
        let repo = objects(&db);

        repo.store(TestObject::new(1, "a")).await.unwrap();
        let err = repo.store(TestObject::new(1, "b")).await.unwrap_err();

        assert!(matches!(err, RepoError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_key_arity_is_checked() {
        let db = test_db().await;
        let repo = prices(&db);

        let err = repo.exists(&Key::from("SKU-1")).await.unwrap_err();
        assert!(matches!(
            err,
            RepoError::InvalidKey {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_composite_key_round_trip() {
        let db = test_db().await;
        let repo = prices(&db);

        repo.store(price("SKU-1", "eu", 1000)).await.unwrap();
        repo.store(price("SKU-1", "us", 1200)).await.unwrap();

        let key = Key::from(("SKU-1", "us"));
        repo.update(
            MergePatch::new(json!({ "amount_cents": 1100, "note": "promo" })),
            &key,
        )
        .await
        .unwrap();

        let ctx = repo.find(&key).await.unwrap();
        let found = ctx.to_object().unwrap();
        ctx.release().await.unwrap();

        assert_eq!(found.amount_cents, 1100);
        assert_eq!(found.note.as_deref(), Some("promo"));
        assert!(found.active);

        let ctx = repo.find(&Key::from(("SKU-1", "eu"))).await.unwrap();
        assert_eq!(ctx.object().map(|p| p.amount_cents), Some(1000));
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_released_context_discards_uncommitted_changes() {
        let db = test_db().await;
        let repo = objects(&db);
        repo.store(TestObject::new(1, "a")).await.unwrap();

        let mut ctx = repo.find(&Key::from(1)).await.unwrap();
        ctx.update(|o: &mut TestObject| o.value = "lost".to_string()).unwrap();
        ctx.release().await.unwrap();

        let ctx = repo.find(&Key::from(1)).await.unwrap();
        assert_eq!(ctx.object().map(|o| o.value.as_str()), Some("a"));
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_path_update_rejects_type_change() {
        let db = test_db().await;
        let repo = objects(&db);
        repo.store(TestObject::new(1, "a")).await.unwrap();

        let err = repo
            .update_path("value", "42", UpdateType::Set, &Key::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_items_pages_and_saves() {
        let db = test_db().await;
        let repo = objects(&db)
            .with_options(RepositoryOptions::new().page_size(3))
            .unwrap();

        for id in 1..=7 {
            repo.store(TestObject::new(id, "old")).await.unwrap();
        }

        let mut items = repo.items().await.unwrap();
        let mut seen = Vec::new();
        while let Some(mut object) = items.next().await.unwrap() {
            seen.push(object.id);
            object.value = "new".to_string();
            items.save(&object).await.unwrap();
        }
        items.commit().await.unwrap();
        items.release().await.unwrap();

        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7]);

        let mut items = repo.items().await.unwrap();
        let all = items.collect_remaining().await.unwrap();
        items.release().await.unwrap();
        assert!(all.iter().all(|o| o.value == "new"));
    }

    async fn file_db(dir: &tempfile::TempDir) -> Database {
        let db = Database::new(DbConfig::new(dir.path().join("objects.db")).max_connections(4))
            .await
            .unwrap();
        sqlx::query("CREATE TABLE test_objects (id INTEGER PRIMARY KEY, value TEXT NOT NULL)")
            .execute(db.pool())
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_concurrent_batches_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir).await;

        let repo = objects(&db)
            .with_options(RepositoryOptions::new().batch_size(25).max_parallel_batches(4))
            .unwrap();

        let entities: Vec<TestObject> = (0..500).map(|id| TestObject::new(id, "x")).collect();
        let report = repo.store_all(entities).await.unwrap();

        assert_eq!(report.stored, 500);
        assert_eq!(report.chunks, 20);
        assert_eq!(repo.count().await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_commit_after_another_write_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir).await;
        let repo = objects(&db);
        repo.store(TestObject::new(1, "a")).await.unwrap();

        let mut ctx = repo.find(&Key::from(1)).await.unwrap();
        repo.store(TestObject::new(2, "b")).await.unwrap();
        ctx.update(|o: &mut TestObject| o.value = "changed".to_string()).unwrap();
        ctx.commit().await.unwrap();
        ctx.release().await.unwrap();

        let ctx = repo.find(&Key::from(1)).await.unwrap();
        assert_eq!(ctx.object().map(|o| o.value.as_str()), Some("changed"));
        ctx.release().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir).await;
        let repo = objects(&db);

        let entities: Vec<TestObject> = (0..8).map(|id| TestObject::new(id, "x")).collect();
        repo.store_all(entities).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|id| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.update(
                        move |o: &mut TestObject| o.value = format!("v{id}"),
                        &Key::from(id),
                    )
                    .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut items = repo.items().await.unwrap();
        let all = items.collect_remaining().await.unwrap();
        items.release().await.unwrap();
        assert_eq!(all.len(), 8);
        assert!(all.iter().all(|o| o.value == format!("v{}", o.id)));
    }

    #[tokio::test]
    async fn test_cursor_saves_after_another_write_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir).await;
        let repo = objects(&db);
        for id in 1..=3 {
            repo.store(TestObject::new(id, "old")).await.unwrap();
        }

        let mut items = repo.items().await.unwrap();
        let mut first = items.next().await.unwrap().unwrap();
        repo.store(TestObject::new(10, "other")).await.unwrap();

        first.value = "new".to_string();
        items.save(&first).await.unwrap();
        items.commit().await.unwrap();
        items.release().await.unwrap();

        let ctx = repo.find(&Key::from(first.id)).await.unwrap();
        assert_eq!(ctx.object().map(|o| o.value.as_str()), Some("new"));
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_cannot_change_key_column() {
        let db = test_db().await;
        let repo = objects(&db);
        repo.store(TestObject::new(1, "a")).await.unwrap();

        let err = repo
            .update_json(r#"{ "id": 2 }"#, UpdateType::Merge, &Key::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::KeyChanged { .. }));
        assert!(repo.exists(&Key::from(1)).await.unwrap());
        assert!(!repo.exists(&Key::from(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_committed_chunks() {
        let db = test_db().await;
        let repo = objects(&db)
            .with_options(RepositoryOptions::new().batch_size(5).max_parallel_batches(1))
            .unwrap();

        repo.store(TestObject::new(7, "taken")).await.unwrap();

        let entities: Vec<TestObject> = (0..15).map(|id| TestObject::new(id, "x")).collect();
        let err = repo.store_all(entities).await.unwrap_err();

        match err {
            RepoError::BatchFailed { committed, failures } => {
                assert_eq!(committed, 10);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
                assert!(failures[0].keys.contains(&Key::from(7)));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Chunk 1 rolled back as a unit; the pre-existing row is untouched
        assert!(!repo.exists(&Key::from(5)).await.unwrap());
        assert!(repo.exists(&Key::from(14)).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 11);
    }
}

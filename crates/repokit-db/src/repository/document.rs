//! # Document Repository
//!
//! Stores entities as JSON documents in the shared `documents` table, one
//! named collection per repository.
//!
//! ## Storage
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  documents                                                              │
//! │  ┌────────────┬──────────┬───────────────────────────┬───────┬───────┐ │
//! │  │ collection │ doc_key  │ body                      │created│updated│ │
//! │  ├────────────┼──────────┼───────────────────────────┼───────┼───────┤ │
//! │  │ customers  │ [7]      │ {"id":7,"name":"Ada"}     │  t0   │  t2   │ │
//! │  │ customers  │ [8]      │ {"id":8,"name":"Grace"}   │  t1   │  t1   │ │
//! │  │ rates      │ [1,"eu"] │ {"id":1,"region":"eu",..} │  t0   │  t0   │ │
//! │  └────────────┴──────────┴───────────────────────────┴───────┴───────┘ │
//! │                                                                         │
//! │  doc_key is Key::encode(): a JSON array of the key components.         │
//! │  store() is an upsert: created_at survives overwrites.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqliteConnection};

use repokit_core::validation::validate_collection_name;
use repokit_core::{Entity, Key, RepoResult};

use super::sql::SqlRepository;
use super::Collection;
use crate::error::DbResult;

/// Repository over one document collection.
pub type DocumentRepository<T> = SqlRepository<T, DocumentCollection>;

/// A named collection inside the `documents` table.
#[derive(Debug, Clone)]
pub struct DocumentCollection {
    name: String,
}

impl DocumentCollection {
    /// Creates a collection handle.
    ///
    /// ## Errors
    /// * `Configuration` - Empty or invalid collection name
    pub fn new(name: &str) -> RepoResult<Self> {
        validate_collection_name(name)?;
        Ok(DocumentCollection {
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl<T: Entity> Collection<T> for DocumentCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_arity(&self) -> Option<usize> {
        None
    }

    async fn fetch(&self, conn: &mut SqliteConnection, key: &Key) -> DbResult<Option<T>> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body FROM documents WHERE collection = ?1 AND doc_key = ?2",
        )
        .bind(&self.name)
        .bind(key.encode())
        .fetch_optional(&mut *conn)
        .await?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn exists(&self, conn: &mut SqliteConnection, key: &Key) -> DbResult<bool> {
        let found: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE collection = ?1 AND doc_key = ?2)",
        )
        .bind(&self.name)
        .bind(key.encode())
        .fetch_one(&mut *conn)
        .await?;

        Ok(found != 0)
    }

    async fn insert(&self, conn: &mut SqliteConnection, key: &Key, entity: &T) -> DbResult<()> {
        let body = serde_json::to_string(entity)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO documents (collection, doc_key, body, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (collection, doc_key)
            DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.name)
        .bind(key.encode())
        .bind(body)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn save(&self, conn: &mut SqliteConnection, key: &Key, entity: &T) -> DbResult<u64> {
        let body = serde_json::to_string(entity)?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET body = ?3, updated_at = ?4
            WHERE collection = ?1 AND doc_key = ?2
            "#,
        )
        .bind(&self.name)
        .bind(key.encode())
        .bind(body)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, conn: &mut SqliteConnection, key: &Key) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ?1 AND doc_key = ?2")
            .bind(&self.name)
            .bind(key.encode())
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
        let rows = sqlx::query(
            r#"
            SELECT rowid, body FROM documents
            WHERE collection = ?1 AND rowid > ?2
            ORDER BY rowid
            LIMIT ?3
            "#,
        )
        .bind(&self.name)
        .bind(after.unwrap_or(i64::MIN))
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| -> DbResult<(i64, T)> {
                let rowid: i64 = row.try_get("rowid")?;
                let body: String = row.try_get("body")?;
                Ok((rowid, serde_json::from_str(&body)?))
            })
            .collect()
    }

    async fn count(&self, conn: &mut SqliteConnection) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?1")
            .bind(&self.name)
            .fetch_one(&mut *conn)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

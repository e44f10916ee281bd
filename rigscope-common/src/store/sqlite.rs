//! SQLite-backed document store
//!
//! One table per collection with the natural-key identifier as primary key.
//! `INSERT ... ON CONFLICT(id) DO NOTHING` gives insert-if-absent semantics:
//! two concurrent inserts of the same id leave exactly one row.

use super::{Document, DocumentStore, InsertOutcome, StoreError};
use crate::db::table_name;
use crate::ids::EntityKind;
use async_trait::async_trait;
use sqlx::SqlitePool;

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Wrap a pool whose schema was created by [`crate::db::create_schema`]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode(kind: EntityKind, id: &str, body: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
        collection: kind.collection(),
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn encode(kind: EntityKind, doc: &Document) -> Result<String, StoreError> {
    serde_json::to_string(&doc.body).map_err(|e| StoreError::Corrupt {
        collection: kind.collection(),
        id: doc.id.clone(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Document>, StoreError> {
        let sql = format!("SELECT body FROM {} WHERE id = ?", table_name(kind));
        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((body,)) => Ok(Some(Document {
                id: id.to_string(),
                body: decode(kind, id, &body)?,
            })),
            None => Ok(None),
        }
    }

    async fn insert(&self, kind: EntityKind, doc: &Document) -> Result<InsertOutcome, StoreError> {
        let body = encode(kind, doc)?;
        let sql = format!(
            "INSERT INTO {} (id, body) VALUES (?, ?) ON CONFLICT(id) DO NOTHING",
            table_name(kind)
        );
        let result = sqlx::query(&sql)
            .bind(&doc.id)
            .bind(body)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(collection = kind.collection(), id = %doc.id, "Insert hit existing key");
            Ok(InsertOutcome::DuplicateKey)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn replace(&self, kind: EntityKind, doc: &Document) -> Result<bool, StoreError> {
        let body = encode(kind, doc)?;
        let sql = format!(
            "UPDATE {} SET body = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            table_name(kind)
        );
        let result = sqlx::query(&sql)
            .bind(body)
            .bind(&doc.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table_name(kind));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }
}

//! Document store interface
//!
//! The ingestion core treats persistence as a key/value-queryable document
//! store: documents are looked up by primary key only, and inserts are
//! insert-if-absent against that key. Correctness under concurrent
//! ingestion relies on the store's unique-key constraint, not on any
//! client-side locking.

pub mod memory;
#[cfg(feature = "sqlx")]
pub mod sqlite;

pub use memory::MemoryDocumentStore;
#[cfg(feature = "sqlx")]
pub use sqlite::SqliteDocumentStore;

use crate::ids::EntityKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// A persisted document: primary key plus JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub body: serde_json::Value,
}

/// Result of an insert-if-absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The document was written
    Inserted,
    /// A document with the same primary key already exists; nothing written
    DuplicateKey,
}

/// Store access errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Transient connectivity or timeout fault; the caller may retry
    #[error("Document store unavailable: {0}")]
    Unavailable(String),

    /// Stored document could not be decoded
    #[error("Corrupt document {collection}/{id}: {reason}")]
    Corrupt {
        collection: &'static str,
        id: String,
        reason: String,
    },
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Key/value-queryable document store, one collection per entity kind
///
/// Implementations must be safe for concurrent use without external locking.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Look up a document by primary key
    async fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert a document unless one with the same primary key exists
    async fn insert(&self, kind: EntityKind, doc: &Document) -> Result<InsertOutcome, StoreError>;

    /// Overwrite an existing document; returns `false` if it was absent
    ///
    /// Only deliberate recomputation passes use this.
    async fn replace(&self, kind: EntityKind, doc: &Document) -> Result<bool, StoreError>;

    /// Number of documents in a collection
    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError>;
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    async fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Document>, StoreError> {
        (**self).find_by_id(kind, id).await
    }

    async fn insert(&self, kind: EntityKind, doc: &Document) -> Result<InsertOutcome, StoreError> {
        (**self).insert(kind, doc).await
    }

    async fn replace(&self, kind: EntityKind, doc: &Document) -> Result<bool, StoreError> {
        (**self).replace(kind, doc).await
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        (**self).count(kind).await
    }
}

//! In-memory document store
//!
//! Same insert-if-absent contract as the SQLite adapter. Used for dry runs
//! and tests; counts successful inserts per collection and can simulate an
//! unavailable backend.

use super::{Document, DocumentStore, InsertOutcome, StoreError};
use crate::ids::EntityKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Collections {
    documents: HashMap<EntityKind, HashMap<String, serde_json::Value>>,
    inserts: HashMap<EntityKind, u64>,
}

/// Process-local document store
#[derive(Default)]
pub struct MemoryDocumentStore {
    state: RwLock<Collections>,
    unavailable: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful inserts into a collection
    pub async fn insert_count(&self, kind: EntityKind) -> u64 {
        self.state.read().await.inserts.get(&kind).copied().unwrap_or(0)
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Document>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .documents
            .get(&kind)
            .and_then(|collection| collection.get(id))
            .map(|body| Document {
                id: id.to_string(),
                body: body.clone(),
            }))
    }

    async fn insert(&self, kind: EntityKind, doc: &Document) -> Result<InsertOutcome, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let collection = state.documents.entry(kind).or_default();
        if collection.contains_key(&doc.id) {
            return Ok(InsertOutcome::DuplicateKey);
        }
        collection.insert(doc.id.clone(), doc.body.clone());
        *state.inserts.entry(kind).or_insert(0) += 1;
        Ok(InsertOutcome::Inserted)
    }

    async fn replace(&self, kind: EntityKind, doc: &Document) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.documents.get_mut(&kind).and_then(|c| c.get_mut(&doc.id)) {
            Some(body) => {
                *body = doc.body.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.documents.get(&kind).map(|c| c.len() as u64).unwrap_or(0))
    }
}

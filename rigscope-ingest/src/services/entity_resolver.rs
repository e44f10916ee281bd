//! Idempotent find-or-create of hierarchy entities
//!
//! **Algorithm:**
//! 1. Compute the identifier from the natural key
//! 2. Look the identifier up by primary key (no business-field filters)
//! 3. If found, return it
//! 4. Otherwise build the entity and insert-if-absent under that key
//! 5. On a duplicate-key outcome another writer won the race: re-read and
//!    return the winner's identifier
//!
//! Two concurrent resolutions of the same key therefore converge on one
//! document without any client-side locking.

use crate::error::ResolveError;
use rigscope_common::entities::{ConstructionError, Entity};
use rigscope_common::{DocumentStore, InsertOutcome, NaturalKey};
use std::sync::Arc;
use tracing::debug;

/// How a resolution was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Document already existed
    Existing,
    /// This call inserted the document
    Created,
    /// Another writer inserted the same key first
    RaceLost,
}

/// Resolved identifier plus how it was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: String,
    pub outcome: ResolutionOutcome,
}

/// Find-or-create resolver over an injected document store
pub struct EntityResolver<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for EntityResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: DocumentStore + ?Sized> EntityResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Identifier of the existing document for `key`, if any
    pub async fn lookup(&self, key: &NaturalKey) -> Result<Option<String>, ResolveError> {
        let id = key.id();
        let found = self.store.find_by_id(key.kind(), &id).await?;
        Ok(found.map(|doc| doc.id))
    }

    /// Return the existing identifier for `key`, or build and insert the entity
    ///
    /// `build` is only invoked when no document exists.
    pub async fn resolve<E, F>(&self, key: &NaturalKey, build: F) -> Result<Resolution, ResolveError>
    where
        E: Entity,
        F: FnOnce() -> Result<E, ConstructionError>,
    {
        let kind = key.kind();
        let id = key.id();

        if self.store.find_by_id(kind, &id).await?.is_some() {
            return Ok(Resolution {
                id,
                outcome: ResolutionOutcome::Existing,
            });
        }

        let construction_failed = |source: ConstructionError| ResolveError::ConstructionFailed {
            kind,
            id: id.clone(),
            source,
        };

        let entity = build().map_err(construction_failed)?;
        if E::KIND != kind || entity.id() != id {
            return Err(construction_failed(ConstructionError::IdMismatch {
                kind: E::KIND,
                built: entity.id().to_string(),
                expected: id.clone(),
            }));
        }

        let doc = entity
            .to_document()
            .map_err(|e| ResolveError::CorruptDocument(format!("{} {}: {}", kind, id, e)))?;

        match self.store.insert(kind, &doc).await? {
            InsertOutcome::Inserted => {
                debug!(collection = kind.collection(), id = %id, "Created document");
                Ok(Resolution {
                    id,
                    outcome: ResolutionOutcome::Created,
                })
            }
            InsertOutcome::DuplicateKey => {
                debug!(
                    collection = kind.collection(),
                    id = %id,
                    "Concurrent insert won; reading back existing document"
                );
                match self.store.find_by_id(kind, &id).await? {
                    Some(existing) => Ok(Resolution {
                        id: existing.id,
                        outcome: ResolutionOutcome::RaceLost,
                    }),
                    None => Err(ResolveError::StoreUnavailable(format!(
                        "{} {} reported as duplicate but not readable",
                        kind, id
                    ))),
                }
            }
        }
    }
}

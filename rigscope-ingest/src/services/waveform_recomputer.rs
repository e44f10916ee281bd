//! Waveform summary recomputation
//!
//! Re-reads the capture file of an existing Waveform document, recomputes
//! its summary with the current signal settings and replaces the stored
//! document. This is the only path that rewrites a Waveform after ingestion.

use crate::error::{ResolveError, SignalError};
use crate::services::waveform_processor::WaveformProcessor;
use rigscope_common::entities::Waveform;
use rigscope_common::{DocumentStore, Entity, EntityKind, StoreError};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of recomputing one waveform
#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeOutcome {
    /// Summary changed and the document was replaced
    Updated,
    /// Recomputed summary equals the stored one; nothing written
    Unchanged,
    /// No Waveform document with that id
    NotFound,
    /// Capture file could not be processed; stored document untouched
    Failed(SignalError),
    /// Stored document could not be read back; left as is
    Corrupt(String),
}

pub struct WaveformRecomputer<S: ?Sized> {
    store: Arc<S>,
    processor: WaveformProcessor,
}

impl<S: DocumentStore + ?Sized> WaveformRecomputer<S> {
    pub fn new(store: Arc<S>, processor: WaveformProcessor) -> Self {
        Self { store, processor }
    }

    /// Recompute the summary of waveform `id`
    ///
    /// Only a store outage is returned as `Err`; every other problem is an
    /// outcome for this id alone.
    pub async fn recompute(&self, id: &str) -> Result<RecomputeOutcome, ResolveError> {
        let doc = match self.store.find_by_id(EntityKind::Waveform, id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return Ok(RecomputeOutcome::NotFound),
            Err(StoreError::Unavailable(msg)) => return Err(ResolveError::StoreUnavailable(msg)),
            Err(corrupt @ StoreError::Corrupt { .. }) => {
                return Ok(self.corrupt(id, corrupt.to_string()));
            }
        };

        let mut waveform: Waveform = match serde_json::from_value(doc.body) {
            Ok(waveform) => waveform,
            Err(e) => return Ok(self.corrupt(id, e.to_string())),
        };

        let summary = match self.processor.summarize_blocking(waveform.source.clone()).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(id = %id, path = %waveform.source.location.display(), error = %e, "Recompute failed");
                return Ok(RecomputeOutcome::Failed(e));
            }
        };

        if summary == waveform.summary {
            return Ok(RecomputeOutcome::Unchanged);
        }
        waveform.summary = summary;

        let doc = match waveform.to_document() {
            Ok(doc) => doc,
            Err(e) => return Ok(self.corrupt(id, e.to_string())),
        };

        if self.store.replace(EntityKind::Waveform, &doc).await? {
            info!(id = %id, "Waveform summary recomputed");
            Ok(RecomputeOutcome::Updated)
        } else {
            Ok(RecomputeOutcome::NotFound)
        }
    }

    fn corrupt(&self, id: &str, reason: String) -> RecomputeOutcome {
        warn!(id = %id, reason = %reason, "Stored waveform is unreadable, skipping");
        RecomputeOutcome::Corrupt(reason)
    }

    /// Recompute several waveforms in order, stopping at the first store outage
    pub async fn recompute_all(
        &self,
        ids: &[String],
    ) -> Result<Vec<(String, RecomputeOutcome)>, ResolveError> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            outcomes.push((id.clone(), self.recompute(id).await?));
        }
        Ok(outcomes)
    }
}

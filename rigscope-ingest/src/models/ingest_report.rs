//! Batch ingestion results
//!
//! Every input row gets a [`RowReport`]: the identifiers resolved for it and,
//! when something failed, the reason per hierarchy level. Rows are never
//! dropped; a rejected row keeps whatever ancestor identifiers did resolve.

use crate::error::{IngestError, RowError};
use crate::models::batch::RawBatch;
use crate::services::entity_resolver::ResolutionOutcome;
use chrono::{DateTime, Utc};
use rigscope_common::EntityKind;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Header of the rejection-reason column appended to annotated batches
pub const INGEST_ERROR_COLUMN: &str = "ingest_error";

/// Per-row ingestion result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowReport {
    pub index: usize,
    /// Resolved identifier per level
    pub ids: BTreeMap<EntityKind, String>,
    /// Failure per level; children of a failed level carry `ParentFailed`
    pub errors: BTreeMap<EntityKind, RowError>,
}

impl RowReport {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn id(&self, kind: EntityKind) -> Option<&str> {
        self.ids.get(&kind).map(String::as_str)
    }

    pub fn is_resolved(&self) -> bool {
        self.errors.is_empty()
    }

    /// Root cause: the failure at the earliest level
    pub fn rejection(&self) -> Option<(EntityKind, &RowError)> {
        self.errors.iter().next().map(|(kind, err)| (*kind, err))
    }

    pub fn resolve(&mut self, kind: EntityKind, id: String) {
        self.ids.insert(kind, id);
    }

    pub fn reject(&mut self, kind: EntityKind, error: RowError) {
        self.errors.entry(kind).or_insert(error);
    }
}

/// Resolution counters for one hierarchy level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelStats {
    /// Distinct natural keys attempted
    pub partitions: usize,
    pub created: usize,
    pub existing: usize,
    pub race_lost: usize,
    /// Partitions that failed (key, construction, decode, cancellation)
    pub failed: usize,
    /// Rows rejected at this level, including parent failures
    pub rows_rejected: usize,
    /// Rows that joined a partition whose representative has other parent ids
    pub parent_conflicts: usize,
}

impl LevelStats {
    pub fn record(&mut self, outcome: ResolutionOutcome) {
        match outcome {
            ResolutionOutcome::Created => self.created += 1,
            ResolutionOutcome::Existing => self.existing += 1,
            ResolutionOutcome::RaceLost => self.race_lost += 1,
        }
    }
}

/// Result of ingesting one batch
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows: Vec<RowReport>,
    pub levels: BTreeMap<EntityKind, LevelStats>,
    /// Cancellation was requested before the batch finished
    pub cancelled: bool,
}

impl IngestReport {
    pub fn resolved_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_resolved()).count()
    }

    pub fn rejected_count(&self) -> usize {
        self.rows.len() - self.resolved_count()
    }

    pub fn level(&self, kind: EntityKind) -> LevelStats {
        self.levels.get(&kind).copied().unwrap_or_default()
    }

    /// Documents inserted by this batch across all levels
    pub fn created_count(&self) -> usize {
        self.levels.values().map(|s| s.created).sum()
    }

    /// Copy of `batch` with one foreign-key column per level plus
    /// [`INGEST_ERROR_COLUMN`]
    ///
    /// Existing columns with the same names are overwritten, so an annotated
    /// batch can be ingested again.
    pub fn annotate(&self, batch: &RawBatch) -> Result<RawBatch, IngestError> {
        if batch.len() != self.rows.len() {
            return Err(IngestError::Batch(format!(
                "report has {} rows but batch has {}",
                self.rows.len(),
                batch.len()
            )));
        }

        let mut annotated = batch.clone();
        for kind in EntityKind::ALL {
            let values = self
                .rows
                .iter()
                .map(|r| r.id(kind).unwrap_or_default().to_string())
                .collect();
            annotated.set_column(kind.fk_column(), values)?;
        }

        let reasons = self
            .rows
            .iter()
            .map(|r| match r.rejection() {
                Some((kind, err)) => format!("{}: {}", kind, err),
                None => String::new(),
            })
            .collect();
        annotated.set_column(INGEST_ERROR_COLUMN, reasons)?;

        Ok(annotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(rows: Vec<RowReport>) -> IngestReport {
        IngestReport {
            batch_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            rows,
            levels: BTreeMap::new(),
            cancelled: false,
        }
    }

    #[test]
    fn test_rejection_is_earliest_level() {
        let mut row = RowReport::new(0);
        row.reject(EntityKind::Capture, RowError::ParentFailed(EntityKind::Rework));
        row.reject(EntityKind::Rework, RowError::Cancelled);
        row.reject(EntityKind::Rework, RowError::ParentFailed(EntityKind::Pba));

        assert_eq!(row.rejection(), Some((EntityKind::Rework, &RowError::Cancelled)));
        assert!(!row.is_resolved());
    }

    #[test]
    fn test_annotate_appends_fk_columns_and_reason() {
        let batch = RawBatch::new(
            vec!["project".to_string()],
            vec![vec!["Falcon".to_string()], vec!["".to_string()]],
        );

        let mut ok = RowReport::new(0);
        ok.resolve(EntityKind::Project, "falcon".to_string());
        let mut bad = RowReport::new(1);
        bad.reject(EntityKind::Project, RowError::Cancelled);

        let annotated = report(vec![ok, bad]).annotate(&batch).unwrap();

        assert_eq!(annotated.headers().len(), 1 + EntityKind::ALL.len() + 1);
        assert_eq!(annotated.headers()[1], "project_id");
        assert_eq!(annotated.headers().last().unwrap(), INGEST_ERROR_COLUMN);
        assert_eq!(annotated.rows()[0][1], "falcon");
        assert_eq!(annotated.rows()[0].last().unwrap(), "");
        assert_eq!(annotated.rows()[1][1], "");
        assert_eq!(annotated.rows()[1].last().unwrap(), "PROJECT: Ingestion cancelled");

        // Re-annotating overwrites instead of duplicating columns
        let again = report(vec![RowReport::new(0), RowReport::new(1)])
            .annotate(&annotated)
            .unwrap();
        assert_eq!(again.headers().len(), annotated.headers().len());
    }

    #[test]
    fn test_annotate_rejects_row_count_mismatch() {
        let batch = RawBatch::new(vec!["project".to_string()], vec![vec!["a".to_string()]]);
        assert!(report(Vec::new()).annotate(&batch).is_err());
    }
}

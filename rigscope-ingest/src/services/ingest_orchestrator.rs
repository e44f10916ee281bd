//! Batch ingestion orchestrator
//!
//! Drives entity resolution across a parsed batch, level by level:
//!
//! PROJECT → PBA → REWORK → SUBMISSION → RUNID → AUTOMATIONTEST → DATACAPTURE → WAVEFORM
//!
//! Within a level, rows are partitioned by natural-key identifier and each
//! distinct partition is resolved exactly once; the resulting identifier is
//! broadcast to every row of the partition. Partitions of one level are
//! independent and run concurrently (bounded by `resolve_workers`, or
//! `decode_workers` for the waveform level). Levels run strictly in order,
//! since construction at a level needs the parent identifiers.
//!
//! # Failure isolation
//! - A bad partition only rejects its own rows; sibling partitions continue
//! - Rows whose parent level failed are rejected with `ParentFailed`
//! - Store outages finish the level's in-flight work, then abort the batch
//!   with [`IngestError::StoreUnavailable`] (ingestion is idempotent, so the
//!   caller retries the whole batch)
//!
//! # Cancellation
//! The token is checked before each partition starts and before each
//! waveform decode. In-flight inserts always complete; rows of partitions
//! that never started are rejected as `Cancelled`.

use crate::error::{IngestError, ResolveError, RowError};
use crate::models::batch::{parse_batch, ParsedRow, RawBatch};
use crate::models::ingest_report::{IngestReport, LevelStats, RowReport};
use crate::services::entity_resolver::{EntityResolver, Resolution, ResolutionOutcome};
use crate::services::waveform_processor::{SignalSettings, WaveformProcessor};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use rigscope_common::config::{ColumnNames, IngestSettings};
use rigscope_common::entities::{
    AutomationTest, Capture, ConstructionError, Pba, Project, Rework, Submission, TestRun, Waveform,
};
use rigscope_common::{DocumentStore, EntityKind, NaturalKey};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why one partition did not resolve
#[derive(Debug)]
enum PartitionFailure {
    /// Rejects the partition's rows; the batch continues
    Row(RowError),
    /// Aborts the batch once the level drains
    StoreUnavailable(String),
}

impl From<RowError> for PartitionFailure {
    fn from(err: RowError) -> Self {
        PartitionFailure::Row(err)
    }
}

impl From<ResolveError> for PartitionFailure {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::StoreUnavailable(msg) => PartitionFailure::StoreUnavailable(msg),
            ResolveError::InvalidNaturalKey(e) => PartitionFailure::Row(RowError::InvalidNaturalKey(e)),
            ResolveError::ConstructionFailed { kind, source, .. } => {
                PartitionFailure::Row(RowError::ConstructionFailed {
                    kind,
                    reason: source.to_string(),
                })
            }
            ResolveError::CorruptDocument(msg) => PartitionFailure::Row(RowError::CorruptDocument(msg)),
        }
    }
}

/// Rows sharing one natural key at one level
struct Partition<'a> {
    key: NaturalKey,
    /// Lowest-index row; supplies construction fields and parent ids
    representative: &'a ParsedRow,
    parents: BTreeMap<EntityKind, String>,
    rows: Vec<usize>,
}

/// Ingestion orchestrator over an injected document store
pub struct IngestOrchestrator<S: ?Sized> {
    resolver: EntityResolver<S>,
    processor: WaveformProcessor,
    columns: ColumnNames,
    resolve_workers: usize,
    decode_workers: usize,
}

impl<S: DocumentStore + ?Sized> IngestOrchestrator<S> {
    pub fn new(store: Arc<S>, settings: &IngestSettings, columns: ColumnNames) -> Self {
        let decode_workers = match settings.decode_workers {
            0 => num_cpus::get(),
            n => n,
        };

        Self {
            resolver: EntityResolver::new(store),
            processor: WaveformProcessor::new(SignalSettings::from(settings)),
            columns,
            resolve_workers: settings.resolve_workers.max(1),
            decode_workers,
        }
    }

    pub fn resolver(&self) -> &EntityResolver<S> {
        &self.resolver
    }

    /// Ingest one batch
    ///
    /// Returns a report covering every input row. Only batch-level faults
    /// (unusable header row, store outage) are returned as `Err`.
    pub async fn ingest(
        &self,
        batch: &RawBatch,
        cancel_token: &CancellationToken,
    ) -> Result<IngestReport, IngestError> {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(batch_id = %batch_id, rows = batch.len(), "Starting batch ingestion");

        let rows = parse_batch(batch, &self.columns)?;
        let processor = match batch.source_dir() {
            Some(dir) => self.processor.clone().with_base_dir(dir),
            None => self.processor.clone(),
        };

        let mut reports: Vec<RowReport> = rows.iter().map(|r| RowReport::new(r.index)).collect();
        let mut levels = BTreeMap::new();

        for kind in EntityKind::ALL {
            let stats = self
                .resolve_level(kind, &rows, &mut reports, &processor, cancel_token)
                .await
                .map_err(|e| {
                    warn!(batch_id = %batch_id, level = %kind, error = %e, "Batch aborted");
                    e
                })?;

            info!(
                batch_id = %batch_id,
                level = %kind,
                partitions = stats.partitions,
                created = stats.created,
                existing = stats.existing,
                race_lost = stats.race_lost,
                failed = stats.failed,
                rows_rejected = stats.rows_rejected,
                parent_conflicts = stats.parent_conflicts,
                "Level resolved"
            );
            levels.insert(kind, stats);
        }

        for report in &reports {
            if let Some((level, error)) = report.rejection() {
                warn!(batch_id = %batch_id, row = report.index, level = %level, error = %error, "Row rejected");
            }
        }

        let report = IngestReport {
            batch_id,
            started_at,
            finished_at: Utc::now(),
            rows: reports,
            levels,
            cancelled: cancel_token.is_cancelled(),
        };

        info!(
            batch_id = %batch_id,
            resolved = report.resolved_count(),
            rejected = report.rejected_count(),
            created = report.created_count(),
            cancelled = report.cancelled,
            "Batch ingestion complete"
        );
        Ok(report)
    }

    async fn resolve_level(
        &self,
        kind: EntityKind,
        rows: &[ParsedRow],
        reports: &mut [RowReport],
        processor: &WaveformProcessor,
        cancel_token: &CancellationToken,
    ) -> Result<LevelStats, IngestError> {
        let mut stats = LevelStats::default();
        let partitions = partition_level(kind, rows, reports, &mut stats);
        stats.partitions = partitions.len();

        let workers = match kind {
            EntityKind::Waveform => self.decode_workers,
            _ => self.resolve_workers,
        };

        // Futures are built up front so the stream holds no borrowing closure
        let pending: Vec<_> = partitions
            .iter()
            .enumerate()
            .map(|(i, partition)| self.run_partition(i, kind, partition, processor, cancel_token))
            .collect();
        let results: Vec<(usize, Result<Resolution, PartitionFailure>)> =
            stream::iter(pending).buffer_unordered(workers).collect().await;

        let mut outage = None;
        for (i, result) in results {
            let partition = &partitions[i];
            match result {
                Ok(resolution) => {
                    stats.record(resolution.outcome);
                    for &row in &partition.rows {
                        reports[row].resolve(kind, resolution.id.clone());
                    }
                }
                Err(PartitionFailure::Row(error)) => {
                    stats.failed += 1;
                    stats.rows_rejected += partition.rows.len();
                    if error != RowError::Cancelled {
                        debug!(level = %kind, id = %partition.key.id(), error = %error, "Partition rejected");
                    }
                    for &row in &partition.rows {
                        reports[row].reject(kind, error.clone());
                    }
                }
                Err(PartitionFailure::StoreUnavailable(msg)) => {
                    stats.failed += 1;
                    outage.get_or_insert(msg);
                }
            }
        }

        match outage {
            Some(msg) => Err(IngestError::StoreUnavailable(msg)),
            None => Ok(stats),
        }
    }

    async fn run_partition(
        &self,
        i: usize,
        kind: EntityKind,
        partition: &Partition<'_>,
        processor: &WaveformProcessor,
        cancel_token: &CancellationToken,
    ) -> (usize, Result<Resolution, PartitionFailure>) {
        if cancel_token.is_cancelled() {
            return (i, Err(PartitionFailure::Row(RowError::Cancelled)));
        }
        (i, self.resolve_partition(kind, partition, processor, cancel_token).await)
    }

    async fn resolve_partition(
        &self,
        kind: EntityKind,
        partition: &Partition<'_>,
        processor: &WaveformProcessor,
        cancel_token: &CancellationToken,
    ) -> Result<Resolution, PartitionFailure> {
        let row = partition.representative;
        let key = &partition.key;
        let parent = |kind: EntityKind| {
            partition
                .parents
                .get(&kind)
                .map(String::as_str)
                .unwrap_or_default()
        };

        let resolution = match kind {
            EntityKind::Project => {
                self.resolver
                    .resolve(key, || Project::new(row.field("project")))
                    .await?
            }
            EntityKind::Pba => {
                self.resolver
                    .resolve(key, || Pba::new(row.field("pba"), parent(EntityKind::Project)))
                    .await?
            }
            EntityKind::Rework => {
                self.resolver
                    .resolve(key, || Rework::new(row.field("rework"), parent(EntityKind::Pba)))
                    .await?
            }
            EntityKind::Submission => {
                self.resolver
                    .resolve(key, || {
                        Submission::new(
                            row.field("pba"),
                            row.field("rework"),
                            row.field("serial"),
                            parent(EntityKind::Rework),
                        )
                    })
                    .await?
            }
            EntityKind::RunId => {
                self.resolver
                    .resolve(key, || TestRun::new(row.field("run"), parent(EntityKind::Submission)))
                    .await?
            }
            EntityKind::AutomationTest => {
                self.resolver
                    .resolve(key, || AutomationTest::new(row.field("test_category")))
                    .await?
            }
            EntityKind::Capture => {
                let NaturalKey::Capture { kind: variant, .. } = key else {
                    return Err(RowError::ConstructionFailed {
                        kind,
                        reason: format!("{} is not a capture key", key),
                    }
                    .into());
                };
                self.resolver
                    .resolve(key, || {
                        Capture::new(
                            *variant,
                            row.field("capture"),
                            parent(EntityKind::RunId),
                            parent(EntityKind::AutomationTest),
                        )
                    })
                    .await?
            }
            EntityKind::Waveform => {
                // Decoding is the expensive part; skip it for known waveforms
                if let Some(id) = self.resolver.lookup(key).await? {
                    return Ok(Resolution {
                        id,
                        outcome: ResolutionOutcome::Existing,
                    });
                }

                let mut source = match &row.source {
                    Some(Ok(source)) => source.clone(),
                    Some(Err(e)) => return Err(e.clone().into()),
                    None => {
                        return Err(RowError::InvalidField {
                            field: "location".to_string(),
                            reason: "waveform row without acquisition metadata".to_string(),
                        }
                        .into())
                    }
                };

                if cancel_token.is_cancelled() {
                    return Err(RowError::Cancelled.into());
                }
                // Stored locations are absolute so recomputation works from anywhere
                source.location = processor.resolve_location(&source.location);

                let summary = processor.summarize_blocking(source.clone()).await.map_err(|e| {
                    warn!(
                        id = %key.id(),
                        path = %source.location.display(),
                        error = %e,
                        "Waveform decode failed"
                    );
                    RowError::Signal(e)
                })?;

                let capture_id = parent(EntityKind::Capture);
                self.resolver
                    .resolve(key, || -> Result<Waveform, ConstructionError> {
                        Waveform::new(key, capture_id, source, summary)
                    })
                    .await?
            }
        };

        Ok(resolution)
    }
}

/// Group rows of one level by identifier, rejecting rows that cannot take part
fn partition_level<'a>(
    kind: EntityKind,
    rows: &'a [ParsedRow],
    reports: &mut [RowReport],
    stats: &mut LevelStats,
) -> Vec<Partition<'a>> {
    let mut partitions: Vec<Partition<'a>> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for (row, report) in rows.iter().zip(reports.iter_mut()) {
        let Some(key) = row.key(kind) else {
            continue;
        };

        if let Some(failure) = parent_failure(kind, report) {
            report.reject(kind, failure);
            stats.rows_rejected += 1;
            continue;
        }

        let key = match key {
            Ok(key) => key,
            Err(e) => {
                report.reject(kind, e.clone());
                stats.rows_rejected += 1;
                continue;
            }
        };

        let parents: BTreeMap<EntityKind, String> = kind
            .parents()
            .iter()
            .filter_map(|p| report.id(*p).map(|id| (*p, id.to_string())))
            .collect();

        let id = key.id();
        match by_id.get(&id) {
            Some(&p) => {
                let partition = &mut partitions[p];
                if partition.parents != parents {
                    // The document keeps the representative's parents
                    stats.parent_conflicts += 1;
                    warn!(
                        level = %kind,
                        id = %id,
                        row = row.index,
                        representative = partition.representative.index,
                        "Rows sharing an identifier disagree on parent ids"
                    );
                }
                partition.rows.push(row.index);
            }
            None => {
                by_id.insert(id, partitions.len());
                partitions.push(Partition {
                    key: key.clone(),
                    representative: row,
                    parents,
                    rows: vec![row.index],
                });
            }
        }
    }

    partitions
}

/// Rejection inherited from a parent level, if any parent did not resolve
fn parent_failure(kind: EntityKind, report: &RowReport) -> Option<RowError> {
    kind.parents().iter().find_map(|parent| {
        if report.id(*parent).is_some() {
            return None;
        }
        Some(match report.errors.get(parent) {
            Some(RowError::Cancelled) => RowError::Cancelled,
            _ => RowError::ParentFailed(*parent),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigscope_common::store::MemoryDocumentStore;

    const HEADER: &str = "project,pba,rework,serial_number,runid,test_category,capture";

    fn batch(rows: &[&str]) -> RawBatch {
        let text = format!("{}\n{}\n", HEADER, rows.join("\n"));
        RawBatch::from_reader(text.as_bytes()).unwrap()
    }

    fn orchestrator(store: Arc<MemoryDocumentStore>) -> IngestOrchestrator<MemoryDocumentStore> {
        IngestOrchestrator::new(store, &IngestSettings::default(), ColumnNames::default())
    }

    #[tokio::test]
    async fn test_shared_rework_is_inserted_once() {
        let store = Arc::new(MemoryDocumentStore::new());
        let b = batch(&[
            "Falcon,K31123-003,0,SN01,1200,Thermal,1",
            "Falcon,K31123-003,0.0,SN02,1201,Thermal,1",
        ]);

        let report = orchestrator(store.clone())
            .ingest(&b, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.resolved_count(), 2);
        for row in &report.rows {
            assert_eq!(row.id(EntityKind::Rework), Some("K31123-003_REWORK_0"));
        }
        assert_eq!(store.insert_count(EntityKind::Rework).await, 1);
        assert_eq!(store.insert_count(EntityKind::Submission).await, 2);
        assert_eq!(report.level(EntityKind::Rework).partitions, 1);
    }

    #[tokio::test]
    async fn test_bad_key_does_not_block_siblings() {
        let store = Arc::new(MemoryDocumentStore::new());
        let b = batch(&[
            "Falcon,K31123-003,zero,SN01,1200,Thermal,1",
            "Falcon,K31123-004,1,SN02,1201,Thermal,1",
        ]);

        let report = orchestrator(store.clone())
            .ingest(&b, &CancellationToken::new())
            .await
            .unwrap();

        let bad = &report.rows[0];
        assert_eq!(bad.id(EntityKind::Pba), Some("K31123-003"));
        assert!(bad.id(EntityKind::Rework).is_none());
        assert!(matches!(
            bad.rejection(),
            Some((EntityKind::Rework, RowError::InvalidNaturalKey(_)))
        ));
        assert_eq!(
            bad.errors.get(&EntityKind::Submission),
            Some(&RowError::ParentFailed(EntityKind::Rework))
        );
        // AutomationTest does not depend on the rework chain
        assert_eq!(bad.id(EntityKind::AutomationTest), Some("thermal"));
        assert_eq!(
            bad.errors.get(&EntityKind::Capture),
            Some(&RowError::ParentFailed(EntityKind::RunId))
        );

        assert!(report.rows[1].is_resolved());
        assert_eq!(report.rows[1].id(EntityKind::Capture), Some("EthAgent_1201_thermal_1"));
    }

    #[tokio::test]
    async fn test_pre_cancelled_batch_writes_nothing() {
        let store = Arc::new(MemoryDocumentStore::new());
        let token = CancellationToken::new();
        token.cancel();

        let report = orchestrator(store.clone())
            .ingest(&batch(&["Falcon,K31123-003,0,SN01,1200,Thermal,1"]), &token)
            .await
            .unwrap();

        assert!(report.cancelled);
        let row = &report.rows[0];
        assert_eq!(row.rejection(), Some((EntityKind::Project, &RowError::Cancelled)));
        assert_eq!(row.errors.get(&EntityKind::Capture), Some(&RowError::Cancelled));
        for kind in EntityKind::ALL {
            assert_eq!(store.count(kind).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_store_outage_aborts_batch() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_unavailable(true);

        let err = orchestrator(store)
            .ingest(&batch(&["Falcon,K31123-003,0,SN01,1200,Thermal,1"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_run_shared_across_submissions_is_flagged() {
        let store = Arc::new(MemoryDocumentStore::new());
        let b = batch(&[
            "Falcon,K31123-003,0,SN01,1200,Thermal,1",
            "Falcon,K31123-003,0,SN02,1200,Thermal,2",
        ]);

        let report = orchestrator(store.clone())
            .ingest(&b, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.resolved_count(), 2);
        assert_eq!(report.rows[0].id(EntityKind::RunId), Some("1200"));
        assert_eq!(report.rows[1].id(EntityKind::RunId), Some("1200"));
        let runs = report.level(EntityKind::RunId);
        assert_eq!(runs.partitions, 1);
        assert_eq!(runs.parent_conflicts, 1);
        assert_eq!(report.level(EntityKind::Submission).parent_conflicts, 0);

        // The run document belongs to the first row's submission
        let doc = store.find_by_id(EntityKind::RunId, "1200").await.unwrap().unwrap();
        assert_eq!(doc.body["submission_id"], "SN01_K31123-003_0");
    }

    #[tokio::test]
    async fn test_ingest_runs_on_a_spawned_task() {
        let store = Arc::new(MemoryDocumentStore::new());
        let orchestrator = Arc::new(orchestrator(store.clone()));
        let b = batch(&[
            "Falcon,K31123-003,0,SN01,1200,Thermal,1",
            "Falcon,K31123-004,0,SN02,1201,Thermal,1",
        ]);

        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.ingest(&b, &CancellationToken::new()).await }
        });

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.resolved_count(), 2);
        assert_eq!(store.count(EntityKind::Pba).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ambiguous_header_is_batch_error() {
        let store = Arc::new(MemoryDocumentStore::new());
        let b = RawBatch::from_reader("a_project,b_project\nx,y\n".as_bytes()).unwrap();

        let err = orchestrator(store)
            .ingest(&b, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Batch(_)));
    }
}

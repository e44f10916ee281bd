//! Error types for rigscope-ingest
//!
//! Three layers:
//! - [`ResolveError`]: one find-or-create call failed
//! - [`RowError`]: why a single batch row was rejected (batch continues)
//! - [`IngestError`]: the batch as a whole could not complete

use rigscope_common::entities::ConstructionError;
use rigscope_common::{EntityKind, InvalidNaturalKey, StoreError};
use std::path::PathBuf;
use thiserror::Error;

/// Entity resolution failure
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    InvalidNaturalKey(#[from] InvalidNaturalKey),

    /// Entity was absent and could not be built
    #[error("{kind} {id} not found and construction failed: {source}")]
    ConstructionFailed {
        kind: EntityKind,
        id: String,
        #[source]
        source: ConstructionError,
    },

    /// Transient store fault; retryable by the caller
    #[error("Document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Corrupt document: {0}")]
    CorruptDocument(String),
}

impl From<StoreError> for ResolveError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => ResolveError::StoreUnavailable(msg),
            corrupt @ StoreError::Corrupt { .. } => ResolveError::CorruptDocument(corrupt.to_string()),
        }
    }
}

/// Waveform signal-processing failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("Waveform decode failed for {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Compressed sample mode is not supported ({path})")]
    UnsupportedCompression { path: PathBuf },

    #[error("Downsample size {size} exceeds sample count {samples}")]
    DownsampleSize { size: usize, samples: usize },

    #[error("Waveform has no samples")]
    EmptyWaveform,

    /// NaN or infinite sample; summaries must stay representable as JSON numbers
    #[error("Non-finite sample at index {index}")]
    NonFiniteSample { index: usize },

    #[error("Invalid waveform metadata: {0}")]
    InvalidMetadata(String),
}

/// Reason a batch row was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error(transparent)]
    InvalidNaturalKey(#[from] InvalidNaturalKey),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("{kind} construction failed: {reason}")]
    ConstructionFailed { kind: EntityKind, reason: String },

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    #[error("Parent level {0} failed")]
    ParentFailed(EntityKind),

    #[error("Ingestion cancelled")]
    Cancelled,
}

/// Batch-level failure
#[derive(Debug, Error)]
pub enum IngestError {
    /// Transient store fault; the whole batch may be retried (ingestion is idempotent)
    #[error("Document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Batch table error: {0}")]
    Batch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Common error: {0}")]
    Common(#[from] rigscope_common::Error),
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        IngestError::Batch(err.to_string())
    }
}

impl IngestError {
    /// Whether retrying the same batch may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::StoreUnavailable(_))
    }
}

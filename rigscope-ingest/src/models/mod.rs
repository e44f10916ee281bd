//! Data models for rigscope-ingest

pub mod batch;
pub mod ingest_report;

pub use batch::{parse_batch, ParsedRow, RawBatch};
pub use ingest_report::{IngestReport, LevelStats, RowReport, INGEST_ERROR_COLUMN};

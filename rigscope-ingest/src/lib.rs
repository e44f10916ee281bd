//! rigscope-ingest library interface
//!
//! Batch ingestion of hardware-test results into the document store:
//! natural-key entity resolution across the test hierarchy, waveform
//! signal processing, and foreign-key annotation of the input batch.

pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{IngestError, ResolveError, RowError, SignalError};
pub use crate::models::{IngestReport, RawBatch};
pub use crate::services::{EntityResolver, IngestOrchestrator, WaveformProcessor, WaveformRecomputer};

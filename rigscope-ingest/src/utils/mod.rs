//! Utility modules for rigscope-ingest

pub mod retry;

pub use retry::retry_transient;

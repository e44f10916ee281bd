//! Test Helper Utilities
//!
//! Shared fixtures for rigscope-ingest integration tests

pub mod fixtures;

pub use fixtures::{create_test_store, rail_samples, test_settings, write_batch, write_capture};

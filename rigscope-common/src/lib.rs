//! # rigscope common library
//!
//! Shared code for the rigscope hardware-test ingestion crates:
//! - Natural-key identifier formatting
//! - Entity model of the Project → … → Waveform hierarchy
//! - Document store trait with SQLite and in-memory adapters
//! - Configuration loading and logging setup

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod entities;
pub mod error;
pub mod ids;
pub mod logging;
pub mod store;

pub use entities::Entity;
pub use error::{Error, Result};
pub use ids::{format_id, CaptureKind, EntityKind, InvalidNaturalKey, KeyFields, NaturalKey};
pub use store::{Document, DocumentStore, InsertOutcome, StoreError};

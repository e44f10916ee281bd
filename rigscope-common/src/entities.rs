//! Persisted entities of the hardware-test hierarchy
//!
//! Project → PBA → Rework → Submission → RunID → Capture → Waveform, with
//! AutomationTest as a cross-cutting parent of Capture. Each struct carries
//! its own identifier (derived from the natural key, see [`crate::ids`]) and
//! the identifiers of its parents.

use crate::ids::{CaptureKind, EntityKind, InvalidNaturalKey, NaturalKey};
use crate::store::Document;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Entity construction failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error(transparent)]
    InvalidKey(#[from] InvalidNaturalKey),

    #[error("Missing parent {0} id")]
    MissingParent(EntityKind),

    #[error("Built {kind} id {built:?} does not match resolved id {expected:?}")]
    IdMismatch {
        kind: EntityKind,
        built: String,
        expected: String,
    },
}

/// Capability set shared by every persisted entity
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn natural_key(&self) -> NaturalKey;

    fn to_document(&self) -> Result<Document, serde_json::Error> {
        Ok(Document {
            id: self.id().to_string(),
            body: serde_json::to_value(self)?,
        })
    }
}

fn parent(kind: EntityKind, id: &str) -> Result<String, ConstructionError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(ConstructionError::MissingParent(kind));
    }
    Ok(trimmed.to_string())
}

// ============================================================================
// Project / PBA / Rework / Submission
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    /// Name as first seen in the source data
    pub name: String,
}

impl Project {
    pub fn new(name: &str) -> Result<Self, ConstructionError> {
        let key = NaturalKey::project(name)?;
        Ok(Self {
            id: key.id(),
            name: name.trim().to_string(),
        })
    }
}

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn id(&self) -> &str {
        &self.id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Project { name: self.id.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pba {
    pub id: String,
    pub part_number: String,
    pub project_id: String,
}

impl Pba {
    pub fn new(part_number: &str, project_id: &str) -> Result<Self, ConstructionError> {
        let key = NaturalKey::pba(part_number)?;
        Ok(Self {
            id: key.id(),
            part_number: key.id(),
            project_id: parent(EntityKind::Project, project_id)?,
        })
    }
}

impl Entity for Pba {
    const KIND: EntityKind = EntityKind::Pba;

    fn id(&self) -> &str {
        &self.id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Pba {
            part_number: self.part_number.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rework {
    pub id: String,
    pub pba_id: String,
    pub rework: i64,
}

impl Rework {
    pub fn new(rework: &str, pba_id: &str) -> Result<Self, ConstructionError> {
        let pba_id = parent(EntityKind::Pba, pba_id)?;
        let key = NaturalKey::rework(&pba_id, rework)?;
        let id = key.id();
        let NaturalKey::Rework { rework, .. } = key else {
            unreachable!("NaturalKey::rework always yields a rework key")
        };
        Ok(Self { id, pba_id, rework })
    }
}

impl Entity for Rework {
    const KIND: EntityKind = EntityKind::Rework;

    fn id(&self) -> &str {
        &self.id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Rework {
            pba: self.pba_id.clone(),
            rework: self.rework,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub rework_id: String,
    pub pba: String,
    pub rework: i64,
    pub serial_number: String,
}

impl Submission {
    pub fn new(
        pba: &str,
        rework: &str,
        serial_number: &str,
        rework_id: &str,
    ) -> Result<Self, ConstructionError> {
        let rework_id = parent(EntityKind::Rework, rework_id)?;
        let key = NaturalKey::submission(pba, rework, serial_number)?;
        let id = key.id();
        let NaturalKey::Submission { pba, rework, serial } = key else {
            unreachable!("NaturalKey::submission always yields a submission key")
        };
        Ok(Self {
            id,
            rework_id,
            pba,
            rework,
            serial_number: serial,
        })
    }
}

impl Entity for Submission {
    const KIND: EntityKind = EntityKind::Submission;

    fn id(&self) -> &str {
        &self.id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Submission {
            pba: self.pba.clone(),
            rework: self.rework,
            serial: self.serial_number.clone(),
        }
    }
}

// ============================================================================
// Test run / automation test
// ============================================================================

/// One automated test-run session (the RunID level)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub id: String,
    pub run: i64,
    pub submission_id: String,
}

impl TestRun {
    pub fn new(run: &str, submission_id: &str) -> Result<Self, ConstructionError> {
        let submission_id = parent(EntityKind::Submission, submission_id)?;
        let key = NaturalKey::run_id(run)?;
        let id = key.id();
        let NaturalKey::RunId { run } = key else {
            unreachable!("NaturalKey::run_id always yields a run key")
        };
        Ok(Self {
            id,
            run,
            submission_id,
        })
    }
}

impl Entity for TestRun {
    const KIND: EntityKind = EntityKind::RunId;

    fn id(&self) -> &str {
        &self.id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::RunId { run: self.run }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationTest {
    pub id: String,
    /// Category name as first seen in the source data
    pub name: String,
}

impl AutomationTest {
    pub fn new(category: &str) -> Result<Self, ConstructionError> {
        let key = NaturalKey::automation_test(category)?;
        Ok(Self {
            id: key.id(),
            name: category.trim().to_string(),
        })
    }
}

impl Entity for AutomationTest {
    const KIND: EntityKind = EntityKind::AutomationTest;

    fn id(&self) -> &str {
        &self.id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::AutomationTest {
            category: self.id.clone(),
        }
    }
}

// ============================================================================
// Capture
// ============================================================================

/// One test execution instant (Waveform or EthAgent variant)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub id: String,
    pub kind: CaptureKind,
    pub run_id: String,
    pub automation_test_id: String,
    pub run: i64,
    pub test_category: String,
    pub capture: i64,
}

impl Capture {
    pub fn new(
        kind: CaptureKind,
        capture: &str,
        run_id: &str,
        automation_test_id: &str,
    ) -> Result<Self, ConstructionError> {
        let run_id = parent(EntityKind::RunId, run_id)?;
        let automation_test_id = parent(EntityKind::AutomationTest, automation_test_id)?;
        let key = NaturalKey::capture(kind, &run_id, &automation_test_id, capture)?;
        let id = key.id();
        let NaturalKey::Capture { run, test, capture, .. } = key else {
            unreachable!("NaturalKey::capture always yields a capture key")
        };
        Ok(Self {
            id,
            kind,
            run_id,
            automation_test_id,
            run,
            test_category: test,
            capture,
        })
    }
}

impl Entity for Capture {
    const KIND: EntityKind = EntityKind::Capture;

    fn id(&self) -> &str {
        &self.id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Capture {
            kind: self.kind,
            run: self.run,
            test: self.test_category.clone(),
            capture: self.capture,
        }
    }
}

// ============================================================================
// Waveform
// ============================================================================

/// Min/max-preserving decimation of a waveform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Downsample {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Numeric summary derived from the raw samples
///
/// Written once on first ingestion; only the recomputation pass rewrites it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaveformSummary {
    pub length: usize,
    pub min: f64,
    pub max: f64,
    pub steady_state_index: usize,
    pub steady_state_min: f64,
    pub steady_state_mean: f64,
    pub steady_state_max: f64,
    pub steady_state_pk2pk: f64,
    pub downsample: Downsample,
}

/// Acquisition metadata of one channel capture file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformSource {
    pub location: PathBuf,
    pub x_increment: f64,
    pub initial_x: f64,
    pub compressed: bool,
    pub units: Option<String>,
    pub expected_voltage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    pub id: String,
    pub capture_id: String,
    pub testpoint: String,
    pub test_category: String,
    pub run: i64,
    pub capture: i64,
    pub scope_channel: i64,
    pub source: WaveformSource,
    pub summary: WaveformSummary,
}

impl Waveform {
    pub fn new(
        key: &NaturalKey,
        capture_id: &str,
        source: WaveformSource,
        summary: WaveformSummary,
    ) -> Result<Self, ConstructionError> {
        let capture_id = parent(EntityKind::Capture, capture_id)?;
        let NaturalKey::Waveform { testpoint, test, run, capture, channel } = key else {
            return Err(ConstructionError::IdMismatch {
                kind: EntityKind::Waveform,
                built: key.id(),
                expected: format!("{} key", EntityKind::Waveform),
            });
        };
        Ok(Self {
            id: key.id(),
            capture_id,
            testpoint: testpoint.clone(),
            test_category: test.clone(),
            run: *run,
            capture: *capture,
            scope_channel: *channel,
            source,
            summary,
        })
    }
}

impl Entity for Waveform {
    const KIND: EntityKind = EntityKind::Waveform;

    fn id(&self) -> &str {
        &self.id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Waveform {
            testpoint: self.testpoint.clone(),
            test: self.test_category.clone(),
            run: self.run,
            capture: self.capture,
            channel: self.scope_channel,
        }
    }
}

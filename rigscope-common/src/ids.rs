//! Natural-key identifier formatting
//!
//! Every persisted entity is keyed by a string computed purely from its
//! natural key (and, below the root, from the parent's key fields). The
//! functions here never touch the document store: identical inputs always
//! produce identical identifiers regardless of insertion order or time.
//!
//! | Entity         | Identifier                                   |
//! |----------------|----------------------------------------------|
//! | Project        | name, lowercased, whitespace removed         |
//! | PBA            | part number verbatim                         |
//! | Rework         | `{pba}_REWORK_{rework}`                      |
//! | Submission     | `{serial}_{pba}_{rework}`                    |
//! | RunID          | run number                                   |
//! | AutomationTest | category, lowercased, whitespace removed     |
//! | Capture        | `{variant}_{run}_{test}_{capture}`           |
//! | Waveform       | `{testpoint}_{test}_{run}_{capture}_CH{ch}`  |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Entity kinds
// ============================================================================

/// Entity levels of the hardware-test hierarchy, in resolution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Project,
    Pba,
    Rework,
    Submission,
    RunId,
    AutomationTest,
    Capture,
    Waveform,
}

impl EntityKind {
    /// All kinds in parent-before-child order
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Project,
        EntityKind::Pba,
        EntityKind::Rework,
        EntityKind::Submission,
        EntityKind::RunId,
        EntityKind::AutomationTest,
        EntityKind::Capture,
        EntityKind::Waveform,
    ];

    /// Document store collection holding this kind
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Project => "PROJECT",
            EntityKind::Pba => "PBA",
            EntityKind::Rework => "REWORK",
            EntityKind::Submission => "SUBMISSION",
            EntityKind::RunId => "RUNID",
            EntityKind::AutomationTest => "AUTOMATIONTEST",
            EntityKind::Capture => "DATACAPTURE",
            EntityKind::Waveform => "WAVEFORM",
        }
    }

    /// Foreign-key column appended to ingested batches for this kind
    pub fn fk_column(&self) -> &'static str {
        match self {
            EntityKind::Project => "project_id",
            EntityKind::Pba => "pba_id",
            EntityKind::Rework => "rework_id",
            EntityKind::Submission => "submission_id",
            EntityKind::RunId => "runid_id",
            EntityKind::AutomationTest => "automationtest_id",
            EntityKind::Capture => "datacapture_id",
            EntityKind::Waveform => "waveform_id",
        }
    }

    /// Kinds whose identifiers must exist before this kind can be built
    pub fn parents(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::Project | EntityKind::AutomationTest => &[],
            EntityKind::Pba => &[EntityKind::Project],
            EntityKind::Rework => &[EntityKind::Pba],
            EntityKind::Submission => &[EntityKind::Rework],
            EntityKind::RunId => &[EntityKind::Submission],
            EntityKind::Capture => &[EntityKind::RunId, EntityKind::AutomationTest],
            EntityKind::Waveform => &[EntityKind::Capture],
        }
    }

    /// Natural-key field names required by [`format_id`]
    pub fn key_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Project => &["project"],
            EntityKind::Pba => &["pba"],
            EntityKind::Rework => &["pba", "rework"],
            EntityKind::Submission => &["pba", "rework", "serial"],
            EntityKind::RunId => &["run"],
            EntityKind::AutomationTest => &["test_category"],
            EntityKind::Capture => &["capture_kind", "run", "test_category", "capture"],
            EntityKind::Waveform => &["testpoint", "test_category", "run", "capture", "scope_channel"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// Capture variant; selects the capture identifier prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureKind {
    Waveform,
    EthAgent,
}

impl CaptureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureKind::Waveform => "Waveform",
            CaptureKind::EthAgent => "EthAgent",
        }
    }
}

impl FromStr for CaptureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "waveform" | "waveformcapture" => Ok(CaptureKind::Waveform),
            "ethagent" | "ethagentcapture" => Ok(CaptureKind::EthAgent),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// What was wrong with a natural-key field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyProblem {
    Missing,
    Empty,
    NotAnInteger(String),
    UnknownCaptureKind(String),
}

impl fmt::Display for KeyProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyProblem::Missing => f.write_str("is missing"),
            KeyProblem::Empty => f.write_str("is empty"),
            KeyProblem::NotAnInteger(v) => write!(f, "is not an integer: {:?}", v),
            KeyProblem::UnknownCaptureKind(v) => write!(f, "is not a known capture kind: {:?}", v),
        }
    }
}

/// A required natural-key field was missing or malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid natural key for {kind}: field '{field}' {problem}")]
pub struct InvalidNaturalKey {
    pub kind: EntityKind,
    pub field: String,
    pub problem: KeyProblem,
}

impl InvalidNaturalKey {
    fn new(kind: EntityKind, field: &str, problem: KeyProblem) -> Self {
        Self {
            kind,
            field: field.to_string(),
            problem,
        }
    }
}

// ============================================================================
// Key fields
// ============================================================================

/// Unordered natural-key fields, keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFields(BTreeMap<String, String>);

impl KeyFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Format the identifier of `kind` from unordered natural-key fields
///
/// Rejects missing or empty required fields before formatting.
pub fn format_id(kind: EntityKind, fields: &KeyFields) -> Result<String, InvalidNaturalKey> {
    Ok(NaturalKey::from_fields(kind, fields)?.id())
}

// ============================================================================
// Typed natural keys
// ============================================================================

/// Validated, normalized natural key of one entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NaturalKey {
    Project { name: String },
    Pba { part_number: String },
    Rework { pba: String, rework: i64 },
    Submission { pba: String, rework: i64, serial: String },
    RunId { run: i64 },
    AutomationTest { category: String },
    Capture { kind: CaptureKind, run: i64, test: String, capture: i64 },
    Waveform { testpoint: String, test: String, run: i64, capture: i64, channel: i64 },
}

impl NaturalKey {
    pub fn project(name: &str) -> Result<Self, InvalidNaturalKey> {
        Ok(NaturalKey::Project {
            name: label(EntityKind::Project, "project", name)?,
        })
    }

    pub fn pba(part_number: &str) -> Result<Self, InvalidNaturalKey> {
        Ok(NaturalKey::Pba {
            part_number: verbatim(EntityKind::Pba, "pba", part_number)?,
        })
    }

    pub fn rework(pba: &str, rework: &str) -> Result<Self, InvalidNaturalKey> {
        let kind = EntityKind::Rework;
        Ok(NaturalKey::Rework {
            pba: verbatim(kind, "pba", pba)?,
            rework: integer(kind, "rework", rework)?,
        })
    }

    pub fn submission(pba: &str, rework: &str, serial: &str) -> Result<Self, InvalidNaturalKey> {
        let kind = EntityKind::Submission;
        Ok(NaturalKey::Submission {
            pba: verbatim(kind, "pba", pba)?,
            rework: integer(kind, "rework", rework)?,
            serial: verbatim(kind, "serial", serial)?,
        })
    }

    pub fn run_id(run: &str) -> Result<Self, InvalidNaturalKey> {
        Ok(NaturalKey::RunId {
            run: integer(EntityKind::RunId, "run", run)?,
        })
    }

    pub fn automation_test(category: &str) -> Result<Self, InvalidNaturalKey> {
        Ok(NaturalKey::AutomationTest {
            category: label(EntityKind::AutomationTest, "test_category", category)?,
        })
    }

    pub fn capture(
        kind: CaptureKind,
        run: &str,
        test_category: &str,
        capture: &str,
    ) -> Result<Self, InvalidNaturalKey> {
        let entity = EntityKind::Capture;
        Ok(NaturalKey::Capture {
            kind,
            run: integer(entity, "run", run)?,
            test: label(entity, "test_category", test_category)?,
            capture: integer(entity, "capture", capture)?,
        })
    }

    pub fn waveform(
        testpoint: &str,
        test_category: &str,
        run: &str,
        capture: &str,
        scope_channel: &str,
    ) -> Result<Self, InvalidNaturalKey> {
        let kind = EntityKind::Waveform;
        Ok(NaturalKey::Waveform {
            testpoint: verbatim(kind, "testpoint", testpoint)?,
            test: label(kind, "test_category", test_category)?,
            run: integer(kind, "run", run)?,
            capture: integer(kind, "capture", capture)?,
            channel: integer(kind, "scope_channel", scope_channel)?,
        })
    }

    /// Build a key of `kind` from unordered field values
    pub fn from_fields(kind: EntityKind, fields: &KeyFields) -> Result<Self, InvalidNaturalKey> {
        let get = |field: &str| {
            fields
                .get(field)
                .ok_or_else(|| InvalidNaturalKey::new(kind, field, KeyProblem::Missing))
        };

        match kind {
            EntityKind::Project => Self::project(get("project")?),
            EntityKind::Pba => Self::pba(get("pba")?),
            EntityKind::Rework => Self::rework(get("pba")?, get("rework")?),
            EntityKind::Submission => Self::submission(get("pba")?, get("rework")?, get("serial")?),
            EntityKind::RunId => Self::run_id(get("run")?),
            EntityKind::AutomationTest => Self::automation_test(get("test_category")?),
            EntityKind::Capture => {
                let raw = get("capture_kind")?;
                let variant = raw.parse::<CaptureKind>().map_err(|v| {
                    InvalidNaturalKey::new(kind, "capture_kind", KeyProblem::UnknownCaptureKind(v))
                })?;
                Self::capture(variant, get("run")?, get("test_category")?, get("capture")?)
            }
            EntityKind::Waveform => Self::waveform(
                get("testpoint")?,
                get("test_category")?,
                get("run")?,
                get("capture")?,
                get("scope_channel")?,
            ),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            NaturalKey::Project { .. } => EntityKind::Project,
            NaturalKey::Pba { .. } => EntityKind::Pba,
            NaturalKey::Rework { .. } => EntityKind::Rework,
            NaturalKey::Submission { .. } => EntityKind::Submission,
            NaturalKey::RunId { .. } => EntityKind::RunId,
            NaturalKey::AutomationTest { .. } => EntityKind::AutomationTest,
            NaturalKey::Capture { .. } => EntityKind::Capture,
            NaturalKey::Waveform { .. } => EntityKind::Waveform,
        }
    }

    /// Deterministic identifier for this key
    pub fn id(&self) -> String {
        match self {
            NaturalKey::Project { name } => name.clone(),
            NaturalKey::Pba { part_number } => part_number.clone(),
            NaturalKey::Rework { pba, rework } => format!("{}_REWORK_{}", pba, rework),
            NaturalKey::Submission { pba, rework, serial } => {
                format!("{}_{}_{}", serial, pba, rework)
            }
            NaturalKey::RunId { run } => run.to_string(),
            NaturalKey::AutomationTest { category } => category.clone(),
            NaturalKey::Capture { kind, run, test, capture } => {
                format!("{}_{}_{}_{}", kind.as_str(), run, test, capture)
            }
            NaturalKey::Waveform { testpoint, test, run, capture, channel } => {
                format!("{}_{}_{}_{}_CH{}", testpoint, test, run, capture, channel)
            }
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

// ============================================================================
// Field normalization
// ============================================================================

/// Canonical string field: trimmed, casing preserved
fn verbatim(kind: EntityKind, field: &str, value: &str) -> Result<String, InvalidNaturalKey> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InvalidNaturalKey::new(kind, field, KeyProblem::Empty));
    }
    Ok(trimmed.to_string())
}

/// Label field: lowercased with all whitespace removed
fn label(kind: EntityKind, field: &str, value: &str) -> Result<String, InvalidNaturalKey> {
    let normalized = normalize_label(value);
    if normalized.is_empty() {
        return Err(InvalidNaturalKey::new(kind, field, KeyProblem::Empty));
    }
    Ok(normalized)
}

/// Lowercase and strip whitespace, as used for project and test-category ids
pub fn normalize_label(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Integer field in canonical form
///
/// Tabular sources often carry integers as floats ("3.0"); those are
/// accepted when they have no fractional part.
fn integer(kind: EntityKind, field: &str, value: &str) -> Result<i64, InvalidNaturalKey> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InvalidNaturalKey::new(kind, field, KeyProblem::Empty));
    }
    parse_canonical_int(trimmed).ok_or_else(|| {
        InvalidNaturalKey::new(kind, field, KeyProblem::NotAnInteger(trimmed.to_string()))
    })
}

/// Parse an integer, tolerating a float representation with zero fraction
pub fn parse_canonical_int(value: &str) -> Option<i64> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    let f = value.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(f as i64)
    } else {
        None
    }
}

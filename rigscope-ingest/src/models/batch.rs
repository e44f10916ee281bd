//! Tabular batch input and typed row parsing
//!
//! A batch is a CSV table whose headers follow the flattened nested-JSON
//! naming of the test rig's exports (`capture_json_x_increment`,
//! `system_info_json_probes_units_3`, ...). Rows are validated once here
//! into [`ParsedRow`]s; nothing downstream reads raw cells.
//!
//! Key problems are recorded per hierarchy level instead of rejecting the
//! whole row, so a row with a malformed rework number still resolves its
//! Project and PBA.

use crate::error::{IngestError, RowError};
use rigscope_common::config::ColumnNames;
use rigscope_common::entities::WaveformSource;
use rigscope_common::ids::{normalize_label, parse_canonical_int};
use rigscope_common::{CaptureKind, EntityKind, KeyFields, NaturalKey};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

// ============================================================================
// Raw table
// ============================================================================

/// Untyped batch table: a header row plus string cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    /// Directory of the source file; relative waveform locations resolve here
    source_dir: Option<PathBuf>,
}

impl RawBatch {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            headers,
            rows,
            source_dir: None,
        }
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    /// Read a CSV file with a header row
    pub fn from_csv_path(path: &Path) -> Result<Self, IngestError> {
        let file = std::fs::File::open(path)?;
        let mut batch = Self::from_reader(file)?;
        batch.source_dir = path.parent().map(Path::to_path_buf);
        Ok(batch)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, IngestError> {
        let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }

        Ok(Self::new(headers, rows))
    }

    /// Write the table as CSV with a header row
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), IngestError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.headers)?;
        for row in &self.rows {
            csv_writer.write_record(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_csv_path(&self, path: &Path) -> Result<(), IngestError> {
        let file = std::fs::File::create(path)?;
        self.to_writer(std::io::BufWriter::new(file))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `(row, column)`, trimmed; `None` when the row is short
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column).map(|c| c.trim())
    }

    /// Index of the column for `name`
    ///
    /// Exact header match first, then the unique header ending in `_{name}`.
    /// More than one suffix match is an error.
    pub fn column_index(&self, name: &str) -> Result<Option<usize>, IngestError> {
        if let Some(idx) = self.headers.iter().position(|h| h == name) {
            return Ok(Some(idx));
        }

        let suffix = format!("_{}", name);
        let matches: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.ends_with(&suffix))
            .map(|(i, _)| i)
            .collect();

        match matches.as_slice() {
            [] => Ok(None),
            [idx] => Ok(Some(*idx)),
            _ => Err(IngestError::Batch(format!(
                "column '{}' is ambiguous: {}",
                name,
                matches
                    .iter()
                    .map(|&i| self.headers[i].as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Replace the column named `name`, or append it when absent
    ///
    /// `values` must have one entry per row.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> Result<(), IngestError> {
        if values.len() != self.rows.len() {
            return Err(IngestError::Batch(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }

        let idx = match self.headers.iter().position(|h| h == name) {
            Some(idx) => idx,
            None => {
                self.headers.push(name.to_string());
                self.headers.len() - 1
            }
        };

        for (row, value) in self.rows.iter_mut().zip(values) {
            if row.len() <= idx {
                row.resize(idx + 1, String::new());
            }
            row[idx] = value;
        }
        Ok(())
    }
}

// ============================================================================
// Column map
// ============================================================================

/// Header positions of every column the parser reads
#[derive(Debug, Clone)]
struct ColumnMap {
    keys: Vec<(&'static str, usize)>,
    capture_type: Option<usize>,
    location: Option<usize>,
    x_increment: Option<usize>,
    initial_x: Option<usize>,
    compress: Option<usize>,
    expected_voltage: Option<usize>,
    probe_units_prefix: String,
}

impl ColumnMap {
    fn locate(batch: &RawBatch, names: &ColumnNames) -> Result<Self, IngestError> {
        // Key-field name used by NaturalKey::from_fields -> configured column
        let key_columns: [(&'static str, &str); 9] = [
            ("project", &names.project),
            ("pba", &names.pba),
            ("rework", &names.rework),
            ("serial", &names.serial_number),
            ("run", &names.runid),
            ("test_category", &names.test_category),
            ("capture", &names.capture),
            ("testpoint", &names.testpoint),
            ("scope_channel", &names.scope_channel),
        ];

        let mut keys = Vec::with_capacity(key_columns.len());
        for (field, column) in key_columns {
            if let Some(idx) = batch.column_index(column)? {
                keys.push((field, idx));
            }
        }

        Ok(Self {
            keys,
            capture_type: batch.column_index(&names.capture_type)?,
            location: batch.column_index(&names.location)?,
            x_increment: batch.column_index(&names.x_increment)?,
            initial_x: batch.column_index(&names.initial_x)?,
            compress: batch.column_index(&names.compress)?,
            expected_voltage: batch.column_index(&names.expected_voltage)?,
            probe_units_prefix: names.probe_units_prefix.clone(),
        })
    }
}

// ============================================================================
// Parsed rows
// ============================================================================

/// One validated batch row
#[derive(Debug, Clone)]
pub struct ParsedRow {
    /// Position in the source table
    pub index: usize,
    /// Natural-key field values as read from the row
    pub fields: KeyFields,
    /// Capture variant, when it could be determined
    pub capture_kind: Option<CaptureKind>,
    /// Natural key per applicable level, or why it is invalid
    keys: BTreeMap<EntityKind, Result<NaturalKey, RowError>>,
    /// Waveform acquisition metadata (Waveform captures only)
    pub source: Option<Result<WaveformSource, RowError>>,
}

impl ParsedRow {
    /// Natural key of `kind`; `None` when the level does not apply to this row
    pub fn key(&self, kind: EntityKind) -> Option<&Result<NaturalKey, RowError>> {
        self.keys.get(&kind)
    }

    /// Raw key-field value
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).unwrap_or("")
    }

    pub fn is_waveform(&self) -> bool {
        self.keys.contains_key(&EntityKind::Waveform)
    }
}

/// Parse every row of `batch`
///
/// Fails only when the header row itself is unusable (ambiguous columns);
/// per-row problems are carried inside each [`ParsedRow`].
pub fn parse_batch(batch: &RawBatch, names: &ColumnNames) -> Result<Vec<ParsedRow>, IngestError> {
    let columns = ColumnMap::locate(batch, names)?;
    Ok((0..batch.len())
        .map(|index| parse_row(batch, &columns, index))
        .collect())
}

fn parse_row(batch: &RawBatch, columns: &ColumnMap, index: usize) -> ParsedRow {
    let cell = |column: Option<usize>| column.and_then(|c| batch.cell(index, c));

    let mut fields = KeyFields::new();
    for (field, column) in &columns.keys {
        if let Some(value) = batch.cell(index, *column) {
            fields.insert(*field, value);
        }
    }

    let location = cell(columns.location).filter(|l| !l.is_empty());

    // Explicit capture type wins; otherwise a file location means a scope capture
    let raw_kind = match cell(columns.capture_type).filter(|v| !v.is_empty()) {
        Some(raw) => raw.to_string(),
        None if location.is_some() => CaptureKind::Waveform.as_str().to_string(),
        None => CaptureKind::EthAgent.as_str().to_string(),
    };
    fields.insert("capture_kind", raw_kind.as_str());
    let capture_kind = raw_kind.parse::<CaptureKind>().ok();

    let mut keys = BTreeMap::new();
    for kind in EntityKind::ALL {
        if kind == EntityKind::Waveform && capture_kind != Some(CaptureKind::Waveform) {
            continue;
        }
        let key = NaturalKey::from_fields(kind, &fields).map_err(RowError::from);
        keys.insert(kind, key);
    }

    let source = (capture_kind == Some(CaptureKind::Waveform))
        .then(|| parse_source(batch, columns, index, location, &fields));

    ParsedRow {
        index,
        fields,
        capture_kind,
        keys,
        source,
    }
}

fn parse_source(
    batch: &RawBatch,
    columns: &ColumnMap,
    index: usize,
    location: Option<&str>,
    fields: &KeyFields,
) -> Result<WaveformSource, RowError> {
    let cell = |column: Option<usize>| {
        column
            .and_then(|c| batch.cell(index, c))
            .filter(|v| !v.is_empty())
    };

    let location = location.ok_or_else(|| invalid("location", "missing waveform file location"))?;

    let x_increment = cell(columns.x_increment)
        .ok_or_else(|| invalid("x_increment", "missing"))
        .and_then(|v| parse_float("x_increment", v))?;
    if x_increment <= 0.0 {
        return Err(invalid("x_increment", format!("must be positive, got {}", x_increment)));
    }

    let initial_x = cell(columns.initial_x)
        .map(|v| parse_float("initial_x", v))
        .transpose()?
        .unwrap_or(0.0);

    let compressed = cell(columns.compress)
        .map(|v| parse_flag("compress", v))
        .transpose()?
        .unwrap_or(false);

    let expected_voltage = cell(columns.expected_voltage)
        .map(|v| parse_float("expected_voltage", v))
        .transpose()?;

    let units = fields
        .get("scope_channel")
        .and_then(parse_canonical_int)
        .and_then(|ch| {
            let column = format!("{}{}", columns.probe_units_prefix, ch);
            batch.column_index(&column).ok().flatten()
        })
        .and_then(|c| batch.cell(index, c))
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    Ok(WaveformSource {
        location: PathBuf::from(location),
        x_increment,
        initial_x,
        compressed,
        units,
        expected_voltage,
    })
}

fn invalid(field: &str, reason: impl Into<String>) -> RowError {
    RowError::InvalidField {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn parse_float(field: &str, value: &str) -> Result<f64, RowError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(field, format!("'{}' is not a number", value)))
}

fn parse_flag(field: &str, value: &str) -> Result<bool, RowError> {
    match normalize_label(value).as_str() {
        "true" | "yes" | "y" | "t" => Ok(true),
        "false" | "no" | "n" | "f" => Ok(false),
        other => match parse_canonical_int(other) {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid(field, format!("'{}' is not a boolean", value))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigscope_common::ids::KeyProblem;

    const HEADER: &str = "project,pba,rework,serial_number,runid,test_category,capture,\
capture_json_testpoint,scope_channel,capture_json_location,capture_json_x_increment,\
capture_json_initial_x,capture_json_compress,system_info_json_probes_units_1";

    fn batch(rows: &[&str]) -> RawBatch {
        let text = format!("{}\n{}\n", HEADER, rows.join("\n"));
        RawBatch::from_reader(text.as_bytes()).unwrap()
    }

    fn key_id(row: &ParsedRow, kind: EntityKind) -> String {
        row.key(kind).unwrap().as_ref().unwrap().id()
    }

    #[test]
    fn test_suffix_column_lookup() {
        let b = batch(&[]);
        assert_eq!(b.column_index("project").unwrap(), Some(0));
        assert_eq!(b.column_index("x_increment").unwrap(), Some(10));
        assert_eq!(b.column_index("does_not_exist").unwrap(), None);
    }

    #[test]
    fn test_ambiguous_suffix_is_error() {
        let b = RawBatch::new(
            vec!["a_location".to_string(), "b_location".to_string()],
            Vec::new(),
        );
        assert!(matches!(b.column_index("location"), Err(IngestError::Batch(_))));
    }

    #[test]
    fn test_waveform_row_keys_and_source() {
        let b = batch(&[
            "Falcon Ridge,K31123-003,0.0,SN01,1200,Load Profile,2,VCC_3V3,1,ch1.bin.gz,8e-8,-1e-3,False,V",
        ]);
        let rows = parse_batch(&b, &ColumnNames::default()).unwrap();
        let row = &rows[0];

        assert_eq!(row.capture_kind, Some(CaptureKind::Waveform));
        assert_eq!(key_id(row, EntityKind::Project), "falconridge");
        assert_eq!(key_id(row, EntityKind::Rework), "K31123-003_REWORK_0");
        assert_eq!(key_id(row, EntityKind::Submission), "SN01_K31123-003_0");
        assert_eq!(key_id(row, EntityKind::RunId), "1200");
        assert_eq!(key_id(row, EntityKind::Capture), "Waveform_1200_loadprofile_2");
        assert_eq!(key_id(row, EntityKind::Waveform), "VCC_3V3_loadprofile_1200_2_CH1");

        let source = row.source.as_ref().unwrap().as_ref().unwrap();
        assert_eq!(source.location, PathBuf::from("ch1.bin.gz"));
        assert_eq!(source.x_increment, 8e-8);
        assert_eq!(source.initial_x, -1e-3);
        assert!(!source.compressed);
        assert_eq!(source.units.as_deref(), Some("V"));
    }

    #[test]
    fn test_row_without_location_is_ethagent() {
        let b = batch(&["Falcon,K31123-003,1,SN01,1200,Thermal,3,,,,,,,"]);
        let rows = parse_batch(&b, &ColumnNames::default()).unwrap();
        let row = &rows[0];

        assert_eq!(row.capture_kind, Some(CaptureKind::EthAgent));
        assert_eq!(key_id(row, EntityKind::Capture), "EthAgent_1200_thermal_3");
        assert!(row.key(EntityKind::Waveform).is_none());
        assert!(row.source.is_none());
    }

    #[test]
    fn test_bad_rework_only_affects_dependent_levels() {
        let b = batch(&["Falcon,K31123-003,1.5,SN01,1200,Thermal,3,,,,,,,"]);
        let rows = parse_batch(&b, &ColumnNames::default()).unwrap();
        let row = &rows[0];

        assert!(row.key(EntityKind::Project).unwrap().is_ok());
        assert!(row.key(EntityKind::Pba).unwrap().is_ok());
        match row.key(EntityKind::Rework).unwrap() {
            Err(RowError::InvalidNaturalKey(e)) => {
                assert_eq!(e.problem, KeyProblem::NotAnInteger("1.5".to_string()))
            }
            other => panic!("unexpected key: {:?}", other),
        }
        assert!(row.key(EntityKind::RunId).unwrap().is_ok());
    }

    #[test]
    fn test_bad_waveform_metadata_is_field_error() {
        let b = batch(&["Falcon,K31123-003,0,SN01,1200,Load,2,VCC,1,ch1.bin.gz,fast,,,"]);
        let rows = parse_batch(&b, &ColumnNames::default()).unwrap();
        let err = rows[0].source.as_ref().unwrap().as_ref().unwrap_err();
        assert!(matches!(err, RowError::InvalidField { field, .. } if field == "x_increment"));
    }

    #[test]
    fn test_compress_flag_values() {
        assert_eq!(parse_flag("compress", "True"), Ok(true));
        assert_eq!(parse_flag("compress", "0.0"), Ok(false));
        assert_eq!(parse_flag("compress", "1"), Ok(true));
        assert!(parse_flag("compress", "maybe").is_err());
    }

    #[test]
    fn test_set_column_appends_then_replaces() {
        let mut b = RawBatch::new(vec!["a".to_string()], vec![vec!["1".to_string()]]);
        b.set_column("a_id", vec!["x".to_string()]).unwrap();
        assert_eq!(b.headers(), ["a", "a_id"]);
        b.set_column("a_id", vec!["y".to_string()]).unwrap();
        assert_eq!(b.rows()[0], vec!["1".to_string(), "y".to_string()]);
        assert!(b.set_column("b", Vec::new()).is_err());
    }

    #[test]
    fn test_csv_round_trip_through_writer() {
        let b = batch(&["Falcon,K1,0,SN01,1,Load,1,TP,1,\"dir, with comma/ch1.gz\",1e-6,0,0,V"]);
        let mut out = Vec::new();
        b.to_writer(&mut out).unwrap();
        let again = RawBatch::from_reader(out.as_slice()).unwrap();
        assert_eq!(again, b);
    }
}

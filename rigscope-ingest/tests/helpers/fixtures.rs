//! Batch and waveform fixtures
//!
//! Waveform captures are written the way the rig writes them: one gzip
//! member of little-endian f64 samples.

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use rigscope_common::config::IngestSettings;
use rigscope_common::store::SqliteDocumentStore;
use rigscope_ingest::RawBatch;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Header row using the rig's flattened column names
pub const BATCH_HEADER: &str = "project,pba,rework,serial_number,runid,test_category,capture,\
capture_json_testpoint,scope_channel,capture_json_location,capture_json_x_increment,\
capture_json_initial_x,capture_json_compress,system_info_json_probes_units_1";

/// SQLite-backed store in a fresh temp directory
///
/// Returns (TempDir, store) - TempDir must be kept alive for duration of test
pub async fn create_test_store() -> Result<(TempDir, Arc<SqliteDocumentStore>)> {
    let temp_dir = TempDir::new()?;
    let pool = rigscope_common::db::init_database(&temp_dir.path().join("rigscope.db")).await?;
    Ok((temp_dir, Arc::new(SqliteDocumentStore::new(pool))))
}

/// Settings sized for small fixtures
pub fn test_settings() -> IngestSettings {
    IngestSettings {
        downsample_size: 50,
        decode_workers: 2,
        ..IngestSettings::default()
    }
}

/// 0 V for `n / 10` samples, ramp to `rail` over `n / 10`, then flat
pub fn rail_samples(n: usize, rail: f64) -> Vec<f64> {
    let edge = n / 10;
    (0..n)
        .map(|i| {
            if i < edge {
                0.0
            } else if i < 2 * edge {
                rail * (i - edge + 1) as f64 / edge as f64
            } else {
                rail
            }
        })
        .collect()
}

/// Write a gzip capture file under `dir`
pub fn write_capture(dir: &Path, name: &str, samples: &[f64]) -> Result<PathBuf> {
    let path = dir.join(name);
    let payload: Vec<u8> = samples.iter().flat_map(|v| v.to_le_bytes()).collect();
    let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
    encoder.write_all(&payload)?;
    encoder.finish()?;
    Ok(path)
}

/// Write `rows` under [`BATCH_HEADER`] to `dir/name` and read it back
pub fn write_batch(dir: &Path, name: &str, rows: &[&str]) -> Result<RawBatch> {
    let path = dir.join(name);
    std::fs::write(&path, format!("{}\n{}\n", BATCH_HEADER, rows.join("\n")))?;
    Ok(RawBatch::from_csv_path(&path)?)
}

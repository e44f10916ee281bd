//! Configuration loading
//!
//! Bootstrap configuration is a single TOML file located by priority:
//! 1. Command-line argument (highest priority)
//! 2. `RIGSCOPE_CONFIG` environment variable
//! 3. `<config dir>/rigscope/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing or unreadable file found through 2-3 is not fatal: a warning is
//! logged and compiled defaults are used. An explicit command-line path that
//! does not exist is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "RIGSCOPE_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite document store (OS data dir default when absent)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ingest: IngestSettings,

    /// Source column names used by the batch parser
    #[serde(default)]
    pub columns: ColumnNames,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Raw sample encoding inside a waveform capture file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    F32,
    #[default]
    F64,
}

impl SampleFormat {
    pub fn width(&self) -> usize {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }
}

/// Ingestion and signal-processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Concurrent partition resolutions within one hierarchy level
    pub resolve_workers: usize,
    /// Concurrent waveform decodes; 0 means one per CPU
    pub decode_workers: usize,
    /// Bins in the min/max downsample (output has twice as many points)
    pub downsample_size: usize,
    /// Percentile of the waveform used as the settled-rail proxy
    pub steady_state_percentile: f64,
    /// Fraction of the percentile value that starts the steady-state window
    pub steady_state_accuracy: f64,
    /// Fraction of the steady-state mean used as the default index target
    pub steady_state_target_ratio: f64,
    pub sample_format: SampleFormat,
    /// Total time the binary keeps retrying a batch on store outages
    pub max_retry_wait_ms: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            resolve_workers: 8,
            decode_workers: 0,
            downsample_size: 1000,
            steady_state_percentile: 92.0,
            steady_state_accuracy: 0.99,
            steady_state_target_ratio: 0.9,
            sample_format: SampleFormat::F64,
            max_retry_wait_ms: 30_000,
        }
    }
}

impl IngestSettings {
    /// Reject settings the signal processor cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.resolve_workers == 0 {
            return Err(Error::Config("ingest.resolve_workers must be >= 1".to_string()));
        }
        if self.downsample_size == 0 {
            return Err(Error::Config("ingest.downsample_size must be >= 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.steady_state_percentile) {
            return Err(Error::Config(format!(
                "ingest.steady_state_percentile must be within 0..=100, got {}",
                self.steady_state_percentile
            )));
        }
        if !(self.steady_state_accuracy > 0.0) || !(self.steady_state_target_ratio > 0.0) {
            return Err(Error::Config(
                "ingest.steady_state_accuracy and steady_state_target_ratio must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Source column names
///
/// Lookup is by exact header first, then by the unique header ending in
/// `_<name>` (flattened nested-JSON headers such as `capture_json_x_increment`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub project: String,
    pub pba: String,
    pub rework: String,
    pub serial_number: String,
    pub runid: String,
    pub test_category: String,
    pub capture: String,
    pub capture_type: String,
    pub testpoint: String,
    pub scope_channel: String,
    pub location: String,
    pub x_increment: String,
    pub initial_x: String,
    pub compress: String,
    pub expected_voltage: String,
    /// Prefix of per-channel probe unit columns; the channel number is appended
    pub probe_units_prefix: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            project: "project".to_string(),
            pba: "pba".to_string(),
            rework: "rework".to_string(),
            serial_number: "serial_number".to_string(),
            runid: "runid".to_string(),
            test_category: "test_category".to_string(),
            capture: "capture".to_string(),
            capture_type: "capture_type".to_string(),
            testpoint: "testpoint".to_string(),
            scope_channel: "scope_channel".to_string(),
            location: "location".to_string(),
            x_increment: "x_increment".to_string(),
            initial_x: "initial_x".to_string(),
            compress: "compress".to_string(),
            expected_voltage: "expected_voltage".to_string(),
            probe_units_prefix: "system_info_json_probes_units_".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse and validate a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
        config.ingest.validate()?;
        Ok(config)
    }

    /// Database path, falling back to the OS data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Locate and load configuration following the priority order above
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found: {}", path.display())));
        }
        let config = TomlConfig::from_file(path)?;
        info!("Configuration loaded from {}", path.display());
        return Ok(config);
    }

    // Priority 2 and 3: environment variable, then user config directory
    let candidate = std::env::var(CONFIG_ENV_VAR)
        .ok()
        .map(PathBuf::from)
        .or_else(default_config_path);

    match candidate {
        Some(path) if path.exists() => match TomlConfig::from_file(&path) {
            Ok(config) => {
                info!("Configuration loaded from {}", path.display());
                Ok(config)
            }
            Err(e) => {
                warn!("{}; using compiled defaults", e);
                Ok(TomlConfig::default())
            }
        },
        Some(path) => {
            warn!("Config file {} not found; using compiled defaults", path.display());
            Ok(TomlConfig::default())
        }
        None => {
            warn!("No config directory available; using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// `<config dir>/rigscope/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rigscope").join("config.toml"))
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("rigscope").join("rigscope.db"))
        .unwrap_or_else(|| PathBuf::from("./rigscope_data/rigscope.db"))
}

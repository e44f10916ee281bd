//! Tests for configuration resolution and graceful degradation
//!
//! Tests that touch RIGSCOPE_CONFIG are #[serial] so they do not race on
//! the process environment.

use rigscope_common::config::{load_config, SampleFormat, TomlConfig, CONFIG_ENV_VAR};
use serial_test::serial;
use std::env;
use tempfile::TempDir;

#[test]
fn test_defaults() {
    let config = TomlConfig::default();
    assert_eq!(config.logging.level, "info");
    assert!(config.logging.file.is_none());
    assert_eq!(config.ingest.downsample_size, 1000);
    assert_eq!(config.ingest.steady_state_percentile, 92.0);
    assert_eq!(config.ingest.steady_state_accuracy, 0.99);
    assert_eq!(config.ingest.sample_format, SampleFormat::F64);
    assert_eq!(config.columns.x_increment, "x_increment");
    assert!(config.ingest.validate().is_ok());
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let toml_str = r#"
        database_path = "/tmp/rigscope-test.db"

        [ingest]
        decode_workers = 2
        sample_format = "f32"

        [columns]
        serial_number = "serial"
    "#;
    let config: TomlConfig = toml::from_str(toml_str).unwrap();

    assert_eq!(config.database_path.unwrap().to_string_lossy(), "/tmp/rigscope-test.db");
    assert_eq!(config.ingest.decode_workers, 2);
    assert_eq!(config.ingest.sample_format, SampleFormat::F32);
    assert_eq!(config.ingest.resolve_workers, 8);
    assert_eq!(config.columns.serial_number, "serial");
    assert_eq!(config.columns.pba, "pba");
}

#[test]
fn test_invalid_percentile_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[ingest]\nsteady_state_percentile = 140.0\n").unwrap();

    assert!(TomlConfig::from_file(&path).is_err());
}

#[test]
#[serial]
fn test_explicit_missing_path_is_error() {
    let result = load_config(Some(std::path::Path::new("/nonexistent/rigscope.toml")));
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_env_var_config_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

    env::set_var(CONFIG_ENV_VAR, &path);
    let config = load_config(None).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_unparsable_env_config_degrades_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is = = not toml").unwrap();

    env::set_var(CONFIG_ENV_VAR, &path);
    let config = load_config(None).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.ingest, TomlConfig::default().ingest);
}

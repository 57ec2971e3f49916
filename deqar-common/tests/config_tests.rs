//! Configuration resolution tests
//!
//! Tests that manipulate DEQAR_DATABASE are marked with #[serial]
//! so they run sequentially, not in parallel.

use deqar_common::config::{default_database_path, IngestConfig, DATABASE_ENV_VAR};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(DATABASE_ENV_VAR, "/tmp/deqar-env.db");

    let config = IngestConfig {
        database_path: Some(PathBuf::from("/tmp/deqar-toml.db")),
        ..IngestConfig::default()
    };
    assert_eq!(
        config.resolve_database_path(None),
        PathBuf::from("/tmp/deqar-env.db")
    );

    env::remove_var(DATABASE_ENV_VAR);
}

#[test]
#[serial]
fn test_toml_beats_default() {
    env::remove_var(DATABASE_ENV_VAR);

    let config = IngestConfig {
        database_path: Some(PathBuf::from("/tmp/deqar-toml.db")),
        ..IngestConfig::default()
    };
    assert_eq!(
        config.resolve_database_path(None),
        PathBuf::from("/tmp/deqar-toml.db")
    );
}

#[test]
#[serial]
fn test_falls_back_to_compiled_default() {
    env::remove_var(DATABASE_ENV_VAR);

    let config = IngestConfig::default();
    let resolved = config.resolve_database_path(None);
    assert_eq!(resolved, default_database_path());
    assert!(resolved.ends_with("deqar.db"));
}

#[test]
fn test_load_explicit_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        "max_lock_wait_ms = 1000\nevent_capacity = 8\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let config = IngestConfig::load_or_default(Some(&path)).unwrap();
    assert_eq!(config.max_lock_wait_ms, 1000);
    assert_eq!(config.event_capacity, 8);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_missing_explicit_file_is_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");
    assert!(IngestConfig::load_or_default(Some(&path)).is_err());
}

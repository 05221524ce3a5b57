//! Config file resolution and loading
//!
//! Tests that manipulate TFB_CONFIG are marked with #[serial] so they run
//! sequentially, not in parallel.

use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tfb_common::config::{resolve_config_path, TomlConfig, CONFIG_ENV_VAR};
use tfb_common::Error;

const FULL_CONFIG: &str = r#"
room_id = "BallroomA"
update_gsheet_seconds = 90
simulate_voting = true
data_dir = "/var/lib/tfb"
schedule_source = "/etc/tfb/speakers.csv"
channel_capacity = 64

[timing]
session_minutes = 45
break_minutes = 10
schedule_year = 2018

[sheet]
base_url = "http://sheets.local/api"
worksheet = "speakers-list"
token = "secret"
min_request_interval_ms = 500

[logging]
level = "debug"
file = "/var/log/tfb/debug.log"
"#;

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/tfb-from-env.toml");

    let path = resolve_config_path(Some(Path::new("/tmp/tfb-from-cli.toml"))).unwrap();
    assert_eq!(path, PathBuf::from("/tmp/tfb-from-cli.toml"));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/tfb-from-env.toml");

    let path = resolve_config_path(None).unwrap();
    assert_eq!(path, PathBuf::from("/tmp/tfb-from-env.toml"));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
fn test_load_full_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let config = TomlConfig::load(&path).unwrap();
    assert_eq!(config.room_id, "BallroomA");
    assert_eq!(config.publish_interval_secs, 90);
    assert!(config.simulate_voting);
    assert_eq!(config.channel_capacity, 64);
    assert_eq!(config.timing.session_minutes, 45);
    assert_eq!(config.timing.schedule_year, 2018);
    assert_eq!(config.sheet.base_url.as_deref(), Some("http://sheets.local/api"));
    assert_eq!(config.worksheet(), "speakers-list");
    assert_eq!(config.sheet.min_request_interval_ms, 500);
    assert_eq!(
        config.sheet.min_request_interval(),
        std::time::Duration::from_millis(500)
    );
    assert_eq!(config.logging.level, "debug");
    assert_eq!(
        config.schedule_source_path(),
        PathBuf::from("/etc/tfb/speakers.csv")
    );
    assert_eq!(config.data_dir(), PathBuf::from("/var/lib/tfb"));
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let err = TomlConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_malformed_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "room_id = [not toml").unwrap();

    assert!(matches!(TomlConfig::load(&path), Err(Error::TomlParse(_))));
}

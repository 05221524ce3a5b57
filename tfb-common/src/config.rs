//! Configuration loading and config file resolution
//!
//! One TOML file per device. It is read once at startup; there is no hot
//! reload. Anything wrong with it is fatal: the device must not start
//! collecting votes for the wrong room or into the wrong directory.

use crate::schedule::SessionTiming;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "TFB_CONFIG";

/// Device configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Room this device collects votes for; selects the schedule rows
    pub room_id: String,

    /// Seconds between spreadsheet publish cycles
    #[serde(default = "default_publish_interval", alias = "update_gsheet_seconds")]
    pub publish_interval_secs: u64,

    /// Generate random votes instead of reading input
    #[serde(default)]
    pub simulate_voting: bool,

    /// Directory for vote logs and schedule caches
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Speakers list CSV; relative paths resolve under `data_dir`
    #[serde(default = "default_schedule_source")]
    pub schedule_source: PathBuf,

    /// Seconds between drain/persist ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Votes buffered between capture and aggregation
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Vote log write attempts per tick before the batch is deferred
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,

    #[serde(default)]
    pub timing: SessionTiming,

    #[serde(default)]
    pub sheet: SheetConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Spreadsheet sink settings
#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
    /// Sheet gateway endpoint; without it tallies go to an in-memory sheet
    #[serde(default)]
    pub base_url: Option<String>,

    /// Worksheet name (defaults to the room id)
    #[serde(default)]
    pub worksheet: Option<String>,

    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_min_request_interval")]
    pub min_request_interval_ms: u64,

    #[serde(default = "default_sheet_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_positive_column")]
    pub positive_column: String,

    #[serde(default = "default_negative_column")]
    pub negative_column: String,

    #[serde(default = "default_neutral_column")]
    pub neutral_column: String,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            worksheet: None,
            token: None,
            min_request_interval_ms: default_min_request_interval(),
            timeout_secs: default_sheet_timeout(),
            positive_column: default_positive_column(),
            negative_column: default_negative_column(),
            neutral_column: default_neutral_column(),
        }
    }
}

impl SheetConfig {
    /// Minimum spacing between gateway requests
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if unset)
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

fn default_publish_interval() -> u64 {
    120
}

fn default_schedule_source() -> PathBuf {
    PathBuf::from("speakers-list.csv")
}

fn default_poll_interval() -> u64 {
    5
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_write_attempts() -> u32 {
    3
}

fn default_min_request_interval() -> u64 {
    1100
}

fn default_sheet_timeout() -> u64 {
    30
}

fn default_positive_column() -> String {
    "H".to_string()
}

fn default_negative_column() -> String {
    "I".to_string()
}

fn default_neutral_column() -> String {
    "J".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            return Err(Error::Config("room_id must not be empty".to_string()));
        }
        if self.publish_interval_secs == 0 {
            return Err(Error::Config(
                "publish_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.write_attempts == 0 {
            return Err(Error::Config("write_attempts must be at least 1".to_string()));
        }
        if self.timing.session_minutes <= 0 || self.timing.break_minutes < 0 {
            return Err(Error::Config(format!(
                "invalid session timing: session {} min, break {} min",
                self.timing.session_minutes, self.timing.break_minutes
            )));
        }
        for column in [
            &self.sheet.positive_column,
            &self.sheet.negative_column,
            &self.sheet.neutral_column,
        ] {
            if column.is_empty() || !column.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(Error::Config(format!(
                    "sheet column '{}' must be upper-case letters",
                    column
                )));
            }
        }
        Ok(())
    }

    /// Data directory, falling back to the platform default
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Schedule source path with relative paths anchored at `data_dir`
    pub fn schedule_source_path(&self) -> PathBuf {
        if self.schedule_source.is_absolute() {
            self.schedule_source.clone()
        } else {
            self.data_dir().join(&self.schedule_source)
        }
    }

    /// Worksheet holding this room's tallies
    pub fn worksheet(&self) -> &str {
        self.sheet.worksheet.as_deref().unwrap_or(&self.room_id)
    }
}

/// Config file resolution, highest priority first:
/// 1. Command-line argument
/// 2. `TFB_CONFIG` environment variable
/// 3. `<user config dir>/tfb/config.toml`
/// 4. `/etc/tfb/config.toml`
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: per-user config
    if let Some(path) = dirs::config_dir().map(|d| d.join("tfb").join("config.toml")) {
        if path.exists() {
            return Ok(path);
        }
    }

    // Priority 4: system-wide config
    let system_config = PathBuf::from("/etc/tfb/config.toml");
    if system_config.exists() {
        return Ok(system_config);
    }

    Err(Error::Config(format!(
        "No config file found (use --config or set {})",
        CONFIG_ENV_VAR
    )))
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tfb"))
        .unwrap_or_else(|| PathBuf::from("./tfb_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = TomlConfig::from_toml_str("room_id = \"BallroomA\"").unwrap();
        assert_eq!(config.room_id, "BallroomA");
        assert_eq!(config.publish_interval_secs, 120);
        assert_eq!(config.poll_interval_secs, 5);
        assert!(!config.simulate_voting);
        assert_eq!(config.timing.session_minutes, 90);
        assert_eq!(config.timing.break_minutes, 15);
        assert_eq!(config.sheet.positive_column, "H");
        assert_eq!(config.sheet.neutral_column, "J");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.worksheet(), "BallroomA");
    }

    #[test]
    fn test_original_interval_key_is_accepted() {
        let config =
            TomlConfig::from_toml_str("room_id = \"A\"\nupdate_gsheet_seconds = 60").unwrap();
        assert_eq!(config.publish_interval_secs, 60);
    }

    #[test]
    fn test_missing_room_is_fatal() {
        assert!(matches!(
            TomlConfig::from_toml_str("simulate_voting = true"),
            Err(Error::TomlParse(_))
        ));
        assert!(matches!(
            TomlConfig::from_toml_str("room_id = \"  \""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_zero_intervals_rejected() {
        assert!(TomlConfig::from_toml_str("room_id = \"A\"\npublish_interval_secs = 0").is_err());
        assert!(TomlConfig::from_toml_str("room_id = \"A\"\npoll_interval_secs = 0").is_err());
        assert!(TomlConfig::from_toml_str("room_id = \"A\"\nwrite_attempts = 0").is_err());
    }

    #[test]
    fn test_bad_column_rejected() {
        let err = TomlConfig::from_toml_str("room_id = \"A\"\n[sheet]\npositive_column = \"h1\"")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_relative_schedule_source_resolves_under_data_dir() {
        let config = TomlConfig::from_toml_str(
            "room_id = \"A\"\ndata_dir = \"/srv/tfb\"\nschedule_source = \"rooms/a.csv\"",
        )
        .unwrap();
        assert_eq!(
            config.schedule_source_path(),
            PathBuf::from("/srv/tfb/rooms/a.csv")
        );
    }
}

//! Configuration types.
//!
//! This module defines the engine configuration and the logging enums used to
//! build it. The configuration is a plain value: callers construct it once at
//! startup and hand it to [`crate::GeoService::start`].

use std::path::PathBuf;
use std::time::Duration;

use crate::config::constants::{
    DATABASE_DIR_NAME, DEFAULT_DATABASE_NAME, DEFAULT_DATA_DIR, HISTORIES_DIR_NAME,
    SHUTDOWN_DRAIN_TIMEOUT, VERSION_FILE_NAME,
};
use crate::error_handling::ConfigError;

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Engine configuration.
///
/// # Examples
///
/// ```no_run
/// use geolize::Config;
/// use std::path::PathBuf;
///
/// let config = Config {
///     data_dir: PathBuf::from("/var/lib/geolize"),
///     require_watcher: false,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the persisted layout (`version`, `db/`, `histories/`)
    pub data_dir: PathBuf,

    /// File name of the canonical database inside `db/`
    pub database_name: String,

    /// Log level
    pub log_level: LogLevel,

    /// Log format
    pub log_format: LogFormat,

    /// Refuse to start when the checkpoint watcher cannot be established.
    /// When false the failure is logged and the service runs without hot reload.
    pub require_watcher: bool,

    /// Keep `merged_*` ledger entries after a successful publish
    pub retain_merged_entries: bool,

    /// Upper bound on how long shutdown waits for in-flight lookups
    pub shutdown_drain_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            require_watcher: true,
            retain_merged_entries: true,
            shutdown_drain_timeout: SHUTDOWN_DRAIN_TIMEOUT,
        }
    }
}

impl Config {
    /// Configuration rooted at `data_dir`, everything else default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Path of the checkpoint file.
    pub fn version_file(&self) -> PathBuf {
        self.data_dir.join(VERSION_FILE_NAME)
    }

    /// Directory holding the canonical database.
    pub fn database_dir(&self) -> PathBuf {
        self.data_dir.join(DATABASE_DIR_NAME)
    }

    /// Path of the canonical database.
    pub fn database_path(&self) -> PathBuf {
        self.database_dir().join(&self.database_name)
    }

    /// Directory holding ledger entries.
    pub fn histories_dir(&self) -> PathBuf {
        self.data_dir.join(HISTORIES_DIR_NAME)
    }

    /// Rejects configurations that would place files outside the layout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.database_name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyDatabaseName);
        }
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(ConfigError::InvalidDatabaseName(self.database_name.clone()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDataDir);
        }
        Ok(())
    }
}

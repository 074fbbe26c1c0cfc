//! Application configuration.
//!
//! Layered the way the rest of this codebase expects: a `TestConfig` for the
//! sweep/settle/tolerance knobs the executor and scheduler read every run, a
//! `LoggingConfig` consumed by [`crate::logging`], and a `PersistenceConfig`
//! for the record store's backing file. Loaded from an optional TOML file
//! with environment overrides (prefix `FAT_`), falling back to defaults that
//! match the values named in the design.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// How an AO channel's engineering value is written to the target PLC.
/// Left as a policy flag per the design's open question — the source this
/// was distilled from was inconsistent about which form different paths used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AoWriteMode {
    Percent,
    Engineering,
}

impl Default for AoWriteMode {
    fn default() -> Self {
        Self::Percent
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Settle time after a stimulus write, before read-back (ms).
    pub settle_ms: u64,
    /// Pause between sweep checkpoints (ms).
    pub inter_checkpoint_ms: u64,
    /// Best-effort budget for the post-sweep reset write (ms).
    pub reset_timeout_ms: u64,
    /// PLC connect timeout (ms).
    pub connect_timeout_ms: u64,
    /// PLC read/write timeout (ms).
    pub io_timeout_ms: u64,
    /// Allowed deviation for AI checkpoints, percent of span.
    pub ai_tolerance_pct: f64,
    /// Allowed deviation for AO checkpoints, percent of span.
    pub ao_tolerance_pct: f64,
    /// Max concurrent hard-point executions the scheduler runs.
    pub max_parallel: usize,
    /// Whether a failed reset write downgrades an otherwise-passed verdict.
    pub reset_failure_is_fatal: bool,
    /// Whether normally-closed wiring inverts a DI read before comparison.
    pub nc_wiring_inverts_read: bool,
    /// Form used when writing an AO channel's engineering value.
    pub ao_write_mode: AoWriteMode,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            settle_ms: 3000,
            inter_checkpoint_ms: 1000,
            reset_timeout_ms: 2000,
            connect_timeout_ms: 2000,
            io_timeout_ms: 2000,
            ai_tolerance_pct: 1.0,
            ao_tolerance_pct: 2.0,
            max_parallel: 4,
            reset_failure_is_fatal: false,
            nc_wiring_inverts_read: false,
            ao_write_mode: AoWriteMode::Percent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Path to the sqlite database backing the record store.
    pub database_path: PathBuf,
    /// Dedup window for `save_queued`, seconds.
    pub dedup_window_secs: i64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("fat_records.sqlite"),
            dedup_window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Mirror stdout to a rotating file under this directory when set.
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::Info, file_dir: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub test_config: TestConfig,
    pub persistence_config: PersistenceConfig,
    pub logging_config: LoggingConfig,
}

impl AppConfig {
    /// Load from an optional TOML file, then apply `FAT_*` environment
    /// overrides (e.g. `FAT_TEST_CONFIG__MAX_PARALLEL=8`), falling back to
    /// defaults when no file is present.
    pub fn load(path: Option<&std::path::Path>) -> AppResult<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);
        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(config::File::from(path));
            }
        }
        builder = builder.add_source(config::Environment::with_prefix("FAT").separator("__"));
        let built = builder.build().map_err(AppError::from)?;
        built.try_deserialize().map_err(AppError::from)
    }
}

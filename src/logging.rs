//! Logging bootstrap.
//!
//! Thin wrapper around `env_logger`, configured from [`crate::config::LoggingConfig`]
//! rather than the `RUST_LOG` environment variable alone, so the same binary
//! behaves the same way regardless of the shell it's launched from.

use std::io::Write;

use crate::config::LoggingConfig;

/// Initialize the global logger. Safe to call once per process; a second
/// call is a no-op (the underlying `env_logger::try_init` just errors and
/// we swallow it).
pub fn init(config: &LoggingConfig) {
    let level: log::LevelFilter = config.level.into();
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.target(),
                record.args()
            )
        });
    let _ = builder.try_init();
}

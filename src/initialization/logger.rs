//! Logger setup for embedding services.
//!
//! Records from this crate are tagged with the engine component that emitted
//! them (`geoip`, `ledger`, `writer`, `watcher` and so on) rather than the full
//! module path, so a reload or publish can be followed across components.

use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use colored::*;
use log::{Level, LevelFilter, Record};

use crate::config::{Config, LogFormat};
use crate::error_handling::InitializationError;

const CRATE_TARGET: &str = "geolize";

/// Installs the global logger using the level and format from `config`.
pub fn init_logger(config: &Config) -> Result<(), InitializationError> {
    init_logger_with(config.log_level.clone().into(), config.log_format.clone())
}

/// Installs the global logger.
///
/// `RUST_LOG` is read first; `level` then applies to this crate and as the
/// default. Filesystem-notification internals are held at `warn`.
///
/// Fails with [`InitializationError::LoggerError`] if a logger is already set.
pub fn init_logger_with(level: LevelFilter, format: LogFormat) -> Result<(), InitializationError> {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .filter_level(level)
        .filter_module("notify", LevelFilter::Warn)
        .filter_module("inotify", LevelFilter::Warn)
        .filter_module("mio", LevelFilter::Warn)
        .filter_module(CRATE_TARGET, level);

    match format {
        LogFormat::Json => builder.format(|buf, record| {
            writeln!(buf, "{}", json_line(Utc::now(), record))
        }),
        LogFormat::Plain => builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {} {:>8} | {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                paint(record.level()),
                component(record.target()).cyan(),
                record.args()
            )
        }),
    };

    builder.try_init()?;
    Ok(())
}

/// `geolize::writer::apply` -> `writer`. Other crates keep their full target.
fn component(target: &str) -> &str {
    match target.strip_prefix(CRATE_TARGET) {
        Some("") => CRATE_TARGET,
        Some(rest) if rest.starts_with("::") => rest[2..].split("::").next().unwrap_or(target),
        _ => target,
    }
}

fn paint(level: Level) -> ColoredString {
    let text = format!("{level:<5}");
    match level {
        Level::Error => text.red().bold(),
        Level::Warn => text.yellow(),
        Level::Info => text.green(),
        Level::Debug => text.blue(),
        Level::Trace => text.dimmed(),
    }
}

fn json_line(now: DateTime<Utc>, record: &Record<'_>) -> serde_json::Value {
    serde_json::json!({
        "ts": now.to_rfc3339_opts(SecondsFormat::Millis, true),
        "level": record.level().as_str(),
        "component": component(record.target()),
        "msg": record.args().to_string(),
    })
}

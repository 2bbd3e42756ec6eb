//! Logging initialization and configuration.
//!
//! Uses the `tracing` ecosystem for structured logging with support for
//! both human-readable and JSON output formats.

use anyhow::Context;
use prism_core::config::LoggingConfig;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging subsystem.
///
/// # Notes
///
/// - Log output goes to stderr (stdout is reserved for data output)
/// - The RUST_LOG environment variable overrides the level
/// - `verbose` forces DEBUG, `json_logs` forces JSON regardless of `settings`
/// - `settings.file`, when set, receives a plain-text copy of every line
pub fn init(settings: &LoggingConfig, verbose: bool, json_logs: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { settings.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json_format = json_logs || settings.format == "json";

    let log_file = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            Some(Mutex::new(file))
        }
        None => None,
    };

    if json_format {
        // JSON format for machine parsing
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(log_file.map(|file| fmt::layer().with_ansi(false).with_writer(file)))
            .init();
    } else {
        // Pretty format for humans
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .with(log_file.map(|file| fmt::layer().with_ansi(false).with_writer(file)))
            .init();
    }

    Ok(())
}

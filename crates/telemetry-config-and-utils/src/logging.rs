//! Logging initialization for pipeline binaries.
//!
//! Thin wrapper over the `observability` package: structured JSONL goes to
//! `<base>/logs/pipeline.jsonl`, or to `TELEMETRY_LOG_PATH` when set.

use crate::Paths;
use std::path::PathBuf;

pub use observability::{init, init_with_config, LogConfig};

/// Initialize logging for `service_name` at `level`.
///
/// `RUST_LOG` still overrides `level`. Failing to open the log file is
/// reported on stderr and never aborts the process.
pub fn init_logging(service_name: &str, level: &str, paths: &Paths) {
    let log_path = std::env::var("TELEMETRY_LOG_PATH")
        .ok()
        .and_then(non_empty_env)
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.log_file());

    let config = LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        log_path: Some(log_path.clone()),
        also_stderr: true,
        ..Default::default()
    };

    if let Err(e) = init_with_config(config) {
        eprintln!("failed to open log file {}: {}", log_path.display(), e);
    }
}

fn non_empty_env(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

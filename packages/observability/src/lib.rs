//! # Observability
//!
//! Centralized logging for the telemetry pipeline.
//!
//! Services call `observability::init()` once at startup and use standard
//! `tracing` macros everywhere else. Every event is written as one JSON
//! object per line to a central file (`~/.telemetry/logs/pipeline.jsonl` by
//! default), so the stream can be followed with `tail -f ... | jq`.
//!
//! Queued payloads are user data. Fields named in `LogConfig::redacted_fields`
//! are replaced with their byte length before they reach the log file.
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "telemetryd".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     })
//!     .ok();
//!     tracing::info!("ready");
//! }
//! ```

mod json_layer;
mod sink;

use std::path::PathBuf;

pub use json_layer::{JsonLayer, LogEntry};
pub use sink::{CentralLogWriter, WriterFactory};

/// Field names that carry raw payloads and are redacted by default.
pub const DEFAULT_REDACTED_FIELDS: &[&str] = &["payload", "data"];

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line.
    pub service_name: String,

    /// Default log level filter. `RUST_LOG` takes precedence.
    pub default_level: String,

    /// Custom log file path. Defaults to `~/.telemetry/logs/pipeline.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,

    /// Structured fields whose values are replaced by their length.
    pub redacted_fields: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
            redacted_fields: DEFAULT_REDACTED_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) -> std::io::Result<PathBuf> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
///
/// Returns the path of the JSONL file. Fails only if the file cannot be
/// opened; a second call in the same process is a no-op.
pub fn init_with_config(config: LogConfig) -> std::io::Result<PathBuf> {
    sink::init_subscriber(&config)
}

/// Default central log file location.
pub fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".telemetry")
        .join("logs")
        .join("pipeline.jsonl")
}

pub use tracing::{debug, error, info, instrument, trace, warn, Level};

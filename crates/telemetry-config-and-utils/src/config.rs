//! Configuration management for the pipeline.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use telemetry_database::Stream;
use url::Url;

/// Default ingestion endpoint (can be overridden at compile time via
/// TELEMETRY_DEFAULT_ENDPOINT).
pub const DEFAULT_ENDPOINT: &str = match option_env!("TELEMETRY_DEFAULT_ENDPOINT") {
    Some(url) => url,
    None => "https://ingest.example.com",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the ingestion endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Queue and flush tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            endpoint: default_endpoint(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `<base>/config.json`, falling back to
    /// defaults, then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.pipeline.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override fields from environment variables.
    ///
    /// Recognized: TELEMETRY_LOG_LEVEL, TELEMETRY_ENDPOINT,
    /// TELEMETRY_FLUSH_INTERVAL_MS.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(log_level) = lookup("TELEMETRY_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(endpoint) = lookup("TELEMETRY_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(ms) = lookup("TELEMETRY_FLUSH_INTERVAL_MS").and_then(|s| s.parse().ok()) {
            self.pipeline.flush_interval_ms = ms;
        }
    }

    /// Get the endpoint as a parsed URL.
    pub fn endpoint_url(&self) -> CoreResult<Url> {
        Url::parse(&self.endpoint).map_err(CoreError::from)
    }
}

/// Immutable tuning snapshot consumed by the worker and flush protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base interval between scheduled flushes.
    pub flush_interval_ms: u64,
    /// Ceiling for the backoff-extended flush interval.
    pub max_backoff_ms: u64,
    /// Maximum records per submitted batch.
    pub max_batch_rows: usize,
    /// Maximum cumulative payload bytes per submitted batch.
    pub max_batch_bytes: usize,
    /// Eviction threshold per stream (0 disables the ceiling).
    pub max_rows_per_stream: u64,
    /// Maximum batches submitted in one flush cycle.
    pub max_batches_per_flush: usize,
    /// How long shutdown waits for the worker to drain.
    pub shutdown_timeout_ms: u64,
    /// Upper bound on a single submission.
    pub submit_timeout_ms: u64,
    /// Bounded mailbox capacity.
    pub mailbox_capacity: usize,
    /// Row count (per stream and token) that triggers a flush after an
    /// enqueue. 0 disables.
    pub flush_threshold_rows: u64,
    /// Records older than this are purged at the start of a flush cycle.
    pub data_retention_ms: Option<u64>,
    /// Order in which streams are flushed.
    pub stream_order: Vec<Stream>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 60_000,
            max_backoff_ms: 600_000,
            max_batch_rows: 50,
            max_batch_bytes: 1_048_576,
            max_rows_per_stream: 10_000,
            max_batches_per_flush: 20,
            shutdown_timeout_ms: 5_000,
            submit_timeout_ms: 30_000,
            mailbox_capacity: 1_024,
            flush_threshold_rows: 40,
            data_retention_ms: Some(5 * 24 * 60 * 60 * 1_000),
            stream_order: Stream::ALL.to_vec(),
        }
    }
}

impl PipelineConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn data_retention(&self) -> Option<Duration> {
        self.data_retention_ms.map(Duration::from_millis)
    }

    /// Reject settings that would stall or spin the worker.
    pub fn validate(&self) -> CoreResult<()> {
        if self.flush_interval_ms == 0 {
            return Err(CoreError::Config("flush_interval_ms must be > 0".into()));
        }
        if self.max_backoff_ms < self.flush_interval_ms {
            return Err(CoreError::Config(
                "max_backoff_ms must be >= flush_interval_ms".into(),
            ));
        }
        if self.max_batch_rows == 0 || self.max_batch_bytes == 0 {
            return Err(CoreError::Config("batch limits must be > 0".into()));
        }
        if self.max_batches_per_flush == 0 {
            return Err(CoreError::Config("max_batches_per_flush must be > 0".into()));
        }
        if self.mailbox_capacity == 0 {
            return Err(CoreError::Config("mailbox_capacity must be > 0".into()));
        }
        if self.stream_order.is_empty() {
            return Err(CoreError::Config("stream_order must name at least one stream".into()));
        }
        Ok(())
    }
}

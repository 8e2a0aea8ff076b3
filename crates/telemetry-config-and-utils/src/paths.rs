//! File system paths for the pipeline.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Name of the runtime directory under the user's home.
const BASE_DIR_NAME: &str = ".telemetry";

/// Manages file system paths.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.telemetry)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.telemetry`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory.
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (<base>/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the queue database path (<base>/queue.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("queue.sqlite")
    }

    /// Get the logs directory (<base>/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file (<base>/logs/pipeline.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("pipeline.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

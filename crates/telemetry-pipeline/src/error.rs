//! Pipeline error types.

use std::time::Duration;
use telemetry_config_and_utils::CoreError;
use telemetry_database::DatabaseError;
use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pipeline settings would stall or spin the worker.
    #[error("Invalid pipeline config: {0}")]
    Config(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Submit error: {0}")]
    Submit(String),

    /// The worker mailbox stopped accepting commands.
    #[error("Worker mailbox closed")]
    MailboxClosed,

    /// The worker did not drain within the shutdown budget and was aborted.
    #[error("Worker did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;

//! # telemetry-pipeline
//!
//! Client-side delivery pipeline for queued telemetry.
//!
//! ```text
//! caller ──▶ Dispatcher ──▶ mailbox ──▶ Worker ──▶ QueueStore (append)
//!                                          │
//!                        timer / flush ───▶ Flusher ──▶ QueueStore (peek)
//!                                                   ──▶ Submitter
//!                                                   ──▶ QueueStore (delete)
//! ```
//!
//! - [`Dispatcher`]: non-blocking `track`/`flush`/`clear` plus a bounded
//!   `shutdown`. Starts the worker lazily and restarts it after shutdown.
//! - [`WorkerHandle`]: one task owning the store, draining commands in FIFO
//!   order.
//! - [`Flusher`]: batches per stream and token, submits, and deletes on
//!   acceptance or permanent rejection.
//! - [`Backoff`]: exponential extension of the scheduled flush interval
//!   after transient failures, reset by any accepted batch.
//!
//! ```ignore
//! let dispatcher = Dispatcher::new(Handle::current(), db_path, config, submitter)?;
//! dispatcher.track(Stream::Events, r#"{"event":"signup"}"#, "project-token");
//! dispatcher.flush(true);
//! dispatcher.shutdown().await?;
//! ```

mod backoff;
mod dispatcher;
mod error;
mod flush;
mod stats;
mod submitter;
mod worker;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use dispatcher::Dispatcher;
pub use error::{PipelineError, PipelineResult};
pub use flush::{FlushOutcome, FlushReport, Flusher};
pub use stats::{PipelineStats, StatsSnapshot};
pub use submitter::{
    classify_status, serialize_batch, stream_path, HttpSubmitter, SubmitOutcome, Submitter,
    TOKEN_HEADER,
};
pub use worker::{Command, Schedule, WorkerHandle, WorkerSpec, WorkerState};

//! SQLite persistence for the telemetry pipeline.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Database migrations (one table per stream)
//! - Model types for records and batches
//! - Query helpers for the queue tables
//! - `QueueStore`, the bounded, transactional per-stream queue
//!
//! # Architecture
//!
//! `AsyncDatabase` runs every statement on one dedicated thread. Queries are
//! sent through a channel and executed in FIFO order.
//!
//! ```ignore
//! let store = QueueStore::open(path, 10_000).await?;
//! store.append(NewRecord::new(Stream::Events, token, payload)).await?;
//! let batch = store.peek_batch(Stream::Events, token, 50, 1 << 20).await?;
//! ```

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod store;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, schema_version, CURRENT_VERSION};
pub use models::*;
pub use store::QueueStore;

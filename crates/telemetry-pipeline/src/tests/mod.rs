//! Integration tests for the pipeline.
//!
//! - `harness.rs`      - Scriptable mock submitter and a dispatcher over a temp database
//! - `ordering.rs`     - FIFO processing, insertion order, stream priority
//! - `durability.rs`   - Reconciling the store against submission outcomes
//! - `backoff.rs`      - Flush scheduling, backoff growth and reset
//! - `shutdown.rs`     - Drain, timeout and worker recreation
//! - `eviction.rs`     - Per-stream row ceilings
//! - `backpressure.rs` - Full mailbox behavior
//! - `concurrency.rs`  - Many callers, overlapping shutdowns

mod durability;
mod eviction;
pub(crate) mod harness;

//! Test harness for pipeline integration tests.
//!
//! Provides:
//! - MockSubmitter: a submitter with scripted outcomes and an optional delay
//! - TestHarness: a dispatcher over a temporary on-disk queue

use crate::{Dispatcher, SubmitOutcome, Submitter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetry_config_and_utils::PipelineConfig;
use telemetry_database::{QueueStore, Stream};
use tempfile::TempDir;
use tokio::runtime::Handle;

/// One batch as seen by the mock.
#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    pub stream: Stream,
    pub token: String,
    pub payloads: Vec<serde_json::Value>,
}

impl SubmittedBatch {
    /// The `i` field of each payload, for payloads built with `payload(i)`.
    pub fn indices(&self) -> Vec<i64> {
        self.payloads
            .iter()
            .filter_map(|p| p["i"].as_i64())
            .collect()
    }
}

/// Submitter returning scripted outcomes, then a default.
pub struct MockSubmitter {
    script: Mutex<VecDeque<SubmitOutcome>>,
    default_outcome: Mutex<SubmitOutcome>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<SubmittedBatch>>,
}

impl MockSubmitter {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(SubmitOutcome::Accepted),
            delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes for the next submissions, in order.
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = SubmitOutcome>) {
        self.script.lock().extend(outcomes);
    }

    pub fn set_default_outcome(&self, outcome: SubmitOutcome) {
        *self.default_outcome.lock() = outcome;
    }

    /// Delay every submission by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<SubmittedBatch> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Submitter for MockSubmitter {
    async fn submit(&self, stream: Stream, body: &str, token: &str) -> SubmitOutcome {
        let payloads: Vec<serde_json::Value> =
            serde_json::from_str(body).expect("batch body must be a JSON array");
        self.calls.lock().push(SubmittedBatch {
            stream,
            token: token.to_string(),
            payloads,
        });

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.default_outcome.lock().clone())
    }
}

/// Pipeline config for tests: the timer never fires on its own and no
/// implicit flushes or purges happen.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        flush_interval_ms: 3_600_000,
        max_backoff_ms: 4 * 3_600_000,
        max_batch_rows: 50,
        max_batch_bytes: 1_048_576,
        max_rows_per_stream: 0,
        max_batches_per_flush: 100,
        shutdown_timeout_ms: 5_000,
        submit_timeout_ms: 5_000,
        mailbox_capacity: 1_024,
        flush_threshold_rows: 0,
        data_retention_ms: None,
        stream_order: Stream::ALL.to_vec(),
    }
}

/// Payload with a single `i` field.
pub fn payload(i: i64) -> String {
    format!("{{\"i\":{}}}", i)
}

/// Dispatcher plus mock over a temporary database file.
pub struct TestHarness {
    pub dispatcher: Dispatcher,
    pub submitter: Arc<MockSubmitter>,
    db_path: PathBuf,
    _temp_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Must be called from inside a Tokio runtime.
    pub fn with_config(config: PipelineConfig) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let db_path = temp_dir.path().join("queue.sqlite");
        let submitter = Arc::new(MockSubmitter::new());
        let dispatcher = Dispatcher::new(
            Handle::current(),
            db_path.clone(),
            Arc::new(config),
            submitter.clone(),
        )
        .expect("valid pipeline config");

        Self {
            dispatcher,
            submitter,
            db_path,
            _temp_dir: temp_dir,
        }
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Open a second, unbounded view of the queue for assertions.
    pub async fn open_store(&self) -> QueueStore {
        QueueStore::open(&self.db_path, 0).await.expect("open store")
    }

    /// Stored payloads for a stream and token, in queue order.
    pub async fn stored(&self, stream: Stream, token: &str) -> Vec<String> {
        let store = self.open_store().await;
        let batch = store
            .peek_batch(stream, token, 10_000, usize::MAX)
            .await
            .expect("peek");
        store.close().await.expect("close");
        batch.records.into_iter().map(|r| r.data).collect()
    }

    /// `i` fields of stored payloads, in queue order.
    pub async fn stored_indices(&self, stream: Stream, token: &str) -> Vec<i64> {
        self.stored(stream, token)
            .await
            .iter()
            .filter_map(|data| serde_json::from_str::<serde_json::Value>(data).ok())
            .filter_map(|v| v["i"].as_i64())
            .collect()
    }

    pub fn track_range(&self, stream: Stream, token: &str, range: std::ops::Range<i64>) {
        for i in range {
            self.dispatcher.track(stream, payload(i), token);
        }
    }
}

/// Poll `check` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

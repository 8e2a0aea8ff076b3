//! Durable, bounded queue store with one table per stream.

use crate::{
    queries, AppendOutcome, AsyncDatabase, Batch, DatabaseResult, NewRecord, Stream,
    StreamTokenCount,
};
use chrono::Utc;
use std::path::Path;
use tracing::debug;

/// Transactional queue store.
///
/// Every operation runs as one closure on the database executor thread, so
/// each is atomic with respect to the others. A store is meant to be driven
/// by a single owner; cloning shares the same executor.
#[derive(Clone)]
pub struct QueueStore {
    db: AsyncDatabase,
    max_rows_per_stream: u64,
}

impl QueueStore {
    /// Open (or create) a store at `path`. `max_rows_per_stream == 0` means
    /// unbounded.
    pub async fn open(path: &Path, max_rows_per_stream: u64) -> DatabaseResult<Self> {
        let db = AsyncDatabase::open(path).await?;
        Ok(Self::new(db, max_rows_per_stream))
    }

    /// Open an in-memory store for testing.
    pub async fn open_in_memory(max_rows_per_stream: u64) -> DatabaseResult<Self> {
        let db = AsyncDatabase::open_in_memory().await?;
        Ok(Self::new(db, max_rows_per_stream))
    }

    pub fn new(db: AsyncDatabase, max_rows_per_stream: u64) -> Self {
        Self {
            db,
            max_rows_per_stream,
        }
    }

    pub fn max_rows_per_stream(&self) -> u64 {
        self.max_rows_per_stream
    }

    /// Append a record stamped with the current time.
    pub async fn append(&self, record: NewRecord) -> DatabaseResult<AppendOutcome> {
        self.append_at(record, Utc::now().timestamp_millis()).await
    }

    /// Append a record with an explicit creation timestamp (ms since epoch).
    pub async fn append_at(&self, record: NewRecord, created_at: i64) -> DatabaseResult<AppendOutcome> {
        let max_rows = self.max_rows_per_stream;
        let outcome = self
            .db
            .call(move |conn| queries::append_record(conn, &record, created_at, max_rows))
            .await?;
        debug!(id = outcome.id, evicted = outcome.evicted, "Appended record");
        Ok(outcome)
    }

    /// Read the next batch for a token without mutating anything.
    pub async fn peek_batch(
        &self,
        stream: Stream,
        token: &str,
        max_rows: usize,
        max_bytes: usize,
    ) -> DatabaseResult<Batch> {
        let token = token.to_string();
        self.db
            .call(move |conn| queries::peek_batch(conn, stream, &token, max_rows, max_bytes))
            .await
    }

    /// Delete exactly the given ids.
    pub async fn delete_batch(&self, stream: Stream, ids: Vec<i64>) -> DatabaseResult<usize> {
        self.db
            .call(move |conn| queries::delete_batch(conn, stream, &ids))
            .await
    }

    /// Delete every record created at or before `cutoff` (ms since epoch).
    pub async fn purge_older_than(&self, stream: Stream, cutoff: i64) -> DatabaseResult<usize> {
        self.db
            .call(move |conn| queries::purge_older_than(conn, stream, cutoff))
            .await
    }

    /// Delete every record owned by `token` in a stream.
    pub async fn delete_token(&self, stream: Stream, token: &str) -> DatabaseResult<usize> {
        let token = token.to_string();
        self.db
            .call(move |conn| queries::delete_token(conn, stream, &token))
            .await
    }

    pub async fn count(&self, stream: Stream, token: &str) -> DatabaseResult<u64> {
        let token = token.to_string();
        self.db
            .call(move |conn| queries::count(conn, stream, &token))
            .await
    }

    pub async fn distinct_tokens(&self, stream: Stream) -> DatabaseResult<Vec<String>> {
        self.db
            .call(move |conn| queries::distinct_tokens(conn, stream))
            .await
    }

    /// Per-stream, per-token row counts.
    pub async fn status(&self) -> DatabaseResult<Vec<StreamTokenCount>> {
        self.db
            .call(|conn| {
                let mut out = Vec::new();
                for stream in Stream::ALL {
                    for (token, count) in queries::token_counts(conn, stream)? {
                        out.push(StreamTokenCount {
                            stream,
                            token,
                            count,
                        });
                    }
                }
                Ok(out)
            })
            .await
    }

    /// Release the executor thread.
    pub async fn close(self) -> DatabaseResult<()> {
        self.db.close().await
    }
}

//! Flush protocol: drain stored batches through the submitter.
//!
//! One cycle:
//! 1. Purge records past the retention window (if configured).
//! 2. For each stream in `stream_order`, for each token present in it, peek a
//!    batch, submit it, and reconcile:
//!    - `Accepted`: delete exactly the submitted ids, then peek again.
//!    - `RejectedPermanently`: delete the ids anyway and move to the next
//!      token.
//!    - `TransientFailure` (or submit timeout): keep the batch and abort the
//!      cycle.
//! 3. Stop after `max_batches_per_flush` submissions.
//!
//! The caller (the worker) owns the backoff schedule; this module only
//! reports what happened.

use crate::stats::PipelineStats;
use crate::submitter::{serialize_batch, SubmitOutcome, Submitter};
use serde::Serialize;
use std::sync::Arc;
use telemetry_config_and_utils::PipelineConfig;
use telemetry_database::{DatabaseResult, QueueStore, Stream};
use tracing::{debug, error, info, warn};

/// How a flush cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Every stream was drained.
    Completed,
    /// The per-cycle batch ceiling was hit with records left over.
    BatchLimitReached,
    /// A submission failed transiently; the rest of the cycle was skipped.
    Transient(String),
    /// The store failed mid-cycle; nothing was deleted for the failed step.
    StorageError(String),
    /// A scheduled flush arrived while the backoff window was still open.
    Skipped,
}

/// Summary of one flush cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub outcome: FlushOutcome,
    /// Submissions attempted.
    pub batches_submitted: usize,
    /// Submissions that came back `Accepted`.
    pub batches_accepted: usize,
    pub accepted_records: u64,
    pub rejected_records: u64,
    pub purged_records: u64,
}

impl FlushReport {
    fn new() -> Self {
        Self {
            outcome: FlushOutcome::Completed,
            batches_submitted: 0,
            batches_accepted: 0,
            accepted_records: 0,
            rejected_records: 0,
            purged_records: 0,
        }
    }

    pub fn skipped() -> Self {
        Self {
            outcome: FlushOutcome::Skipped,
            ..Self::new()
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.outcome, FlushOutcome::Transient(_))
    }
}

/// Control flow out of one token's drain loop.
enum Drain {
    Continue,
    LimitReached,
    Abort(String),
}

/// Runs flush cycles against a store.
pub struct Flusher {
    config: Arc<PipelineConfig>,
    submitter: Arc<dyn Submitter>,
    stats: Arc<PipelineStats>,
}

impl Flusher {
    pub fn new(
        config: Arc<PipelineConfig>,
        submitter: Arc<dyn Submitter>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            config,
            submitter,
            stats,
        }
    }

    /// Run one cycle. `now_ms` is the current time in ms since the epoch and
    /// anchors the retention cutoff.
    pub async fn run(&self, store: &QueueStore, now_ms: i64) -> FlushReport {
        let mut report = FlushReport::new();

        if let Err(e) = self.run_cycle(store, now_ms, &mut report).await {
            error!(error = %e, unavailable = e.is_unavailable(), "Flush aborted by storage error");
            report.outcome = FlushOutcome::StorageError(e.to_string());
        }

        if report.batches_submitted > 0 || report.purged_records > 0 {
            info!(
                outcome = ?report.outcome,
                batches = report.batches_submitted,
                accepted = report.accepted_records,
                rejected = report.rejected_records,
                purged = report.purged_records,
                "Flush cycle finished"
            );
        }
        report
    }

    async fn run_cycle(
        &self,
        store: &QueueStore,
        now_ms: i64,
        report: &mut FlushReport,
    ) -> DatabaseResult<()> {
        if let Some(retention) = self.config.data_retention() {
            let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
            let cutoff = now_ms.saturating_sub(retention_ms);
            for &stream in &self.config.stream_order {
                let purged = store.purge_older_than(stream, cutoff).await? as u64;
                if purged > 0 {
                    warn!(stream = %stream, purged, "Purged records past retention");
                    self.stats.record_purged(purged);
                    report.purged_records += purged;
                }
            }
        }

        for &stream in &self.config.stream_order {
            for token in store.distinct_tokens(stream).await? {
                match self.drain_token(store, stream, &token, report).await? {
                    Drain::Continue => {}
                    Drain::LimitReached => {
                        debug!(
                            limit = self.config.max_batches_per_flush,
                            "Batch ceiling reached, leaving the rest for the next cycle"
                        );
                        report.outcome = FlushOutcome::BatchLimitReached;
                        return Ok(());
                    }
                    Drain::Abort(reason) => {
                        report.outcome = FlushOutcome::Transient(reason);
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn drain_token(
        &self,
        store: &QueueStore,
        stream: Stream,
        token: &str,
        report: &mut FlushReport,
    ) -> DatabaseResult<Drain> {
        loop {
            let batch = store
                .peek_batch(
                    stream,
                    token,
                    self.config.max_batch_rows,
                    self.config.max_batch_bytes,
                )
                .await?;
            if batch.is_empty() {
                return Ok(Drain::Continue);
            }
            if report.batches_submitted >= self.config.max_batches_per_flush {
                return Ok(Drain::LimitReached);
            }

            let body = serialize_batch(&batch);
            let records = batch.len() as u64;
            report.batches_submitted += 1;

            let outcome = match tokio::time::timeout(
                self.config.submit_timeout(),
                self.submitter.submit(stream, &body, token),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => SubmitOutcome::TransientFailure(format!(
                    "submission timed out after {:?}",
                    self.config.submit_timeout()
                )),
            };

            match outcome {
                SubmitOutcome::Accepted => {
                    store.delete_batch(stream, batch.ids()).await?;
                    debug!(stream = %stream, token = %token, records, "Batch accepted");
                    self.stats.record_accepted(records);
                    report.batches_accepted += 1;
                    report.accepted_records += records;
                }
                SubmitOutcome::RejectedPermanently(reason) => {
                    store.delete_batch(stream, batch.ids()).await?;
                    warn!(
                        stream = %stream,
                        token = %token,
                        records,
                        reason = %reason,
                        "Batch rejected permanently, discarding"
                    );
                    self.stats.record_rejected(records);
                    report.rejected_records += records;
                    return Ok(Drain::Continue);
                }
                SubmitOutcome::TransientFailure(reason) => {
                    warn!(
                        stream = %stream,
                        token = %token,
                        records,
                        reason = %reason,
                        "Batch submission failed, will retry"
                    );
                    self.stats.record_transient_failure();
                    return Ok(Drain::Abort(reason));
                }
            }
        }
    }
}

//! Reconciling the store against submission outcomes.
//!
//! - Transient failures and timeouts keep the batch
//! - Acceptance deletes exactly the submitted records
//! - Permanent rejection discards the batch and moves on
//! - Retention purge, token clearing and the per-cycle batch ceiling

use super::harness::{payload, test_config, TestHarness};
use crate::{FlushOutcome, SubmitOutcome};
use chrono::Utc;
use std::time::Duration;
use telemetry_database::{NewRecord, Stream};

#[tokio::test]
async fn transient_failure_keeps_batch_intact() {
    let harness = TestHarness::new();
    harness.track_range(Stream::Events, "T", 0..3);
    harness
        .submitter
        .set_default_outcome(SubmitOutcome::TransientFailure("503".into()));

    let report = harness.dispatcher.flush_and_wait(true).await.unwrap();
    assert!(report.is_transient());
    assert_eq!(report.accepted_records, 0);
    harness.dispatcher.shutdown().await.unwrap();

    let submitted = harness.submitter.calls()[0].indices();
    assert_eq!(harness.stored_indices(Stream::Events, "T").await, submitted);
    assert_eq!(harness.dispatcher.stats().transient_failures, 1);
}

#[tokio::test]
async fn transient_failure_aborts_remaining_streams() {
    let harness = TestHarness::new();
    harness.dispatcher.track(Stream::Events, payload(0), "T");
    harness.dispatcher.track(Stream::People, payload(1), "T");
    harness
        .submitter
        .push_outcomes([SubmitOutcome::TransientFailure("offline".into())]);

    harness.dispatcher.flush_and_wait(true).await.unwrap();
    harness.dispatcher.shutdown().await.unwrap();

    assert_eq!(harness.submitter.call_count(), 1);
    assert_eq!(harness.stored_indices(Stream::People, "T").await, vec![1]);
}

#[tokio::test]
async fn submit_timeout_counts_as_transient() {
    let mut config = test_config();
    config.submit_timeout_ms = 50;
    let harness = TestHarness::with_config(config);
    harness.submitter.set_delay(Duration::from_millis(500));
    harness.track_range(Stream::Events, "T", 0..2);

    let report = harness.dispatcher.flush_and_wait(true).await.unwrap();
    assert!(matches!(report.outcome, FlushOutcome::Transient(ref reason) if reason.contains("timed out")));
    harness.dispatcher.shutdown().await.unwrap();

    assert_eq!(harness.stored_indices(Stream::Events, "T").await, vec![0, 1]);
}

#[tokio::test]
async fn accepted_batch_deletes_only_submitted_records() {
    let mut config = test_config();
    config.max_batch_rows = 2;
    config.max_batches_per_flush = 1;
    let harness = TestHarness::with_config(config);
    harness.track_range(Stream::Events, "T", 0..5);

    let report = harness.dispatcher.flush_and_wait(true).await.unwrap();
    assert_eq!(report.outcome, FlushOutcome::BatchLimitReached);
    assert_eq!(report.accepted_records, 2);
    harness.dispatcher.shutdown().await.unwrap();

    assert_eq!(harness.stored_indices(Stream::Events, "T").await, vec![2, 3, 4]);
}

#[tokio::test]
async fn records_tracked_during_submission_survive() {
    let harness = TestHarness::new();
    harness.submitter.set_delay(Duration::from_millis(200));
    harness.track_range(Stream::Events, "T", 0..2);

    let flush = harness.dispatcher.flush_and_wait(true);
    let late = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.dispatcher.track(Stream::Events, payload(2), "T");
    };
    let (report, ()) = tokio::join!(flush, late);
    assert_eq!(report.unwrap().accepted_records, 2);

    harness.dispatcher.shutdown().await.unwrap();
    assert_eq!(harness.submitter.calls()[0].indices(), vec![0, 1]);
    assert_eq!(harness.stored_indices(Stream::Events, "T").await, vec![2]);
}

#[tokio::test]
async fn permanent_rejection_discards_and_continues() {
    let harness = TestHarness::new();
    harness.dispatcher.track(Stream::Events, payload(0), "T");
    harness.dispatcher.track(Stream::People, payload(1), "T");
    harness
        .submitter
        .push_outcomes([SubmitOutcome::RejectedPermanently("HTTP 400".into())]);

    let report = harness.dispatcher.flush_and_wait(true).await.unwrap();
    assert_eq!(report.outcome, FlushOutcome::Completed);
    assert_eq!(report.rejected_records, 1);
    assert_eq!(report.accepted_records, 1);
    harness.dispatcher.shutdown().await.unwrap();

    assert!(harness.stored(Stream::Events, "T").await.is_empty());
    assert!(harness.stored(Stream::People, "T").await.is_empty());
    assert_eq!(harness.dispatcher.stats().rejected_records, 1);
}

#[tokio::test]
async fn retention_purge_runs_before_submission() {
    let mut config = test_config();
    config.data_retention_ms = Some(60_000);
    let harness = TestHarness::with_config(config);

    let store = harness.open_store().await;
    let stale = Utc::now().timestamp_millis() - 120_000;
    store
        .append_at(NewRecord::new(Stream::Events, "T", payload(0)), stale)
        .await
        .unwrap();
    store.close().await.unwrap();

    harness.dispatcher.track(Stream::Events, payload(1), "T");
    let report = harness.dispatcher.flush_and_wait(true).await.unwrap();
    harness.dispatcher.shutdown().await.unwrap();

    assert_eq!(report.purged_records, 1);
    assert_eq!(harness.submitter.calls()[0].indices(), vec![1]);
    assert_eq!(harness.dispatcher.stats().purged, 1);
}

#[tokio::test]
async fn clear_removes_token_from_every_stream() {
    let harness = TestHarness::new();
    harness.dispatcher.track(Stream::Events, payload(0), "A");
    harness.dispatcher.track(Stream::Groups, payload(1), "A");
    harness.dispatcher.track(Stream::Events, payload(2), "B");
    harness.dispatcher.clear("A");
    harness.dispatcher.shutdown().await.unwrap();

    assert!(harness.stored(Stream::Events, "A").await.is_empty());
    assert!(harness.stored(Stream::Groups, "A").await.is_empty());
    assert_eq!(harness.stored_indices(Stream::Events, "B").await, vec![2]);
}

#[tokio::test]
async fn empty_queue_flush_submits_nothing() {
    let harness = TestHarness::new();
    let report = harness.dispatcher.flush_and_wait(true).await.unwrap();
    assert_eq!(report.outcome, FlushOutcome::Completed);
    assert_eq!(report.batches_submitted, 0);
    assert_eq!(harness.submitter.call_count(), 0);
    harness.dispatcher.shutdown().await.unwrap();
}

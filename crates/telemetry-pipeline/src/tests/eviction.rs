//! Per-stream row ceilings.
//!
//! - A stream never grows past its ceiling; the newest records are kept
//! - Eviction in one stream leaves the others untouched

use super::harness::{payload, test_config, TestHarness};
use telemetry_database::Stream;

#[tokio::test]
async fn ceiling_of_five_keeps_newest_five() {
    let mut config = test_config();
    config.max_rows_per_stream = 5;
    let harness = TestHarness::with_config(config);

    harness.track_range(Stream::Events, "T", 0..7);
    harness.dispatcher.shutdown().await.unwrap();

    assert_eq!(
        harness.stored_indices(Stream::Events, "T").await,
        vec![2, 3, 4, 5, 6]
    );
    let stats = harness.dispatcher.stats();
    assert_eq!(stats.enqueued, 7);
    assert_eq!(stats.evicted, 2);
}

#[tokio::test]
async fn eviction_is_scoped_to_one_stream() {
    let mut config = test_config();
    config.max_rows_per_stream = 3;
    let harness = TestHarness::with_config(config);

    harness.track_range(Stream::People, "T", 100..103);
    harness.track_range(Stream::Events, "T", 0..6);
    harness.dispatcher.shutdown().await.unwrap();

    assert_eq!(harness.stored_indices(Stream::Events, "T").await, vec![3, 4, 5]);
    assert_eq!(
        harness.stored_indices(Stream::People, "T").await,
        vec![100, 101, 102]
    );
}

#[tokio::test]
async fn ceiling_counts_rows_across_tokens() {
    let mut config = test_config();
    config.max_rows_per_stream = 2;
    let harness = TestHarness::with_config(config);

    harness.dispatcher.track(Stream::Groups, payload(0), "A");
    harness.dispatcher.track(Stream::Groups, payload(1), "B");
    harness.dispatcher.track(Stream::Groups, payload(2), "B");
    harness.dispatcher.shutdown().await.unwrap();

    assert!(harness.stored(Stream::Groups, "A").await.is_empty());
    assert_eq!(harness.stored_indices(Stream::Groups, "B").await, vec![1, 2]);
}

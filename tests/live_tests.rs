// LiveCollector tests: same-time merge, revised `to`, late records, flush and the flush writer

mod common;

use std::sync::Arc;

use common::*;
use rollup_engine::aggregate_repo::SqliteAggregateRepo;
use rollup_engine::engine::{AggregateRepository, LiveAggregateSource, RollupEngine};
use rollup_engine::live::{FlushWriterConfig, LiveCollector, spawn_flush_writer};
use rollup_engine::models::*;
use tempfile::TempDir;

async fn open_repo(dir: &TempDir) -> Arc<SqliteAggregateRepo> {
    let path = dir.path().join("aggregates.db");
    let repo = SqliteAggregateRepo::connect(path.to_str().unwrap(), 2)
        .await
        .unwrap();
    repo.init().await.unwrap();
    Arc::new(repo)
}

#[tokio::test]
async fn records_at_the_same_capture_time_merge() {
    let live = LiveCollector::new();
    live.record("svc", throughput(BASE + MINUTE, 3, Some(1)))
        .unwrap();
    live.record("svc", throughput(BASE + MINUTE, 2, Some(0)))
        .unwrap();
    assert_eq!(live.pending_count(), 1);

    let mut out: Vec<ThroughputAggregate> = Vec::new();
    live.merge_into("svc", &AggregateQuery::new(BASE, BASE + HOUR, 0), &mut out)
        .await
        .unwrap();
    assert_eq!(out, vec![throughput(BASE + MINUTE, 5, Some(1))]);
}

#[tokio::test]
async fn merge_into_revises_to_before_the_first_live_record() {
    let live = LiveCollector::new();
    live.record("svc", overview(BASE + 5 * MINUTE, 1, 1.0))
        .unwrap();
    live.record("svc", overview(BASE + 6 * MINUTE, 1, 1.0))
        .unwrap();
    // Outside the window.
    live.record("svc", overview(BASE + 2 * HOUR, 1, 1.0))
        .unwrap();

    let mut out: Vec<OverviewAggregate> = Vec::new();
    let revised_to = live
        .merge_into("svc", &AggregateQuery::new(BASE, BASE + HOUR, 0), &mut out)
        .await
        .unwrap();
    assert_eq!(revised_to, BASE + 5 * MINUTE - 1);
    assert_eq!(out.len(), 2);

    // Other kinds and series are separate.
    let mut other: Vec<ThroughputAggregate> = Vec::new();
    let revised_to = live
        .merge_into("svc", &AggregateQuery::new(BASE, BASE + HOUR, 0), &mut other)
        .await
        .unwrap();
    assert_eq!(revised_to, BASE + HOUR);
    assert!(other.is_empty());
}

#[tokio::test]
async fn invalid_record_is_rejected() {
    let live = LiveCollector::new();
    let err = live
        .record("svc", overview(BASE + MINUTE, 0, 0.0))
        .unwrap_err();
    assert!(err.to_string().contains("transaction count is zero"));
    assert_eq!(live.pending_count(), 0);
}

#[tokio::test]
async fn huge_counts_at_one_capture_time_clamp_instead_of_overflowing() {
    let live = LiveCollector::new();
    let half = MAX_COUNT / 2 + 1;
    live.record("svc", throughput(BASE + MINUTE, half, Some(0)))
        .unwrap();
    live.record("svc", throughput(BASE + MINUTE, half, Some(0)))
        .unwrap();

    let mut out: Vec<ThroughputAggregate> = Vec::new();
    live.merge_into("svc", &AggregateQuery::new(BASE, BASE + HOUR, 0), &mut out)
        .await
        .unwrap();
    assert_eq!(out, vec![throughput(BASE + MINUTE, MAX_COUNT, Some(0))]);
}

#[tokio::test]
async fn count_beyond_storable_range_is_rejected() {
    let live = LiveCollector::new();
    let err = live
        .record("svc", throughput(BASE + MINUTE, MAX_COUNT + 10, Some(0)))
        .unwrap_err();
    assert!(err.to_string().contains("exceeds"));
    let err = live
        .record("svc", overview(-MINUTE, 1, 1.0))
        .unwrap_err();
    assert!(err.to_string().contains("capture time outside"));
    assert_eq!(live.pending_count(), 0);
}

#[tokio::test]
async fn negative_thread_stats_are_rejected() {
    let live = LiveCollector::new();
    let mut record = overview(BASE + MINUTE, 1, 1.0);
    record.thread_stats = Some(ThreadStats {
        cpu_nanos: Some(-1.0),
        ..Default::default()
    });
    let err = live.record("svc", record).unwrap_err();
    assert!(err.to_string().contains("thread stat cpu"));
    assert_eq!(live.pending_count(), 0);
}

#[tokio::test]
async fn transaction_batch_is_recorded_all_or_nothing() {
    let live = LiveCollector::new();
    let t = BASE + MINUTE;
    let mut bad_overview = overview(t, 2, 2_000_000.0);
    bad_overview.thread_stats = Some(ThreadStats {
        blocked_nanos: Some(-5.0),
        ..Default::default()
    });
    let err = live
        .record_transactions(
            "svc",
            throughput(t, 2, Some(0)),
            bad_overview,
            percentile(t, &[1_000_000, 1_000_000]),
        )
        .unwrap_err();
    assert!(err.to_string().contains("thread stat blocked"));
    assert_eq!(live.pending_count(), 0);

    live.record_transactions(
        "svc",
        throughput(t, 2, Some(0)),
        overview(t, 2, 2_000_000.0),
        percentile(t, &[1_000_000, 1_000_000]),
    )
    .unwrap();
    assert_eq!(live.pending_count(), 3);
}

#[tokio::test]
async fn late_transaction_batch_leaves_nothing_pending() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let live = LiveCollector::new();
    live.flush(&repo, BASE + 2 * MINUTE).await.unwrap();

    let t = BASE + 2 * MINUTE;
    let err = live
        .record_transactions(
            "svc",
            throughput(t, 1, Some(0)),
            overview(t, 1, 1_000_000.0),
            percentile(t, &[1_000_000]),
        )
        .unwrap_err();
    assert!(err.to_string().contains("late"));
    assert_eq!(live.pending_count(), 0);
}

#[tokio::test]
async fn flush_persists_settled_records_and_rejects_late_ones() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let live = LiveCollector::new();
    live.record("svc", overview(BASE + MINUTE, 1, 1.0)).unwrap();
    live.record("svc", overview(BASE + 3 * MINUTE, 1, 1.0))
        .unwrap();

    let flushed = live.flush(&repo, BASE + 2 * MINUTE).await.unwrap();
    assert_eq!(flushed, 1);
    assert_eq!(live.pending_count(), 1);
    assert_eq!(live.records_flushed_total(), 1);

    let persisted: Vec<OverviewAggregate> = repo.read("svc", BASE, BASE + HOUR, 0).await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].capture_time, BASE + MINUTE);

    let err = live
        .record("svc", overview(BASE + 2 * MINUTE, 1, 1.0))
        .unwrap_err();
    assert!(err.to_string().contains("late"));
}

#[tokio::test]
async fn query_sees_each_record_once_across_a_flush() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let live = Arc::new(LiveCollector::new());
    let clock = FixedClock::new(BASE + HOUR);
    for i in 0..10 {
        live.record("svc", overview(BASE + (i + 1) * MINUTE, 1, 1_000_000.0))
            .unwrap();
    }
    let engine = RollupEngine::new(
        Arc::clone(&repo),
        Arc::clone(&live),
        test_policy(clock),
        Default::default(),
    );
    let query = AggregateQuery::new(BASE, BASE + HOUR, 1);

    let before: Vec<OverviewAggregate> = engine.get_aggregates("svc", &query, false).await.unwrap();
    live.flush(&repo, BASE + 5 * MINUTE).await.unwrap();
    let after: Vec<OverviewAggregate> = engine.get_aggregates("svc", &query, false).await.unwrap();

    assert_eq!(before, after);
    assert_eq!(after.iter().map(|r| r.transaction_count).sum::<u64>(), 10);
}

#[tokio::test]
async fn flush_writer_flushes_everything_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let live = Arc::new(LiveCollector::new());
    let clock = FixedClock::new(BASE);
    live.record("svc", overview(BASE + MINUTE, 1, 1.0)).unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = spawn_flush_writer(
        Arc::clone(&live),
        Arc::clone(&repo),
        clock,
        FlushWriterConfig {
            flush_interval_secs: 3600,
            flush_delay_millis: 0,
        },
        shutdown_rx,
    );
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    // Ahead of the clock: not settled by the periodic flush.
    assert_eq!(live.pending_count(), 1);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
    assert_eq!(live.pending_count(), 0);
    let persisted: Vec<OverviewAggregate> = repo.read("svc", BASE, BASE + HOUR, 0).await.unwrap();
    assert_eq!(persisted.len(), 1);
}

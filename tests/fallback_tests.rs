// Coarsest-level fallback tests: retention gaps, orphaned coarse buckets, recent windows

mod common;

use std::sync::Arc;

use common::*;
use rollup_engine::live::LiveCollector;
use rollup_engine::models::*;

const COARSE: i64 = 4 * HOUR;

fn engine_at(repo: Arc<MemoryRepo>, now: i64) -> rollup_engine::engine::RollupEngine<MemoryRepo, LiveCollector> {
    test_engine(repo, Arc::new(LiveCollector::new()), FixedClock::new(now))
}

#[test]
fn fallback_only_for_fine_levels_reaching_past_two_coarse_intervals() {
    let now = BASE + 10 * DAY;
    let engine = engine_at(MemoryRepo::new(), now);
    assert!(engine.should_fallback(&AggregateQuery::new(now - 9 * HOUR, now, 1)));
    assert!(engine.should_fallback(&AggregateQuery::new(now - 9 * HOUR, now, 0)));
    assert!(!engine.should_fallback(&AggregateQuery::new(now - 7 * HOUR, now, 1)));
    assert!(!engine.should_fallback(&AggregateQuery::new(now - 9 * HOUR, now, 2)));
}

#[tokio::test]
async fn window_past_all_retained_data_is_expired() {
    let now = BASE + 400 * DAY;
    let repo = MemoryRepo::new();
    // Only year-old coarse data exists.
    repo.insert("svc", 2, vec![overview(BASE + COARSE, 5, 5_000_000.0)]);
    let engine = engine_at(repo, now);

    let query = AggregateQuery::new(now - 7 * DAY, now, 1);
    let result = engine
        .get_aggregates_with_fallback::<OverviewAggregate>("svc", &query, false)
        .await
        .unwrap();
    assert!(result.expired);
    assert!(result.records.is_empty());
    assert_eq!(result.rollup_level, 2);
}

#[tokio::test]
async fn coarse_bucket_ending_just_after_from_is_discarded() {
    let from = BASE + 10 * DAY + 30 * MINUTE;
    let now = from + 3 * DAY;
    let repo = MemoryRepo::new();
    // Covers mostly time before `from`: ends 3.5h into a window that needs a full 4h bucket.
    repo.insert("svc", 2, vec![overview(BASE + 10 * DAY + COARSE, 5, 5_000_000.0)]);
    let engine = engine_at(repo, now);

    let query = AggregateQuery::new(from, from + 2 * DAY, 1);
    let result = engine
        .get_aggregates_with_fallback::<OverviewAggregate>("svc", &query, false)
        .await
        .unwrap();
    assert!(result.expired);
    assert!(result.records.is_empty());
}

#[tokio::test]
async fn empty_fine_level_falls_back_to_coarse_records() {
    let from = BASE + 10 * DAY;
    let now = from + 3 * DAY;
    let repo = MemoryRepo::new();
    repo.insert(
        "svc",
        2,
        vec![
            overview(from + 2 * COARSE, 4, 4_000_000.0),
            overview(from + 3 * COARSE, 6, 6_000_000.0),
        ],
    );
    let engine = engine_at(repo, now);

    let query = AggregateQuery::new(from, from + 2 * DAY, 1);
    let result = engine
        .get_aggregates_with_fallback::<OverviewAggregate>("svc", &query, false)
        .await
        .unwrap();
    assert!(!result.expired);
    assert_eq!(result.rollup_level, 2);
    let times: Vec<i64> = result.records.iter().map(|r| r.capture_time).collect();
    assert_eq!(times, vec![from + 2 * COARSE, from + 3 * COARSE]);
}

#[tokio::test]
async fn fine_records_are_returned_without_fallback() {
    let from = BASE + 10 * DAY;
    let now = from + 3 * DAY;
    let repo = MemoryRepo::new();
    repo.insert("svc", 1, vec![overview(from + 30 * MINUTE, 1, 1_000_000.0)]);
    repo.insert("svc", 2, vec![overview(from + COARSE, 9, 9_000_000.0)]);
    let engine = engine_at(repo, now);

    let query = AggregateQuery::new(from, from + 2 * DAY, 1);
    let result = engine
        .get_aggregates_with_fallback::<OverviewAggregate>("svc", &query, false)
        .await
        .unwrap();
    assert!(!result.expired);
    assert_eq!(result.rollup_level, 1);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].transaction_count, 1);
}

#[tokio::test]
async fn recent_empty_window_is_not_expired() {
    let now = BASE + DAY;
    let repo = MemoryRepo::new();
    let engine = engine_at(repo.clone(), now);

    let query = AggregateQuery::new(now - HOUR, now, 1);
    let result = engine
        .get_aggregates_with_fallback::<OverviewAggregate>("svc", &query, false)
        .await
        .unwrap();
    assert!(!result.expired);
    assert!(result.records.is_empty());
    assert_eq!(result.rollup_level, 1);
    // Persisted read plus raw tail read, no coarse retry.
    assert_eq!(repo.read_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

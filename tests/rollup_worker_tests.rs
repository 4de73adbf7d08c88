// Rollup worker tests: one tick rolls complete buckets, is idempotent, prunes; backfill

mod common;

use std::sync::Arc;

use common::*;
use rollup_engine::aggregate_repo::SqliteAggregateRepo;
use rollup_engine::backfill::run_backfill;
use rollup_engine::engine::AggregateRepository;
use rollup_engine::models::*;
use rollup_engine::rollup::collector::roll_up;
use rollup_engine::rollup_worker::{RollupWorkerConfig, TickSummary, run_one_tick};
use tempfile::TempDir;

async fn open_repo(dir: &TempDir) -> Arc<SqliteAggregateRepo> {
    let path = dir.path().join("aggregates.db");
    let repo = SqliteAggregateRepo::connect(path.to_str().unwrap(), 2)
        .await
        .unwrap();
    repo.init().await.unwrap();
    Arc::new(repo)
}

fn worker_config() -> RollupWorkerConfig {
    RollupWorkerConfig {
        levels: test_levels(),
        rollup_interval_secs: 60,
        rollup_delay_millis: MINUTE,
        vacuum_schedule: None,
        vacuum_interval_secs: 86_400,
    }
}

#[tokio::test]
async fn tick_rolls_only_complete_buckets() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let raw = raw_minutes(0..100);
    repo.save("svc", 0, &raw).await.unwrap();

    // Delay-adjusted cutoff floors to minute 90: buckets 30, 60 and 90 are complete.
    let summary = run_one_tick(&repo, BASE + 95 * MINUTE, &worker_config())
        .await
        .unwrap();
    assert_eq!(
        summary,
        TickSummary {
            rolled_up_buckets: 3,
            pruned_rows: 0,
        }
    );

    let rolled: Vec<OverviewAggregate> = repo.read("svc", BASE, BASE + 4 * HOUR, 1).await.unwrap();
    assert_eq!(rolled, roll_up(&raw[..90], 30 * MINUTE).unwrap());
    assert!(rolled.iter().all(|r| r.transaction_count == 30));
}

#[tokio::test]
async fn repeated_tick_does_not_roll_twice() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    repo.save("svc", 0, &raw_minutes(0..90)).await.unwrap();
    let config = worker_config();

    run_one_tick(&repo, BASE + 95 * MINUTE, &config)
        .await
        .unwrap();
    let again = run_one_tick(&repo, BASE + 95 * MINUTE, &config)
        .await
        .unwrap();
    assert_eq!(again.rolled_up_buckets, 0);

    // New raw data only produces the next bucket.
    repo.save("svc", 0, &raw_minutes(90..120)).await.unwrap();
    let next = run_one_tick(&repo, BASE + 125 * MINUTE, &config)
        .await
        .unwrap();
    assert_eq!(next.rolled_up_buckets, 1);
    assert_eq!(
        repo.last_capture_time("svc", AggregateKind::Overview, 1)
            .await
            .unwrap(),
        Some(BASE + 120 * MINUTE)
    );
}

#[tokio::test]
async fn tick_cascades_into_coarser_levels_and_every_kind() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let throughput_raw: Vec<ThroughputAggregate> = (0..240)
        .map(|i| throughput(BASE + (i + 1) * MINUTE, 2, Some(1)))
        .collect();
    repo.save("svc", 0, &throughput_raw).await.unwrap();

    let summary = run_one_tick(&repo, BASE + 5 * HOUR, &worker_config())
        .await
        .unwrap();
    // Eight 30 minute buckets, then one 4 hour bucket from them.
    assert_eq!(summary.rolled_up_buckets, 9);

    let coarse: Vec<ThroughputAggregate> = repo.read("svc", BASE, BASE + DAY, 2).await.unwrap();
    assert_eq!(coarse, vec![throughput(BASE + 4 * HOUR, 480, Some(240))]);
}

#[tokio::test]
async fn tick_prunes_levels_past_retention() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    repo.save("svc", 0, &raw_minutes(0..90)).await.unwrap();
    let mut config = worker_config();
    config.levels[0].retention_hours = 1;

    let summary = run_one_tick(&repo, BASE + 3 * HOUR, &config).await.unwrap();
    assert_eq!(summary.rolled_up_buckets, 3);
    assert_eq!(summary.pruned_rows, 90);

    // Rolled data outlives the raw rows it came from.
    let rolled: Vec<OverviewAggregate> = repo.read("svc", BASE, BASE + 4 * HOUR, 1).await.unwrap();
    assert_eq!(rolled.len(), 3);
}

#[tokio::test]
async fn backfill_runs_one_pass() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    repo.save("svc", 0, &raw_minutes(0..60)).await.unwrap();

    let summary = run_backfill(
        Arc::clone(&repo),
        FixedClock::new(BASE + 2 * HOUR),
        &worker_config(),
    )
    .await
    .unwrap();
    assert_eq!(summary.rolled_up_buckets, 2);
}

// Background worker: roll level N-1 into level N for every complete bucket, then prune each
// level by its retention. Runs every rollup_interval_secs.
// VACUUM runs on a configurable schedule (cron expression or fixed interval).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::aggregate_repo::SqliteAggregateRepo;
use crate::clock::Clock;
use crate::engine::AggregateRepository;
use crate::models::{
    AggregateKind, AggregateRecord, OverviewAggregate, PercentileAggregate, SyntheticResult,
    ThroughputAggregate,
};
use crate::rollup::collector::roll_up_aligned;
use crate::rollup::{RollupLevelConfig, floor_rollup_time};

/// Config for the rollup worker.
#[derive(Debug, Clone)]
pub struct RollupWorkerConfig {
    pub levels: Vec<RollupLevelConfig>,
    pub rollup_interval_secs: u64,
    /// A bucket is rolled up only once it ended at least this long ago.
    pub rollup_delay_millis: i64,
    /// Optional cron expression for VACUUM (e.g. "0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

/// Per-tick counts, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub rolled_up_buckets: usize,
    pub pruned_rows: u64,
}

/// Spawns the rollup worker. Returns a join handle.
pub fn spawn(
    repo: Arc<SqliteAggregateRepo>,
    clock: Arc<dyn Clock>,
    config: RollupWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(repo, clock, config).await;
    })
}

#[instrument(skip(repo, clock, config), fields(interval_secs = config.rollup_interval_secs))]
async fn run(repo: Arc<SqliteAggregateRepo>, clock: Arc<dyn Clock>, config: RollupWorkerConfig) {
    let mut rollup_tick = tokio::time::interval(Duration::from_secs(config.rollup_interval_secs));
    rollup_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    loop {
        tokio::select! {
            _ = rollup_tick.tick() => {
                if let Err(e) = run_one_tick(&repo, clock.now_millis(), &config).await {
                    warn!(error = %e, "rollup tick failed");
                }
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = repo.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
        }
    }
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: RollupWorkerConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// Runs one pass (roll every level up in ascending order, then prune). Used by the worker loop
/// and by backfill.
pub async fn run_one_tick(
    repo: &SqliteAggregateRepo,
    now_millis: i64,
    config: &RollupWorkerConfig,
) -> anyhow::Result<TickSummary> {
    let mut summary = TickSummary::default();
    for level in 1..config.levels.len() {
        let interval_millis = config.levels[level].interval_millis;
        let cutoff = floor_rollup_time(now_millis - config.rollup_delay_millis, interval_millis);
        let mut level_buckets = 0;
        for kind in AggregateKind::ALL {
            for series_id in repo.series_ids(kind, level - 1).await? {
                level_buckets += match kind {
                    AggregateKind::Overview => {
                        roll_up_series::<OverviewAggregate>(repo, &series_id, level, interval_millis, cutoff)
                            .await?
                    }
                    AggregateKind::Percentile => {
                        roll_up_series::<PercentileAggregate>(repo, &series_id, level, interval_millis, cutoff)
                            .await?
                    }
                    AggregateKind::Throughput => {
                        roll_up_series::<ThroughputAggregate>(repo, &series_id, level, interval_millis, cutoff)
                            .await?
                    }
                    AggregateKind::Synthetic => {
                        roll_up_series::<SyntheticResult>(repo, &series_id, level, interval_millis, cutoff)
                            .await?
                    }
                };
            }
        }
        if level_buckets > 0 {
            info!(
                rollup_level = level,
                rolled_up_buckets = level_buckets,
                "level {} -> {} rollup",
                level - 1,
                level
            );
        }
        summary.rolled_up_buckets += level_buckets;
    }

    for (level, config) in config.levels.iter().enumerate() {
        if let Some(retention) = config.retention_millis() {
            summary.pruned_rows += repo.prune(level, now_millis - retention).await?;
        }
    }

    Ok(summary)
}

/// Rolls the complete buckets after the level's last persisted one, up to `cutoff`.
async fn roll_up_series<T: AggregateRecord>(
    repo: &SqliteAggregateRepo,
    series_id: &str,
    level: usize,
    interval_millis: i64,
    cutoff: i64,
) -> anyhow::Result<usize> {
    let from = repo
        .last_capture_time(series_id, T::KIND, level)
        .await?
        .unwrap_or(i64::MIN);
    if from >= cutoff {
        return Ok(0);
    }
    let finer: Vec<T> = repo.read(series_id, from, cutoff, level - 1).await?;
    let rolled = roll_up_aligned(&finer, interval_millis)?;
    repo.save(series_id, level, &rolled).await?;
    Ok(rolled.len())
}

// One-time backfill: run one rollup pass at startup to roll data persisted while the service
// was down. Submitted to the worker pool like any other background task.

use std::sync::Arc;

use tracing::info;

use crate::aggregate_repo::SqliteAggregateRepo;
use crate::clock::Clock;
use crate::rollup_worker::{RollupWorkerConfig, TickSummary, run_one_tick};

/// Runs one rollup pass over everything already persisted.
pub async fn run_backfill(
    repo: Arc<SqliteAggregateRepo>,
    clock: Arc<dyn Clock>,
    config: &RollupWorkerConfig,
) -> anyhow::Result<TickSummary> {
    let summary = run_one_tick(repo.as_ref(), clock.now_millis(), config).await?;
    info!(
        rolled_up_buckets = summary.rolled_up_buckets,
        pruned_rows = summary.pruned_rows,
        "backfill complete"
    );
    Ok(summary)
}

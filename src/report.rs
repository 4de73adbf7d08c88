// Multi-agent report: one query per agent, all submitted to the worker pool and joined before
// the response is assembled. The level is aligned to the report timezone's UTC offset.

use serde::Deserialize;

use crate::chart::SeriesBuilder;
use crate::chart::service::{AVERAGE_DURATION, TRANSACTIONS_PER_MINUTE, average_millis};
use crate::engine::{AggregateRepository, LiveAggregateSource, RollupEngine};
use crate::error::EngineError;
use crate::models::{
    AggregateQuery, ChartResponse, DataKind, OverallValue, OverviewAggregate, ThroughputAggregate,
    check_window,
};
use crate::rollup::{ceil_rollup_time, floor_rollup_time};
use crate::worker_pool::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMetric {
    AverageDuration,
    Throughput,
}

impl ReportMetric {
    fn label(&self) -> &'static str {
        match self {
            ReportMetric::AverageDuration => AVERAGE_DURATION,
            ReportMetric::Throughput => TRANSACTIONS_PER_MINUTE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub agent_ids: Vec<String>,
    pub metric: ReportMetric,
    pub from: i64,
    pub to: i64,
    pub utc_offset_millis: i64,
}

/// One agent's reduced points plus its totals.
struct AgentSeries {
    points: Vec<(i64, Option<f64>)>,
    overall: Option<f64>,
    expired: bool,
}

pub async fn build_report<R, L>(
    engine: &RollupEngine<R, L>,
    pool: &WorkerPool,
    request: &ReportRequest,
) -> anyhow::Result<ChartResponse>
where
    R: AggregateRepository,
    L: LiveAggregateSource,
{
    check_window(request.from, request.to).map_err(EngineError::InvalidWindow)?;
    let policy = engine.policy();
    let level = policy.select_report_rollup_level(
        request.from,
        request.to,
        DataKind::Transaction,
        request.utc_offset_millis,
    );
    let interval = policy.interval_millis(level)?;
    let query = AggregateQuery::new(
        floor_rollup_time(request.from, interval),
        ceil_rollup_time(request.to, interval),
        level,
    );

    let tasks: Vec<_> = request
        .agent_ids
        .iter()
        .map(|agent_id| {
            let engine = engine.clone();
            let agent_id = agent_id.clone();
            let metric = request.metric;
            async move { agent_series(&engine, &agent_id, &query, interval, metric).await }
        })
        .collect();
    let results = pool.run_all(tasks).await?;

    let builder = SeriesBuilder::new(query.from, query.to, interval, policy.now_millis());
    let mut data_series = Vec::with_capacity(results.len());
    let mut overall = Vec::with_capacity(results.len());
    let mut expired = !results.is_empty();
    for (agent_id, result) in request.agent_ids.iter().zip(results) {
        let series = result?;
        expired &= series.expired;
        data_series.push(builder.build(agent_id.clone(), series.points));
        overall.push(OverallValue {
            name: format!("{} {}", agent_id, request.metric.label()),
            value: series.overall,
        });
    }
    Ok(ChartResponse {
        data_series,
        overall,
        data_point_interval_millis: interval,
        expired,
        error_intervals: Vec::new(),
    })
}

async fn agent_series<R, L>(
    engine: &RollupEngine<R, L>,
    agent_id: &str,
    query: &AggregateQuery,
    interval: i64,
    metric: ReportMetric,
) -> Result<AgentSeries, EngineError>
where
    R: AggregateRepository,
    L: LiveAggregateSource,
{
    match metric {
        ReportMetric::AverageDuration => {
            let result = engine
                .get_aggregates_with_fallback::<OverviewAggregate>(agent_id, query, false)
                .await?;
            let total_nanos: f64 = result.records.iter().map(|r| r.total_duration_nanos).sum();
            let count: f64 = result.records.iter().map(|r| r.transaction_count as f64).sum();
            Ok(AgentSeries {
                points: result
                    .records
                    .iter()
                    .map(|r| {
                        (
                            r.capture_time,
                            average_millis(r.total_duration_nanos, r.transaction_count as f64),
                        )
                    })
                    .collect(),
                overall: average_millis(total_nanos, count),
                expired: result.expired,
            })
        }
        ReportMetric::Throughput => {
            let result = engine
                .get_aggregates_with_fallback::<ThroughputAggregate>(agent_id, query, false)
                .await?;
            let count: f64 = result.records.iter().map(|r| r.transaction_count as f64).sum();
            let window_millis = (query.to - query.from) as f64;
            Ok(AgentSeries {
                points: result
                    .records
                    .iter()
                    .map(|r| {
                        (
                            r.capture_time,
                            Some(r.transaction_count as f64 * 60_000.0 / interval as f64),
                        )
                    })
                    .collect(),
                overall: (window_millis > 0.0).then(|| count * 60_000.0 / window_millis),
                expired: result.expired,
            })
        }
    }
}

// Chart types built on the engine. Each chart picks a rollup level for the window, widens
// the read to the level's bracket around [from, to], runs the fallback-aware query and turns
// the records into named series plus overall values.

use futures_util::future::try_join_all;

use super::{GapFill, SeriesBuilder, percentile_name};
use crate::engine::{AggregateRepository, LiveAggregateSource, RollupEngine};
use crate::error::EngineError;
use crate::error_merger::{ErrorIntervalCollector, MultiErrorIntervalMerger};
use crate::histogram::LazyHistogram;
use crate::models::{
    AggregateQuery, AggregateRecord, ChartResponse, DataKind, OverallValue, OverviewAggregate,
    PercentileAggregate, SyntheticResult, ThroughputAggregate, check_window,
};
use crate::rollup::{ceil_rollup_time, floor_rollup_time};

const NANOS_PER_MILLI: f64 = 1_000_000.0;
const MILLIS_PER_MINUTE: f64 = 60_000.0;

pub const AVERAGE_DURATION: &str = "average duration";
pub const TRANSACTIONS_PER_MINUTE: &str = "transactions per minute";
pub const ERROR_RATE: &str = "error rate";

pub struct ChartService<R, L> {
    engine: RollupEngine<R, L>,
    gap_multiplier: f64,
}

/// Records for one chart plus the window they were read for.
#[derive(Debug, Clone)]
pub struct ChartData<T> {
    pub records: Vec<T>,
    pub query: AggregateQuery,
    pub data_point_interval_millis: i64,
    pub expired: bool,
}

impl<R: AggregateRepository, L: LiveAggregateSource> ChartService<R, L> {
    pub fn new(engine: RollupEngine<R, L>, gap_multiplier: f64) -> Self {
        Self {
            engine,
            gap_multiplier,
        }
    }

    pub fn engine(&self) -> &RollupEngine<R, L> {
        &self.engine
    }

    /// Fallback-aware records for `[from, to]` at the level the policy picks for `kind`.
    pub async fn chart_data<T: AggregateRecord>(
        &self,
        series_id: &str,
        from: i64,
        to: i64,
        kind: DataKind,
        auto_refresh: bool,
    ) -> Result<ChartData<T>, EngineError> {
        check_window(from, to).map_err(EngineError::InvalidWindow)?;
        let level = self.engine.policy().select_rollup_level(from, to, kind);
        self.chart_data_at_level(series_id, from, to, level, auto_refresh)
            .await
    }

    pub async fn chart_data_at_level<T: AggregateRecord>(
        &self,
        series_id: &str,
        from: i64,
        to: i64,
        rollup_level: usize,
        auto_refresh: bool,
    ) -> Result<ChartData<T>, EngineError> {
        check_window(from, to).map_err(EngineError::InvalidWindow)?;
        let policy = self.engine.policy();
        let interval = policy.interval_millis(rollup_level)?;
        let query = AggregateQuery::new(
            floor_rollup_time(from, interval),
            ceil_rollup_time(to, interval),
            rollup_level,
        );
        let result = self
            .engine
            .get_aggregates_with_fallback::<T>(series_id, &query, auto_refresh)
            .await?;
        Ok(ChartData {
            records: result.records,
            query,
            data_point_interval_millis: policy.interval_millis(result.rollup_level)?,
            expired: result.expired,
        })
    }

    pub fn series_builder<T>(&self, data: &ChartData<T>) -> SeriesBuilder {
        SeriesBuilder::new(
            data.query.from,
            data.query.to,
            data.data_point_interval_millis,
            self.engine.policy().now_millis(),
        )
        .with_gap_multiplier(self.gap_multiplier)
    }

    pub async fn overview_chart(
        &self,
        series_id: &str,
        from: i64,
        to: i64,
        auto_refresh: bool,
    ) -> Result<ChartResponse, EngineError> {
        let data: ChartData<OverviewAggregate> = self
            .chart_data(series_id, from, to, DataKind::Transaction, auto_refresh)
            .await?;
        let series = self.series_builder(&data).build(
            AVERAGE_DURATION,
            data.records.iter().map(|r| {
                (
                    r.capture_time,
                    average_millis(r.total_duration_nanos, r.transaction_count as f64),
                )
            }),
        );
        let total_nanos: f64 = data.records.iter().map(|r| r.total_duration_nanos).sum();
        let count: f64 = data.records.iter().map(|r| r.transaction_count as f64).sum();
        Ok(ChartResponse {
            data_series: vec![series],
            overall: vec![OverallValue {
                name: AVERAGE_DURATION.into(),
                value: average_millis(total_nanos, count),
            }],
            data_point_interval_millis: data.data_point_interval_millis,
            expired: data.expired,
            error_intervals: Vec::new(),
        })
    }

    pub async fn throughput_chart(
        &self,
        series_id: &str,
        from: i64,
        to: i64,
        auto_refresh: bool,
    ) -> Result<ChartResponse, EngineError> {
        let data: ChartData<ThroughputAggregate> = self
            .chart_data(series_id, from, to, DataKind::Transaction, auto_refresh)
            .await?;
        let interval = data.data_point_interval_millis as f64;
        let builder = self.series_builder(&data);
        let throughput = builder.with_fill(GapFill::Value(0.0)).build(
            TRANSACTIONS_PER_MINUTE,
            data.records.iter().map(|r| {
                (
                    r.capture_time,
                    Some(r.transaction_count as f64 * MILLIS_PER_MINUTE / interval),
                )
            }),
        );
        let error_rate_series = builder.build(
            ERROR_RATE,
            data.records.iter().map(|r| {
                (
                    r.capture_time,
                    error_rate(r.error_count.map(|e| e as f64), r.transaction_count as f64),
                )
            }),
        );

        let count: f64 = data.records.iter().map(|r| r.transaction_count as f64).sum();
        let errors: Option<f64> = data
            .records
            .iter()
            .map(|r| r.error_count.map(|e| e as f64))
            .sum();
        let window_millis = (data.query.to - data.query.from) as f64;
        Ok(ChartResponse {
            data_series: vec![throughput, error_rate_series],
            overall: vec![
                OverallValue {
                    name: TRANSACTIONS_PER_MINUTE.into(),
                    value: (window_millis > 0.0)
                        .then(|| count * MILLIS_PER_MINUTE / window_millis),
                },
                OverallValue {
                    name: ERROR_RATE.into(),
                    value: error_rate(errors, count),
                },
            ],
            data_point_interval_millis: data.data_point_interval_millis,
            expired: data.expired,
            error_intervals: Vec::new(),
        })
    }

    /// One sub-series per percentile; the overall values come from the grand-merged histogram.
    pub async fn percentile_chart(
        &self,
        series_id: &str,
        from: i64,
        to: i64,
        percentiles: &[f64],
        auto_refresh: bool,
    ) -> Result<ChartResponse, EngineError> {
        let data: ChartData<PercentileAggregate> = self
            .chart_data(series_id, from, to, DataKind::Transaction, auto_refresh)
            .await?;
        let builder = self.series_builder(&data);
        let mut merged = LazyHistogram::new();
        for r in &data.records {
            merged
                .merge(&r.histogram)
                .map_err(|e| EngineError::Rollup {
                    kind: PercentileAggregate::KIND,
                    reason: format!("{:#}", e),
                })?;
        }
        let mut data_series = Vec::with_capacity(percentiles.len());
        let mut overall = Vec::with_capacity(percentiles.len());
        for &p in percentiles {
            let name = percentile_name(p);
            data_series.push(builder.build(
                name.clone(),
                data.records.iter().map(|r| {
                    (
                        r.capture_time,
                        r.histogram.value_at_percentile(p).map(nanos_to_millis),
                    )
                }),
            ));
            overall.push(OverallValue {
                name,
                value: merged.value_at_percentile(p).map(nanos_to_millis),
            });
        }
        Ok(ChartResponse {
            data_series,
            overall,
            data_point_interval_millis: data.data_point_interval_millis,
            expired: data.expired,
            error_intervals: Vec::new(),
        })
    }

    /// Average duration per monitor plus the grouped error overlay across monitors.
    pub async fn synthetic_chart(
        &self,
        monitor_ids: &[String],
        from: i64,
        to: i64,
        auto_refresh: bool,
    ) -> Result<ChartResponse, EngineError> {
        check_window(from, to).map_err(EngineError::InvalidWindow)?;
        let level = self
            .engine
            .policy()
            .select_rollup_level(from, to, DataKind::Synthetic);
        let per_monitor: Vec<ChartData<SyntheticResult>> = try_join_all(
            monitor_ids
                .iter()
                .map(|id| self.chart_data_at_level(id, from, to, level, auto_refresh)),
        )
        .await?;

        let mut data_series = Vec::with_capacity(monitor_ids.len());
        let mut overall = Vec::with_capacity(monitor_ids.len());
        let mut error_merger = MultiErrorIntervalMerger::default();
        for (monitor_id, data) in monitor_ids.iter().zip(&per_monitor) {
            data_series.push(self.series_builder(data).build(
                monitor_id.clone(),
                data.records.iter().map(|r| {
                    (
                        r.capture_time,
                        average_millis(r.total_duration_nanos, r.execution_count as f64),
                    )
                }),
            ));
            let total_nanos: f64 = data.records.iter().map(|r| r.total_duration_nanos).sum();
            let count: f64 = data.records.iter().map(|r| r.execution_count as f64).sum();
            overall.push(OverallValue {
                name: monitor_id.clone(),
                value: average_millis(total_nanos, count),
            });

            let mut intervals = ErrorIntervalCollector::default();
            for r in &data.records {
                intervals.add_all(&r.error_intervals);
            }
            error_merger.add_error_intervals(monitor_id, &intervals.into_merged());
        }

        let data_point_interval_millis = match per_monitor.first() {
            Some(data) => data.data_point_interval_millis,
            None => self.engine.policy().interval_millis(level)?,
        };
        Ok(ChartResponse {
            data_series,
            overall,
            data_point_interval_millis,
            expired: !per_monitor.is_empty() && per_monitor.iter().all(|d| d.expired),
            error_intervals: error_merger.into_grouped(),
        })
    }
}

pub fn nanos_to_millis(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_MILLI
}

/// Average duration in millis; `None` for an empty population.
pub fn average_millis(total_nanos: f64, count: f64) -> Option<f64> {
    (count > 0.0).then(|| total_nanos / count / NANOS_PER_MILLI)
}

/// Error percentage; `None` when the error count is unknown or nothing ran.
pub fn error_rate(error_count: Option<f64>, transaction_count: f64) -> Option<f64> {
    let errors = error_count?;
    (transaction_count > 0.0).then(|| errors * 100.0 / transaction_count)
}

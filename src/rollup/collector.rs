// Merge primitives: one accumulator per record kind, plus the bucketing loops that fold an
// ordered stream of finer records into a coarser level.
//
// Accumulators live for one bucket of one rollup pass. An accumulator that saw no
// transactions never produces a record. Counts accumulate as f64 like durations; emitted
// records clamp them to MAX_COUNT.

use std::mem;

use crate::error_merger::ErrorIntervalCollector;
use crate::histogram::LazyHistogram;
use crate::models::{
    AggregateRecord, ErrorInterval, OverviewAggregate, PercentileAggregate, SyntheticResult,
    MAX_COUNT, ThreadStats, ThroughputAggregate, TimerNode,
};

use super::rollup_capture_time;

pub trait RollupCollector: Default + Send {
    type Record;

    fn merge_record(&mut self, record: &Self::Record) -> anyhow::Result<()>;

    fn is_empty(&self) -> bool;

    /// Emits the merged record stamped with `capture_time`; `None` when nothing was counted.
    fn into_record(self, capture_time: i64) -> Option<Self::Record>;
}

#[derive(Debug, Default)]
pub struct OverviewCollector {
    total_duration_nanos: f64,
    transaction_count: f64,
    root_timers: Vec<TimerNode>,
    thread_stats: Option<ThreadStats>,
    thread_stats_missing: bool,
}

impl OverviewCollector {
    pub fn add_duration(&mut self, nanos: f64) {
        self.total_duration_nanos += nanos;
    }

    pub fn add_count(&mut self, count: u64) {
        self.transaction_count += count as f64;
    }

    pub fn merge_root_timers(&mut self, timers: &[TimerNode]) {
        for timer in timers {
            merge_timer_into(&mut self.root_timers, timer);
        }
    }

    pub fn merge_thread_stats(&mut self, stats: Option<&ThreadStats>) {
        let Some(stats) = stats else {
            self.thread_stats_missing = true;
            return;
        };
        self.thread_stats = Some(match self.thread_stats {
            None => *stats,
            Some(curr) => ThreadStats {
                cpu_nanos: add_available(curr.cpu_nanos, stats.cpu_nanos),
                blocked_nanos: add_available(curr.blocked_nanos, stats.blocked_nanos),
                waited_nanos: add_available(curr.waited_nanos, stats.waited_nanos),
                allocated_bytes: add_available(curr.allocated_bytes, stats.allocated_bytes),
            },
        });
    }
}

impl RollupCollector for OverviewCollector {
    type Record = OverviewAggregate;

    fn merge_record(&mut self, record: &OverviewAggregate) -> anyhow::Result<()> {
        self.add_duration(record.total_duration_nanos);
        self.add_count(record.transaction_count);
        self.merge_root_timers(&record.root_timers);
        self.merge_thread_stats(record.thread_stats.as_ref());
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.transaction_count == 0.0
    }

    fn into_record(self, capture_time: i64) -> Option<OverviewAggregate> {
        if self.is_empty() {
            return None;
        }
        Some(OverviewAggregate {
            capture_time,
            total_duration_nanos: self.total_duration_nanos,
            transaction_count: accumulated_count(self.transaction_count),
            root_timers: self.root_timers,
            thread_stats: if self.thread_stats_missing {
                None
            } else {
                self.thread_stats
            },
        })
    }
}

#[derive(Debug, Default)]
pub struct PercentileCollector {
    total_duration_nanos: f64,
    transaction_count: f64,
    histogram: LazyHistogram,
}

impl PercentileCollector {
    pub fn add_duration(&mut self, nanos: f64) {
        self.total_duration_nanos += nanos;
    }

    pub fn add_count(&mut self, count: u64) {
        self.transaction_count += count as f64;
    }

    pub fn merge_histogram(&mut self, histogram: &LazyHistogram) -> anyhow::Result<()> {
        self.histogram.merge(histogram)
    }
}

impl RollupCollector for PercentileCollector {
    type Record = PercentileAggregate;

    fn merge_record(&mut self, record: &PercentileAggregate) -> anyhow::Result<()> {
        self.add_duration(record.total_duration_nanos);
        self.add_count(record.transaction_count);
        self.merge_histogram(&record.histogram)
    }

    fn is_empty(&self) -> bool {
        self.transaction_count == 0.0
    }

    fn into_record(self, capture_time: i64) -> Option<PercentileAggregate> {
        if self.is_empty() {
            return None;
        }
        Some(PercentileAggregate {
            capture_time,
            total_duration_nanos: self.total_duration_nanos,
            transaction_count: accumulated_count(self.transaction_count),
            histogram: self.histogram,
        })
    }
}

/// A single unknown (`None`) error count makes the whole bucket unknown.
#[derive(Debug)]
pub struct ThroughputCollector {
    transaction_count: f64,
    error_count: Option<f64>,
}

impl Default for ThroughputCollector {
    fn default() -> Self {
        Self {
            transaction_count: 0.0,
            error_count: Some(0.0),
        }
    }
}

impl ThroughputCollector {
    pub fn add_count(&mut self, count: u64) {
        self.transaction_count += count as f64;
    }

    pub fn merge_error_count(&mut self, error_count: Option<u64>) {
        self.error_count = match (self.error_count, error_count) {
            (Some(curr), Some(errors)) => Some(curr + errors as f64),
            _ => None,
        };
    }
}

impl RollupCollector for ThroughputCollector {
    type Record = ThroughputAggregate;

    fn merge_record(&mut self, record: &ThroughputAggregate) -> anyhow::Result<()> {
        self.add_count(record.transaction_count);
        self.merge_error_count(record.error_count);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.transaction_count == 0.0
    }

    fn into_record(self, capture_time: i64) -> Option<ThroughputAggregate> {
        if self.is_empty() {
            return None;
        }
        Some(ThroughputAggregate {
            capture_time,
            transaction_count: accumulated_count(self.transaction_count),
            error_count: self.error_count.map(accumulated_count),
        })
    }
}

#[derive(Debug, Default)]
pub struct SyntheticCollector {
    total_duration_nanos: f64,
    execution_count: f64,
    error_intervals: ErrorIntervalCollector,
}

impl SyntheticCollector {
    pub fn add_duration(&mut self, nanos: f64) {
        self.total_duration_nanos += nanos;
    }

    pub fn add_count(&mut self, count: u64) {
        self.execution_count += count as f64;
    }

    pub fn merge_error_intervals(&mut self, intervals: &[ErrorInterval]) {
        self.error_intervals.add_all(intervals);
    }
}

impl RollupCollector for SyntheticCollector {
    type Record = SyntheticResult;

    fn merge_record(&mut self, record: &SyntheticResult) -> anyhow::Result<()> {
        self.add_duration(record.total_duration_nanos);
        self.add_count(record.execution_count);
        self.merge_error_intervals(&record.error_intervals);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.execution_count == 0.0
    }

    fn into_record(self, capture_time: i64) -> Option<SyntheticResult> {
        if self.is_empty() {
            return None;
        }
        Some(SyntheticResult {
            capture_time,
            total_duration_nanos: self.total_duration_nanos,
            execution_count: accumulated_count(self.execution_count),
            error_intervals: self.error_intervals.into_merged(),
        })
    }
}

/// Rolls an ordered stream up to `interval_millis`. Every bucket but the last is stamped with
/// its aligned capture time; the last one keeps the capture time of its newest input, so a
/// still-filling bucket is never presented as complete.
pub fn roll_up<T: AggregateRecord>(ordered: &[T], interval_millis: i64) -> anyhow::Result<Vec<T>> {
    roll_up_with(ordered, interval_millis, false)
}

/// Like [`roll_up`] but stamps the final bucket with its aligned capture time too. Only for
/// inputs known to cover complete buckets.
pub fn roll_up_aligned<T: AggregateRecord>(
    ordered: &[T],
    interval_millis: i64,
) -> anyhow::Result<Vec<T>> {
    roll_up_with(ordered, interval_millis, true)
}

/// Merges records that share one capture time (e.g. two partial live reports).
pub fn merge_records<'a, T: AggregateRecord>(
    records: impl IntoIterator<Item = &'a T>,
    capture_time: i64,
) -> anyhow::Result<Option<T>> {
    let mut collector = T::Collector::default();
    for r in records {
        collector.merge_record(r)?;
    }
    Ok(collector.into_record(capture_time))
}

fn roll_up_with<T: AggregateRecord>(
    ordered: &[T],
    interval_millis: i64,
    align_last: bool,
) -> anyhow::Result<Vec<T>> {
    let mut out = Vec::new();
    let mut collector = T::Collector::default();
    let mut curr_rollup_time = i64::MIN;
    let mut max_capture_time = i64::MIN;
    for record in ordered {
        max_capture_time = record.capture_time();
        let rollup_time = rollup_capture_time(max_capture_time, interval_millis);
        if rollup_time != curr_rollup_time && !collector.is_empty() {
            out.extend(mem::take(&mut collector).into_record(curr_rollup_time));
        }
        curr_rollup_time = rollup_time;
        collector.merge_record(record)?;
    }
    let last_capture_time = if align_last {
        curr_rollup_time
    } else {
        max_capture_time
    };
    out.extend(collector.into_record(last_capture_time));
    Ok(out)
}

fn merge_timer_into(targets: &mut Vec<TimerNode>, timer: &TimerNode) {
    match targets.iter_mut().find(|t| t.name == timer.name) {
        Some(target) => {
            target.total_nanos += timer.total_nanos;
            target.count = target.count.saturating_add(timer.count);
            for child in &timer.children {
                merge_timer_into(&mut target.children, child);
            }
        }
        None => targets.push(timer.clone()),
    }
}

fn accumulated_count(total: f64) -> u64 {
    (total.min(MAX_COUNT as f64) as u64).min(MAX_COUNT)
}

fn add_available(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? + b?)
}

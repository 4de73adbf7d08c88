// Shared test helpers: in-memory repository with failure injection, fixed clock, builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rollup_engine::clock::Clock;
use rollup_engine::engine::{AggregateRepository, EngineSettings, RollupEngine};
use rollup_engine::histogram::LazyHistogram;
use rollup_engine::live::LiveCollector;
use rollup_engine::models::*;
use rollup_engine::rollup::{MinLevels, RollupLevelConfig, RollupPolicy};

pub const MINUTE: i64 = 60_000;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;

/// 2026-01-01T00:00:00Z, aligned to every test level.
pub const BASE: i64 = 1_767_225_600_000;

pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(now),
        })
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MemoryRepo {
    rows: Mutex<HashMap<(String, AggregateKind, usize), Vec<AnyAggregate>>>,
    fail_reads: AtomicBool,
    pub read_calls: AtomicUsize,
}

impl MemoryRepo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stores records as given (no sorting), so tests can plant corrupt streams.
    pub fn insert<T: AggregateRecord>(&self, series_id: &str, rollup_level: usize, records: Vec<T>) {
        let mut rows = self.rows.lock().unwrap();
        rows.entry((series_id.to_string(), T::KIND, rollup_level))
            .or_default()
            .extend(records.into_iter().map(AggregateRecord::into_any));
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl AggregateRepository for MemoryRepo {
    async fn read<T: AggregateRecord>(
        &self,
        series_id: &str,
        from: i64,
        to: i64,
        rollup_level: usize,
    ) -> anyhow::Result<Vec<T>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(!self.fail_reads.load(Ordering::SeqCst), "injected read failure");
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(&(series_id.to_string(), T::KIND, rollup_level))
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.capture_time() > from && r.capture_time() <= to)
                    .filter_map(|r| T::from_any(r).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// 1 min (raw), 30 min, 4 h. No retention limits.
pub fn test_levels() -> Vec<RollupLevelConfig> {
    vec![
        RollupLevelConfig {
            interval_millis: MINUTE,
            view_threshold_millis: 0,
            retention_hours: 0,
        },
        RollupLevelConfig {
            interval_millis: 30 * MINUTE,
            view_threshold_millis: 4 * HOUR,
            retention_hours: 0,
        },
        RollupLevelConfig {
            interval_millis: 4 * HOUR,
            view_threshold_millis: 2 * DAY,
            retention_hours: 0,
        },
    ]
}

pub fn test_policy(clock: Arc<FixedClock>) -> Arc<RollupPolicy> {
    Arc::new(RollupPolicy::new(test_levels(), MinLevels::default(), clock).unwrap())
}

pub fn test_engine(
    repo: Arc<MemoryRepo>,
    live: Arc<LiveCollector>,
    clock: Arc<FixedClock>,
) -> RollupEngine<MemoryRepo, LiveCollector> {
    RollupEngine::new(repo, live, test_policy(clock), EngineSettings::default())
}

pub fn overview(capture_time: i64, count: u64, total_duration_nanos: f64) -> OverviewAggregate {
    OverviewAggregate {
        capture_time,
        total_duration_nanos,
        transaction_count: count,
        root_timers: vec![],
        thread_stats: None,
    }
}

pub fn throughput(capture_time: i64, count: u64, error_count: Option<u64>) -> ThroughputAggregate {
    ThroughputAggregate {
        capture_time,
        transaction_count: count,
        error_count,
    }
}

pub fn percentile(capture_time: i64, values_nanos: &[u64]) -> PercentileAggregate {
    PercentileAggregate {
        capture_time,
        total_duration_nanos: values_nanos.iter().map(|&v| v as f64).sum(),
        transaction_count: values_nanos.len() as u64,
        histogram: LazyHistogram::from_values(values_nanos.iter().copied()).unwrap(),
    }
}

pub fn synthetic(
    capture_time: i64,
    count: u64,
    total_duration_nanos: f64,
    error_intervals: Vec<ErrorInterval>,
) -> SyntheticResult {
    SyntheticResult {
        capture_time,
        total_duration_nanos,
        execution_count: count,
        error_intervals,
    }
}

pub fn error_interval(from: i64, to: i64, count: u64, message: &str) -> ErrorInterval {
    ErrorInterval {
        from,
        to,
        count,
        message: message.into(),
    }
}

/// One raw overview record per minute ending at `BASE + (i + 1) min`, count 1, 1 ms each.
pub fn raw_minutes(minutes: std::ops::Range<i64>) -> Vec<OverviewAggregate> {
    minutes
        .map(|i| overview(BASE + (i + 1) * MINUTE, 1, 1_000_000.0))
        .collect()
}

// Aggregate record kinds. Every record is identified by its capture time, the END of the
// bucket it covers. Durations accumulate as f64 nanoseconds so long retention spans cannot
// overflow; counts are exact integers.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ErrorInterval, MAX_CAPTURE_TIME, capture_time_in_range};
use crate::aggregate_repo::codec;
use crate::histogram::LazyHistogram;
use crate::rollup::collector::{
    OverviewCollector, PercentileCollector, RollupCollector, SyntheticCollector,
    ThroughputCollector,
};

/// Largest transaction, execution or error count a record may carry (signed storage column).
pub const MAX_COUNT: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    Overview,
    Percentile,
    Throughput,
    Synthetic,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 4] = [
        AggregateKind::Overview,
        AggregateKind::Percentile,
        AggregateKind::Throughput,
        AggregateKind::Synthetic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Overview => "overview",
            AggregateKind::Percentile => "percentile",
            AggregateKind::Throughput => "throughput",
            AggregateKind::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour shared by all record kinds: identity, validation, rollup and storage.
pub trait AggregateRecord: Clone + Send + Sync + Sized + 'static {
    const KIND: AggregateKind;

    /// Transient accumulator used to fold finer records into one coarser record.
    type Collector: RollupCollector<Record = Self>;

    fn capture_time(&self) -> i64;

    /// Record-level invariants (count in 1..=MAX_COUNT, finite non-negative durations and
    /// thread stats).
    fn check(&self) -> Result<(), String>;

    fn into_any(self) -> AnyAggregate;

    fn from_any(any: &AnyAggregate) -> Option<&Self>;

    fn to_stored(&self) -> anyhow::Result<StoredAggregate>;

    fn from_stored(stored: StoredAggregate) -> anyhow::Result<Self>;
}

/// Storage-neutral row: shared scalar columns plus a kind-specific payload blob.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAggregate {
    pub capture_time: i64,
    pub total_duration_nanos: f64,
    pub count: u64,
    pub error_count: Option<u64>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum AnyAggregate {
    Overview(OverviewAggregate),
    Percentile(PercentileAggregate),
    Throughput(ThroughputAggregate),
    Synthetic(SyntheticResult),
}

impl AnyAggregate {
    pub fn kind(&self) -> AggregateKind {
        match self {
            AnyAggregate::Overview(_) => AggregateKind::Overview,
            AnyAggregate::Percentile(_) => AggregateKind::Percentile,
            AnyAggregate::Throughput(_) => AggregateKind::Throughput,
            AnyAggregate::Synthetic(_) => AggregateKind::Synthetic,
        }
    }

    pub fn capture_time(&self) -> i64 {
        match self {
            AnyAggregate::Overview(a) => a.capture_time,
            AnyAggregate::Percentile(a) => a.capture_time,
            AnyAggregate::Throughput(a) => a.capture_time,
            AnyAggregate::Synthetic(a) => a.capture_time,
        }
    }

    pub fn to_stored(&self) -> anyhow::Result<StoredAggregate> {
        match self {
            AnyAggregate::Overview(a) => a.to_stored(),
            AnyAggregate::Percentile(a) => a.to_stored(),
            AnyAggregate::Throughput(a) => a.to_stored(),
            AnyAggregate::Synthetic(a) => a.to_stored(),
        }
    }
}

/// Timer tree node. Siblings are unique by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerNode {
    pub name: String,
    pub total_nanos: f64,
    pub count: u64,
    #[serde(default)]
    pub children: Vec<TimerNode>,
}

/// Per-transaction thread statistics. `None` in a field means "not available" for at least
/// one contributing transaction; it stays `None` through every rollup.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStats {
    pub cpu_nanos: Option<f64>,
    pub blocked_nanos: Option<f64>,
    pub waited_nanos: Option<f64>,
    pub allocated_bytes: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewAggregate {
    pub capture_time: i64,
    pub total_duration_nanos: f64,
    pub transaction_count: u64,
    #[serde(default)]
    pub root_timers: Vec<TimerNode>,
    #[serde(default)]
    pub thread_stats: Option<ThreadStats>,
}

#[derive(Debug, Clone)]
pub struct PercentileAggregate {
    pub capture_time: i64,
    pub total_duration_nanos: f64,
    pub transaction_count: u64,
    pub histogram: LazyHistogram,
}

/// `error_count: None` marks buckets recorded before error counts were tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputAggregate {
    pub capture_time: i64,
    pub transaction_count: u64,
    pub error_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticResult {
    pub capture_time: i64,
    pub total_duration_nanos: f64,
    pub execution_count: u64,
    #[serde(default)]
    pub error_intervals: Vec<ErrorInterval>,
}

fn check_duration(total_duration_nanos: f64) -> Result<(), String> {
    if !total_duration_nanos.is_finite() || total_duration_nanos < 0.0 {
        return Err(format!("total duration {} nanos", total_duration_nanos));
    }
    Ok(())
}

fn check_capture_time(capture_time: i64) -> Result<(), String> {
    if !capture_time_in_range(capture_time) {
        return Err(format!("capture time outside 0..={}", MAX_CAPTURE_TIME));
    }
    Ok(())
}

fn check_count(label: &str, count: u64) -> Result<(), String> {
    if count == 0 {
        return Err(format!("{} is zero", label));
    }
    if count > MAX_COUNT {
        return Err(format!("{} {} exceeds {}", label, count, MAX_COUNT));
    }
    Ok(())
}

fn check_thread_stats(stats: &ThreadStats) -> Result<(), String> {
    let fields = [
        ("cpu", stats.cpu_nanos),
        ("blocked", stats.blocked_nanos),
        ("waited", stats.waited_nanos),
        ("allocated", stats.allocated_bytes),
    ];
    match fields
        .into_iter()
        .find(|(_, v)| v.is_some_and(|v| !v.is_finite() || v < 0.0))
    {
        Some((name, Some(v))) => Err(format!("thread stat {} is {}", name, v)),
        _ => Ok(()),
    }
}

impl AggregateRecord for OverviewAggregate {
    const KIND: AggregateKind = AggregateKind::Overview;
    type Collector = OverviewCollector;

    fn capture_time(&self) -> i64 {
        self.capture_time
    }

    fn check(&self) -> Result<(), String> {
        check_capture_time(self.capture_time)?;
        check_count("transaction count", self.transaction_count)?;
        check_duration(self.total_duration_nanos)?;
        self.thread_stats.as_ref().map_or(Ok(()), check_thread_stats)
    }

    fn into_any(self) -> AnyAggregate {
        AnyAggregate::Overview(self)
    }

    fn from_any(any: &AnyAggregate) -> Option<&Self> {
        match any {
            AnyAggregate::Overview(a) => Some(a),
            _ => None,
        }
    }

    fn to_stored(&self) -> anyhow::Result<StoredAggregate> {
        codec::encode_overview(self)
    }

    fn from_stored(stored: StoredAggregate) -> anyhow::Result<Self> {
        codec::decode_overview(stored)
    }
}

impl AggregateRecord for PercentileAggregate {
    const KIND: AggregateKind = AggregateKind::Percentile;
    type Collector = PercentileCollector;

    fn capture_time(&self) -> i64 {
        self.capture_time
    }

    fn check(&self) -> Result<(), String> {
        check_capture_time(self.capture_time)?;
        check_count("transaction count", self.transaction_count)?;
        check_duration(self.total_duration_nanos)
    }

    fn into_any(self) -> AnyAggregate {
        AnyAggregate::Percentile(self)
    }

    fn from_any(any: &AnyAggregate) -> Option<&Self> {
        match any {
            AnyAggregate::Percentile(a) => Some(a),
            _ => None,
        }
    }

    fn to_stored(&self) -> anyhow::Result<StoredAggregate> {
        codec::encode_percentile(self)
    }

    fn from_stored(stored: StoredAggregate) -> anyhow::Result<Self> {
        codec::decode_percentile(stored)
    }
}

impl AggregateRecord for ThroughputAggregate {
    const KIND: AggregateKind = AggregateKind::Throughput;
    type Collector = ThroughputCollector;

    fn capture_time(&self) -> i64 {
        self.capture_time
    }

    fn check(&self) -> Result<(), String> {
        check_capture_time(self.capture_time)?;
        check_count("transaction count", self.transaction_count)?;
        if let Some(errors) = self.error_count
            && errors > self.transaction_count
        {
            return Err(format!(
                "error count {} exceeds transaction count {}",
                errors, self.transaction_count
            ));
        }
        Ok(())
    }

    fn into_any(self) -> AnyAggregate {
        AnyAggregate::Throughput(self)
    }

    fn from_any(any: &AnyAggregate) -> Option<&Self> {
        match any {
            AnyAggregate::Throughput(a) => Some(a),
            _ => None,
        }
    }

    fn to_stored(&self) -> anyhow::Result<StoredAggregate> {
        Ok(codec::encode_throughput(self))
    }

    fn from_stored(stored: StoredAggregate) -> anyhow::Result<Self> {
        Ok(codec::decode_throughput(stored))
    }
}

impl AggregateRecord for SyntheticResult {
    const KIND: AggregateKind = AggregateKind::Synthetic;
    type Collector = SyntheticCollector;

    fn capture_time(&self) -> i64 {
        self.capture_time
    }

    fn check(&self) -> Result<(), String> {
        check_capture_time(self.capture_time)?;
        check_count("execution count", self.execution_count)?;
        check_duration(self.total_duration_nanos)?;
        match self.error_intervals.iter().find(|i| i.from > i.to) {
            Some(bad) => Err(format!("error interval from {} > to {}", bad.from, bad.to)),
            None => Ok(()),
        }
    }

    fn into_any(self) -> AnyAggregate {
        AnyAggregate::Synthetic(self)
    }

    fn from_any(any: &AnyAggregate) -> Option<&Self> {
        match any {
            AnyAggregate::Synthetic(a) => Some(a),
            _ => None,
        }
    }

    fn to_stored(&self) -> anyhow::Result<StoredAggregate> {
        codec::encode_synthetic(self)
    }

    fn from_stored(stored: StoredAggregate) -> anyhow::Result<Self> {
        codec::decode_synthetic(stored)
    }
}

// Record <-> stored row encoding. Scalars go to columns, the kind-specific remainder to a
// versioned wincode (or histogram) payload.

use wincode::{SchemaRead, SchemaWrite};

use super::blob::{self, BLOB_VERSION};
use crate::histogram::LazyHistogram;
use crate::models::{
    ErrorInterval, OverviewAggregate, PercentileAggregate, StoredAggregate, SyntheticResult,
    ThreadStats, ThroughputAggregate, TimerNode,
};

/// Thread stat fields not available for the bucket.
const NOT_AVAILABLE: f64 = -1.0;

#[derive(Debug, SchemaRead, SchemaWrite)]
struct OverviewPayload {
    timers: Vec<FlatTimer>,
    /// Empty = no thread stats; otherwise cpu, blocked, waited, allocated.
    thread_stats: Vec<f64>,
}

/// Timer tree flattened in pre-order.
#[derive(Debug, SchemaRead, SchemaWrite)]
struct FlatTimer {
    name: String,
    depth: u32,
    total_nanos: f64,
    count: u64,
}

pub(crate) fn encode_overview(agg: &OverviewAggregate) -> anyhow::Result<StoredAggregate> {
    let mut timers = Vec::new();
    flatten_timers(&agg.root_timers, 0, &mut timers);
    let thread_stats = agg
        .thread_stats
        .map(|s| {
            [s.cpu_nanos, s.blocked_nanos, s.waited_nanos, s.allocated_bytes]
                .into_iter()
                .map(|v| v.unwrap_or(NOT_AVAILABLE))
                .collect()
        })
        .unwrap_or_default();
    let payload = wincode::serialize(&OverviewPayload {
        timers,
        thread_stats,
    })
    .map_err(|e| anyhow::anyhow!("wincode overview: {}", e))?;
    Ok(StoredAggregate {
        capture_time: agg.capture_time,
        total_duration_nanos: agg.total_duration_nanos,
        count: agg.transaction_count,
        error_count: None,
        payload: blob::with_version_prefix(BLOB_VERSION, payload),
    })
}

pub(crate) fn decode_overview(stored: StoredAggregate) -> anyhow::Result<OverviewAggregate> {
    let payload: OverviewPayload =
        wincode::deserialize(blob::blob_payload(&stored.payload, BLOB_VERSION)?)
            .map_err(|e| anyhow::anyhow!("wincode deserialize overview: {}", e))?;
    let mut pos = 0;
    let root_timers = unflatten_timers(&payload.timers, &mut pos, 0);
    anyhow::ensure!(
        pos == payload.timers.len(),
        "malformed timer tree at {} (entry {})",
        stored.capture_time,
        pos
    );
    let thread_stats = match payload.thread_stats.as_slice() {
        [] => None,
        [cpu, blocked, waited, allocated] => Some(ThreadStats {
            cpu_nanos: available(*cpu),
            blocked_nanos: available(*blocked),
            waited_nanos: available(*waited),
            allocated_bytes: available(*allocated),
        }),
        other => anyhow::bail!("thread stats with {} fields", other.len()),
    };
    Ok(OverviewAggregate {
        capture_time: stored.capture_time,
        total_duration_nanos: stored.total_duration_nanos,
        transaction_count: stored.count,
        root_timers,
        thread_stats,
    })
}

pub(crate) fn encode_percentile(agg: &PercentileAggregate) -> anyhow::Result<StoredAggregate> {
    Ok(StoredAggregate {
        capture_time: agg.capture_time,
        total_duration_nanos: agg.total_duration_nanos,
        count: agg.transaction_count,
        error_count: None,
        payload: blob::with_version_prefix(BLOB_VERSION, agg.histogram.encode()?),
    })
}

pub(crate) fn decode_percentile(stored: StoredAggregate) -> anyhow::Result<PercentileAggregate> {
    let histogram = LazyHistogram::decode(blob::blob_payload(&stored.payload, BLOB_VERSION)?)?;
    Ok(PercentileAggregate {
        capture_time: stored.capture_time,
        total_duration_nanos: stored.total_duration_nanos,
        transaction_count: stored.count,
        histogram,
    })
}

pub(crate) fn encode_throughput(agg: &ThroughputAggregate) -> StoredAggregate {
    StoredAggregate {
        capture_time: agg.capture_time,
        total_duration_nanos: 0.0,
        count: agg.transaction_count,
        error_count: agg.error_count,
        payload: blob::with_version_prefix(BLOB_VERSION, Vec::new()),
    }
}

pub(crate) fn decode_throughput(stored: StoredAggregate) -> ThroughputAggregate {
    ThroughputAggregate {
        capture_time: stored.capture_time,
        transaction_count: stored.count,
        error_count: stored.error_count,
    }
}

pub(crate) fn encode_synthetic(result: &SyntheticResult) -> anyhow::Result<StoredAggregate> {
    let payload = wincode::serialize(&result.error_intervals)
        .map_err(|e| anyhow::anyhow!("wincode error intervals: {}", e))?;
    Ok(StoredAggregate {
        capture_time: result.capture_time,
        total_duration_nanos: result.total_duration_nanos,
        count: result.execution_count,
        error_count: None,
        payload: blob::with_version_prefix(BLOB_VERSION, payload),
    })
}

pub(crate) fn decode_synthetic(stored: StoredAggregate) -> anyhow::Result<SyntheticResult> {
    let error_intervals: Vec<ErrorInterval> =
        wincode::deserialize(blob::blob_payload(&stored.payload, BLOB_VERSION)?)
            .map_err(|e| anyhow::anyhow!("wincode deserialize error intervals: {}", e))?;
    Ok(SyntheticResult {
        capture_time: stored.capture_time,
        total_duration_nanos: stored.total_duration_nanos,
        execution_count: stored.count,
        error_intervals,
    })
}

fn flatten_timers(nodes: &[TimerNode], depth: u32, out: &mut Vec<FlatTimer>) {
    for node in nodes {
        out.push(FlatTimer {
            name: node.name.clone(),
            depth,
            total_nanos: node.total_nanos,
            count: node.count,
        });
        flatten_timers(&node.children, depth + 1, out);
    }
}

fn unflatten_timers(flat: &[FlatTimer], pos: &mut usize, depth: u32) -> Vec<TimerNode> {
    let mut nodes = Vec::new();
    while let Some(f) = flat.get(*pos)
        && f.depth == depth
    {
        *pos += 1;
        let children = unflatten_timers(flat, pos, depth + 1);
        nodes.push(TimerNode {
            name: f.name.clone(),
            total_nanos: f.total_nanos,
            count: f.count,
            children,
        });
    }
    nodes
}

fn available(v: f64) -> Option<f64> {
    if v == NOT_AVAILABLE { None } else { Some(v) }
}

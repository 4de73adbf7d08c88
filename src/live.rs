// Live collector: raw records that have been reported but not yet flushed to level 0.
// Records sharing a capture time are merged in place. The flush writer persists everything at
// or before a settle cutoff and only then removes it, so a query sees each record in exactly
// one place. Records at or before the last flush cutoff are rejected as late.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::oneshot;
use tokio::time::{Duration, interval};

use crate::aggregate_repo::SqliteAggregateRepo;
use crate::clock::Clock;
use crate::engine::LiveAggregateSource;
use crate::models::{
    AggregateKind, AggregateQuery, AggregateRecord, AnyAggregate, MAX_CAPTURE_TIME,
    OverviewAggregate, PercentileAggregate, ThroughputAggregate,
};
use crate::rollup::collector::merge_records;

type SeriesKey = (String, AggregateKind);

#[derive(Default)]
struct Pending {
    series: HashMap<SeriesKey, BTreeMap<i64, AnyAggregate>>,
    /// Highest cutoff handed to a flush.
    flushed_through: Option<i64>,
}

/// A checked record already merged with its pending same-time record, ready to insert.
struct Prepared {
    key: SeriesKey,
    capture_time: i64,
    record: Option<AnyAggregate>,
}

impl Pending {
    fn prepare<T: AggregateRecord>(&self, series_id: &str, record: T) -> anyhow::Result<Prepared> {
        let capture_time = record.capture_time();
        record.check().map_err(|reason| {
            anyhow::anyhow!(
                "invalid {} record at {}: {}",
                T::KIND,
                capture_time,
                reason
            )
        })?;
        if let Some(flushed_through) = self.flushed_through {
            anyhow::ensure!(
                capture_time > flushed_through,
                "late {} record at {} (flushed through {})",
                T::KIND,
                capture_time,
                flushed_through
            );
        }
        let key = (series_id.to_string(), T::KIND);
        let existing = self
            .series
            .get(&key)
            .and_then(|by_time| by_time.get(&capture_time))
            .and_then(T::from_any);
        let merged = match existing {
            Some(existing) => merge_records([existing, &record], capture_time)?,
            None => Some(record),
        };
        Ok(Prepared {
            key,
            capture_time,
            record: merged.map(T::into_any),
        })
    }

    fn insert(&mut self, prepared: Prepared) {
        if let Some(record) = prepared.record {
            self.series
                .entry(prepared.key)
                .or_default()
                .insert(prepared.capture_time, record);
        }
    }
}

#[derive(Default)]
pub struct LiveCollector {
    pending: RwLock<Pending>,
    records_flushed_total: AtomicU64,
}

impl LiveCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one raw record, merging with a pending record at the same capture time.
    pub fn record<T: AggregateRecord>(&self, series_id: &str, record: T) -> anyhow::Result<()> {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        let prepared = pending.prepare(series_id, record)?;
        pending.insert(prepared);
        Ok(())
    }

    /// Adds the three records derived from one transaction batch under one lock: all of them
    /// are accepted or none is.
    pub fn record_transactions(
        &self,
        series_id: &str,
        throughput: ThroughputAggregate,
        overview: OverviewAggregate,
        percentile: PercentileAggregate,
    ) -> anyhow::Result<()> {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        let prepared = [
            pending.prepare(series_id, throughput)?,
            pending.prepare(series_id, overview)?,
            pending.prepare(series_id, percentile)?,
        ];
        for p in prepared {
            pending.insert(p);
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        let pending = self.pending.read().unwrap_or_else(PoisonError::into_inner);
        pending.series.values().map(BTreeMap::len).sum()
    }

    pub fn records_flushed_total(&self) -> u64 {
        self.records_flushed_total.load(Ordering::Relaxed)
    }

    /// Persists pending records with capture time <= `cutoff` at level 0, then drops them from
    /// memory. Records whose save failed stay pending for the next flush.
    pub async fn flush(&self, repo: &SqliteAggregateRepo, cutoff: i64) -> anyhow::Result<usize> {
        let batches: Vec<(SeriesKey, Vec<AnyAggregate>)> = {
            let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
            pending.flushed_through = Some(pending.flushed_through.map_or(cutoff, |f| f.max(cutoff)));
            pending
                .series
                .iter()
                .filter_map(|(key, by_time)| {
                    let settled: Vec<AnyAggregate> =
                        by_time.range(..=cutoff).map(|(_, r)| r.clone()).collect();
                    (!settled.is_empty()).then(|| (key.clone(), settled))
                })
                .collect()
        };

        let mut flushed = 0;
        let mut first_error = None;
        for ((series_id, kind), records) in batches {
            let stored = match records
                .iter()
                .map(AnyAggregate::to_stored)
                .collect::<anyhow::Result<Vec<_>>>()
            {
                Ok(stored) => stored,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            if let Err(e) = repo.save_stored(&series_id, kind, 0, &stored).await {
                first_error.get_or_insert(e);
                continue;
            }
            {
                let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
                let key = (series_id, kind);
                if let Some(by_time) = pending.series.get_mut(&key) {
                    *by_time = by_time.split_off(&cutoff.saturating_add(1));
                    if by_time.is_empty() {
                        pending.series.remove(&key);
                    }
                }
            }
            flushed += stored.len();
        }
        self.records_flushed_total
            .fetch_add(flushed as u64, Ordering::Relaxed);
        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }
}

impl LiveAggregateSource for LiveCollector {
    async fn merge_into<T: AggregateRecord>(
        &self,
        series_id: &str,
        query: &AggregateQuery,
        out: &mut Vec<T>,
    ) -> anyhow::Result<i64> {
        if query.to <= query.from {
            return Ok(query.to);
        }
        let pending = self.pending.read().unwrap_or_else(PoisonError::into_inner);
        let Some(by_time) = pending.series.get(&(series_id.to_string(), T::KIND)) else {
            return Ok(query.to);
        };
        let mut revised_to = query.to;
        for (&capture_time, record) in by_time.range(query.from + 1..=query.to) {
            revised_to = revised_to.min(capture_time - 1);
            out.extend(T::from_any(record).cloned());
        }
        Ok(revised_to)
    }
}

pub struct FlushWriterConfig {
    pub flush_interval_secs: u64,
    /// Records younger than this stay live so late same-bucket reports still merge in memory.
    pub flush_delay_millis: i64,
}

/// Spawns the task that periodically flushes settled live records. On shutdown everything
/// still pending is flushed before the task exits.
pub fn spawn_flush_writer(
    live: Arc<LiveCollector>,
    repo: Arc<SqliteAggregateRepo>,
    clock: Arc<dyn Clock>,
    config: FlushWriterConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut flush_tick = interval(Duration::from_secs(config.flush_interval_secs));
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = flush_tick.tick() => {
                    let cutoff = clock.now_millis() - config.flush_delay_millis;
                    match live.flush(&repo, cutoff).await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(operation = "flush", records_count = n, "live records flushed"),
                        Err(e) => tracing::warn!(error = %e, "flush writer: save failed"),
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
        if let Err(e) = live.flush(&repo, MAX_CAPTURE_TIME).await {
            tracing::warn!(error = %e, "flush writer: final flush failed");
        }
        tracing::debug!("Flush writer shutting down");
    })
}

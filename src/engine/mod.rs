// Rollup/merge engine. One query at a rollup level is answered from three sources, spliced in
// capture-time order:
//   persisted records at the level | raw records not yet rolled up | live (unflushed) records
// The raw tail and live records are rolled up on the fly to the level's interval.

pub mod fallback;

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::error::EngineError;
use crate::models::{AggregateQuery, AggregateRecord};
use crate::rollup::RollupPolicy;
use crate::rollup::collector::roll_up;

pub use fallback::FallbackResult;

/// Persisted aggregate store. Reads cover `(from, to]` and come back ascending by capture time.
pub trait AggregateRepository: Send + Sync + 'static {
    fn read<T: AggregateRecord>(
        &self,
        series_id: &str,
        from: i64,
        to: i64,
        rollup_level: usize,
    ) -> impl Future<Output = anyhow::Result<Vec<T>>> + Send;
}

/// In-memory data that is collected but not yet durable.
pub trait LiveAggregateSource: Send + Sync + 'static {
    /// Appends live raw records in `(query.from, query.to]` to `out` (ascending) and returns
    /// the revised `to`: the last capture time the persisted store is authoritative for.
    fn merge_into<T: AggregateRecord>(
        &self,
        series_id: &str,
        query: &AggregateQuery,
        out: &mut Vec<T>,
    ) -> impl Future<Output = anyhow::Result<i64>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Drop the last record when the one before it is this close to now.
    pub live_tail_suppression_millis: i64,
    /// Fallback only for windows starting more than this many coarsest intervals ago.
    pub fallback_interval_multiplier: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            live_tail_suppression_millis: 60_000,
            fallback_interval_multiplier: 2.0,
        }
    }
}

pub struct RollupEngine<R, L> {
    repo: Arc<R>,
    live: Arc<L>,
    policy: Arc<RollupPolicy>,
    settings: EngineSettings,
}

impl<R, L> Clone for RollupEngine<R, L> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            live: Arc::clone(&self.live),
            policy: Arc::clone(&self.policy),
            settings: self.settings,
        }
    }
}

impl<R: AggregateRepository, L: LiveAggregateSource> RollupEngine<R, L> {
    pub fn new(
        repo: Arc<R>,
        live: Arc<L>,
        policy: Arc<RollupPolicy>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            repo,
            live,
            policy,
            settings,
        }
    }

    pub fn policy(&self) -> &RollupPolicy {
        &self.policy
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Ordered, deduplicated records for `series_id` at `query.rollup_level`.
    ///
    /// Repository and live failures propagate unchanged. Persisted records that are out of
    /// order, misaligned (levels above 0) or invalid fail the query.
    pub async fn get_aggregates<T: AggregateRecord>(
        &self,
        series_id: &str,
        query: &AggregateQuery,
        auto_refresh: bool,
    ) -> Result<Vec<T>, EngineError> {
        let interval_millis = self.policy.interval_millis(query.rollup_level)?;

        let mut live = Vec::new();
        let revised_to = if auto_refresh {
            query.to
        } else {
            self.live
                .merge_into(series_id, query, &mut live)
                .await
                .map_err(EngineError::Live)?
        };

        let mut out: Vec<T> = self
            .repo
            .read(series_id, query.from, revised_to, query.rollup_level)
            .await
            .map_err(EngineError::Repository)?;
        let aligned_to = (query.rollup_level > 0).then_some(interval_millis);
        check_stream(&out, query.rollup_level, aligned_to)?;

        if query.rollup_level == 0 {
            out.extend(live);
            check_stream(&out, 0, None)?;
            return Ok(out);
        }

        // Reads exclude `from`, so starting at the last persisted capture time is the same as
        // starting one milli after it.
        let non_rolled_up_from = out.last().map_or(query.from, |r| r.capture_time());
        let mut raw_tail: Vec<T> = self
            .repo
            .read(series_id, non_rolled_up_from, revised_to, 0)
            .await
            .map_err(EngineError::Repository)?;
        raw_tail.extend(live);
        check_stream(&raw_tail, 0, None)?;
        out.extend(
            roll_up(&raw_tail, interval_millis).map_err(|e| EngineError::Rollup {
                kind: T::KIND,
                reason: format!("{:#}", e),
            })?,
        );

        self.suppress_live_tail(&mut out);
        Ok(out)
    }

    fn suppress_live_tail<T: AggregateRecord>(&self, out: &mut Vec<T>) {
        let [.., next_to_last, _] = out.as_slice() else {
            return;
        };
        let now = self.policy.now_millis();
        if now - next_to_last.capture_time() < self.settings.live_tail_suppression_millis {
            if let Some(dropped) = out.pop() {
                debug!(
                    kind = %T::KIND,
                    capture_time = dropped.capture_time(),
                    "dropped partial tail record"
                );
            }
        }
    }
}

/// Capture times strictly increasing, level-aligned when `aligned_to` is set, and every record
/// passes its own check.
fn check_stream<T: AggregateRecord>(
    records: &[T],
    rollup_level: usize,
    aligned_to: Option<i64>,
) -> Result<(), EngineError> {
    let mut previous: Option<i64> = None;
    for record in records {
        let capture_time = record.capture_time();
        if let Some(previous) = previous
            && capture_time <= previous
        {
            return Err(EngineError::OutOfOrder {
                kind: T::KIND,
                rollup_level,
                previous,
                current: capture_time,
            });
        }
        if let Some(interval_millis) = aligned_to
            && capture_time.rem_euclid(interval_millis) != 0
        {
            return Err(EngineError::MisalignedCaptureTime {
                kind: T::KIND,
                capture_time,
                rollup_level,
                interval_millis,
            });
        }
        record
            .check()
            .map_err(|reason| EngineError::InvalidRecord {
                kind: T::KIND,
                capture_time,
                reason,
            })?;
        previous = Some(capture_time);
    }
    Ok(())
}

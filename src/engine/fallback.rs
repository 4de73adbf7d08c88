// Fallback coordinator: an empty result at a fine level for a window reaching back past the
// fine retention is retried at the coarsest level. Coarse data that ends before the window
// has even completed one coarse bucket is orphaned pre-window data and is discarded.

use tracing::debug;

use super::{AggregateRepository, LiveAggregateSource, RollupEngine};
use crate::error::EngineError;
use crate::models::{AggregateQuery, AggregateRecord};

#[derive(Debug, Clone)]
pub struct FallbackResult<T> {
    pub records: Vec<T>,
    /// Level the records are at (the coarsest level after a fallback).
    pub rollup_level: usize,
    /// Nothing in range at any level.
    pub expired: bool,
}

impl<R: AggregateRepository, L: LiveAggregateSource> RollupEngine<R, L> {
    pub fn should_fallback(&self, query: &AggregateQuery) -> bool {
        let policy = self.policy();
        if query.rollup_level >= policy.coarsest_level() {
            return false;
        }
        let horizon = (policy.coarsest_interval_millis() as f64
            * self.settings().fallback_interval_multiplier) as i64;
        query.from < policy.now_millis().saturating_sub(horizon)
    }

    /// [`RollupEngine::get_aggregates`] plus the coarsest-level fallback.
    pub async fn get_aggregates_with_fallback<T: AggregateRecord>(
        &self,
        series_id: &str,
        query: &AggregateQuery,
        auto_refresh: bool,
    ) -> Result<FallbackResult<T>, EngineError> {
        let records = self
            .get_aggregates::<T>(series_id, query, auto_refresh)
            .await?;
        if !records.is_empty() || !self.should_fallback(query) {
            return Ok(FallbackResult {
                records,
                rollup_level: query.rollup_level,
                expired: false,
            });
        }

        let coarsest = self.policy().coarsest_level();
        debug!(
            series_id,
            kind = %T::KIND,
            from_level = query.rollup_level,
            to_level = coarsest,
            "falling back to coarsest rollup level"
        );
        let records = self
            .get_aggregates::<T>(series_id, &query.with_rollup_level(coarsest), auto_refresh)
            .await?;
        let min_last_capture_time = query
            .from
            .saturating_add(self.policy().coarsest_interval_millis());
        if records
            .last()
            .is_none_or(|r: &T| r.capture_time() < min_last_capture_time)
        {
            return Ok(FallbackResult {
                records: Vec::new(),
                rollup_level: coarsest,
                expired: true,
            });
        }
        Ok(FallbackResult {
            records,
            rollup_level: coarsest,
            expired: false,
        })
    }
}

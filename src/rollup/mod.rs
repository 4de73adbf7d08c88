// Rollup levels and the pure policy around them: which level answers a query, and where a
// capture time lands at a given level. Level 0 is the finest (raw) level; every coarser
// interval is a multiple of the one below it.

pub mod collector;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::models::DataKind;

const MS_PER_HOUR: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupLevelConfig {
    pub interval_millis: i64,
    /// Window size from which this level (instead of the finer one) becomes the view level.
    #[serde(default)]
    pub view_threshold_millis: i64,
    /// 0 = keep forever.
    #[serde(default)]
    pub retention_hours: u32,
}

impl RollupLevelConfig {
    pub fn retention_millis(&self) -> Option<i64> {
        if self.retention_hours == 0 {
            None
        } else {
            Some(self.retention_hours as i64 * MS_PER_HOUR)
        }
    }
}

/// Finest level each chart family may be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MinLevels {
    #[serde(default)]
    pub transaction: usize,
    #[serde(default)]
    pub synthetic: usize,
}

impl MinLevels {
    pub fn for_kind(&self, kind: DataKind) -> usize {
        match kind {
            DataKind::Transaction => self.transaction,
            DataKind::Synthetic => self.synthetic,
        }
    }
}

/// Saturates at `i64::MIN` when the aligned time is not representable.
pub fn floor_rollup_time(capture_time: i64, interval_millis: i64) -> i64 {
    capture_time.saturating_sub(capture_time.rem_euclid(interval_millis))
}

/// Saturates at `i64::MAX` when the aligned time is not representable.
pub fn ceil_rollup_time(capture_time: i64, interval_millis: i64) -> i64 {
    let floor = floor_rollup_time(capture_time, interval_millis);
    if floor == capture_time {
        floor
    } else {
        floor.checked_add(interval_millis).unwrap_or(i64::MAX)
    }
}

/// Bucket a finer capture time belongs to. Capture times are bucket ends, so this is the ceil.
pub fn rollup_capture_time(capture_time: i64, interval_millis: i64) -> i64 {
    ceil_rollup_time(capture_time, interval_millis)
}

/// Checks the level table: non-empty, intervals ascending and hierarchical, thresholds ordered.
pub fn validate_levels(levels: &[RollupLevelConfig]) -> anyhow::Result<()> {
    anyhow::ensure!(!levels.is_empty(), "rollup.levels must not be empty");
    for (i, level) in levels.iter().enumerate() {
        anyhow::ensure!(
            level.interval_millis > 0,
            "rollup.levels[{}].interval_millis must be > 0, got {}",
            i,
            level.interval_millis
        );
        anyhow::ensure!(
            level.view_threshold_millis >= 0,
            "rollup.levels[{}].view_threshold_millis must be >= 0, got {}",
            i,
            level.view_threshold_millis
        );
        if i == 0 {
            continue;
        }
        let prev = &levels[i - 1];
        anyhow::ensure!(
            level.interval_millis > prev.interval_millis
                && level.interval_millis % prev.interval_millis == 0,
            "rollup.levels[{}].interval_millis {} must be a larger multiple of {}",
            i,
            level.interval_millis,
            prev.interval_millis
        );
        anyhow::ensure!(
            level.view_threshold_millis >= prev.view_threshold_millis,
            "rollup.levels[{}].view_threshold_millis must not be below the previous level's",
            i
        );
    }
    Ok(())
}

pub struct RollupPolicy {
    levels: Vec<RollupLevelConfig>,
    min_levels: MinLevels,
    clock: Arc<dyn Clock>,
}

impl RollupPolicy {
    pub fn new(
        levels: Vec<RollupLevelConfig>,
        min_levels: MinLevels,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        validate_levels(&levels)?;
        let coarsest = levels.len() - 1;
        anyhow::ensure!(
            min_levels.transaction <= coarsest && min_levels.synthetic <= coarsest,
            "rollup.min_level entries must be <= {}",
            coarsest
        );
        Ok(Self {
            levels,
            min_levels,
            clock,
        })
    }

    pub fn levels(&self) -> &[RollupLevelConfig] {
        &self.levels
    }

    pub fn coarsest_level(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn interval_millis(&self, rollup_level: usize) -> Result<i64, EngineError> {
        self.levels
            .get(rollup_level)
            .map(|l| l.interval_millis)
            .ok_or(EngineError::UnknownRollupLevel(rollup_level))
    }

    pub fn coarsest_interval_millis(&self) -> i64 {
        self.levels[self.coarsest_level()].interval_millis
    }

    /// Finest level whose view threshold fits the window and whose retention still covers
    /// `from`, never finer than the kind's floor. Falls through to the coarsest level.
    pub fn select_rollup_level(&self, from: i64, to: i64, kind: DataKind) -> usize {
        let window_millis = to.saturating_sub(from);
        let time_ago_millis = self.clock.now_millis().saturating_sub(from);
        let coarsest = self.coarsest_level();
        let floor = self.min_levels.for_kind(kind).min(coarsest);
        for level in floor..coarsest {
            let next = &self.levels[level + 1];
            let retained = self.levels[level]
                .retention_millis()
                .is_none_or(|retention| retention > time_ago_millis);
            if window_millis < next.view_threshold_millis && retained {
                return level;
            }
        }
        coarsest
    }

    /// Report buckets must align with the report timezone's local days, so the view level is
    /// capped at the coarsest level whose interval divides the UTC offset (floor still applies).
    pub fn select_report_rollup_level(
        &self,
        from: i64,
        to: i64,
        kind: DataKind,
        utc_offset_millis: i64,
    ) -> usize {
        let level = self.select_rollup_level(from, to, kind);
        let aligned = (0..=level)
            .rev()
            .find(|&i| utc_offset_millis % self.levels[i].interval_millis == 0)
            .unwrap_or(0);
        aligned.max(self.min_levels.for_kind(kind).min(self.coarsest_level()))
    }
}

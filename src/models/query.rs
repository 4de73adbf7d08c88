// Aggregate queries. `from` is exclusive, `to` is inclusive.

use serde::{Deserialize, Serialize};

/// Capture times and query bounds are epoch millis in `[0, MAX_CAPTURE_TIME]`
/// (9999-12-31T23:59:59.999Z), which leaves rollup arithmetic far from `i64` overflow.
pub const MAX_CAPTURE_TIME: i64 = 253_402_300_799_999;

pub fn capture_time_in_range(capture_time: i64) -> bool {
    (0..=MAX_CAPTURE_TIME).contains(&capture_time)
}

/// A chart or report window: both bounds in range and `from < to`.
pub fn check_window(from: i64, to: i64) -> Result<(), String> {
    if !capture_time_in_range(from) || !capture_time_in_range(to) {
        return Err(format!(
            "window bounds must be within 0..={} (got {}, {})",
            MAX_CAPTURE_TIME, from, to
        ));
    }
    if from >= to {
        return Err(format!("from ({}) must be before to ({})", from, to));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateQuery {
    pub from: i64,
    pub to: i64,
    pub rollup_level: usize,
}

impl AggregateQuery {
    pub fn new(from: i64, to: i64, rollup_level: usize) -> Self {
        Self {
            from,
            to,
            rollup_level,
        }
    }

    pub fn with_from(self, from: i64) -> Self {
        Self { from, ..self }
    }

    pub fn with_to(self, to: i64) -> Self {
        Self { to, ..self }
    }

    pub fn with_rollup_level(self, rollup_level: usize) -> Self {
        Self {
            rollup_level,
            ..self
        }
    }
}

/// Chart family for rollup level selection; each kind has its own minimum level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Transaction,
    Synthetic,
}

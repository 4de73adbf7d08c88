// Engine errors. Collaborator failures pass through untouched; everything else here is an
// invariant violation in stored or live data and is never retried.

use thiserror::Error;

use crate::models::AggregateKind;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Persisted-aggregate read failed.
    #[error(transparent)]
    Repository(anyhow::Error),
    /// Live source read failed.
    #[error(transparent)]
    Live(anyhow::Error),
    #[error("invalid window: {0}")]
    InvalidWindow(String),
    #[error("rollup level {0} is not configured")]
    UnknownRollupLevel(usize),
    #[error(
        "{kind} record at {capture_time} is not aligned to rollup level {rollup_level} ({interval_millis}ms)"
    )]
    MisalignedCaptureTime {
        kind: AggregateKind,
        capture_time: i64,
        rollup_level: usize,
        interval_millis: i64,
    },
    #[error("{kind} capture times out of order at rollup level {rollup_level}: {previous} then {current}")]
    OutOfOrder {
        kind: AggregateKind,
        rollup_level: usize,
        previous: i64,
        current: i64,
    },
    /// Records passed their own checks but could not be merged.
    #[error("{kind} rollup failed: {reason}")]
    Rollup { kind: AggregateKind, reason: String },
    #[error("invalid {kind} record at {capture_time}: {reason}")]
    InvalidRecord {
        kind: AggregateKind,
        capture_time: i64,
        reason: String,
    },
}

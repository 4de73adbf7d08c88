// Wall-clock source. Everything that compares against "now" (level selection, fallback,
// live-tail suppression, chart downslope) reads it through this trait.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Current time in epoch millis.
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, operation = "now_millis", "system time error");
                0
            })
    }
}

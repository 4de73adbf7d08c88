// POST handlers: raw measurements from agents and synthetic monitors, recorded live.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::histogram::LazyHistogram;
use crate::models::{
    ErrorInterval, OverviewAggregate, PercentileAggregate, SyntheticResult, ThreadStats,
    ThroughputAggregate, TimerNode,
};

/// One agent's transactions for one capture interval.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TransactionBatch {
    series_id: String,
    capture_time: i64,
    durations_nanos: Vec<u64>,
    #[serde(default)]
    error_count: u64,
    #[serde(default)]
    root_timers: Vec<TimerNode>,
    #[serde(default)]
    thread_stats: Option<ThreadStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SyntheticBatch {
    monitor_id: String,
    capture_time: i64,
    total_duration_nanos: f64,
    execution_count: u64,
    #[serde(default)]
    error_intervals: Vec<ErrorInterval>,
}

/// POST /api/collector/transactions: derives overview, percentile and throughput records.
pub(super) async fn transactions_handler(
    State(state): State<AppState>,
    Json(batch): Json<TransactionBatch>,
) -> Result<StatusCode, ApiError> {
    if batch.durations_nanos.is_empty() {
        return Err(ApiError::BadRequest("durationsNanos must not be empty".into()));
    }
    let count = batch.durations_nanos.len() as u64;
    let total_duration_nanos: f64 = batch.durations_nanos.iter().map(|&d| d as f64).sum();
    let overview = OverviewAggregate {
        capture_time: batch.capture_time,
        total_duration_nanos,
        transaction_count: count,
        root_timers: batch.root_timers,
        thread_stats: batch.thread_stats,
    };
    let percentile = PercentileAggregate {
        capture_time: batch.capture_time,
        total_duration_nanos,
        transaction_count: count,
        histogram: LazyHistogram::from_values(batch.durations_nanos)
            .map_err(|e| ApiError::BadRequest(format!("durationsNanos: {}", e)))?,
    };
    let throughput = ThroughputAggregate {
        capture_time: batch.capture_time,
        transaction_count: count,
        error_count: Some(batch.error_count),
    };
    check_series_id(&batch.series_id)?;
    state
        .live
        .record_transactions(&batch.series_id, throughput, overview, percentile)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/collector/synthetic: one monitor's executions for one capture interval.
pub(super) async fn synthetic_handler(
    State(state): State<AppState>,
    Json(batch): Json<SyntheticBatch>,
) -> Result<StatusCode, ApiError> {
    let result = SyntheticResult {
        capture_time: batch.capture_time,
        total_duration_nanos: batch.total_duration_nanos,
        execution_count: batch.execution_count,
        error_intervals: batch.error_intervals,
    };
    check_series_id(&batch.monitor_id)?;
    state
        .live
        .record(&batch.monitor_id, result)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

fn check_series_id(series_id: &str) -> Result<(), ApiError> {
    if series_id.is_empty() {
        return Err(ApiError::BadRequest("series id must not be empty".into()));
    }
    Ok(())
}

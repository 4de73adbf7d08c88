// GET handlers: version, charts, report

use axum::Json;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::models::{self, ChartResponse};
use crate::report::{ReportMetric, ReportRequest, build_report};

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_PERCENTILES: [f64; 3] = [50.0, 95.0, 99.0];

#[derive(Debug, Deserialize)]
pub(super) struct ChartParams {
    series: String,
    from: i64,
    to: i64,
    #[serde(default)]
    auto_refresh: bool,
    /// Comma-separated, percentile charts only.
    percentiles: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SyntheticParams {
    /// Comma-separated monitor ids.
    monitors: String,
    from: i64,
    to: i64,
    #[serde(default)]
    auto_refresh: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct ReportParams {
    /// Comma-separated agent ids.
    agents: String,
    metric: ReportMetric,
    from: i64,
    to: i64,
    #[serde(default)]
    utc_offset_millis: i64,
}

fn check_window(from: i64, to: i64) -> Result<(), ApiError> {
    models::check_window(from, to).map_err(ApiError::BadRequest)
}

fn split_ids(ids: &str, param: &str) -> Result<Vec<String>, ApiError> {
    let ids: Vec<String> = ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if ids.is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", param)));
    }
    Ok(ids)
}

fn parse_percentiles(raw: Option<&str>) -> Result<Vec<f64>, ApiError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_PERCENTILES.to_vec());
    };
    raw.split(',')
        .map(|p| {
            p.trim()
                .parse::<f64>()
                .ok()
                .filter(|p| (0.0..=100.0).contains(p))
                .ok_or_else(|| ApiError::BadRequest(format!("invalid percentile: {}", p)))
        })
        .collect()
}

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/charts/overview: average duration.
pub(super) async fn overview_handler(
    State(state): State<AppState>,
    Query(params): Query<ChartParams>,
) -> Result<Json<ChartResponse>, ApiError> {
    check_window(params.from, params.to)?;
    let chart = state
        .charts
        .overview_chart(&params.series, params.from, params.to, params.auto_refresh)
        .await?;
    Ok(Json(chart))
}

/// GET /api/charts/throughput: transactions per minute and error rate.
pub(super) async fn throughput_handler(
    State(state): State<AppState>,
    Query(params): Query<ChartParams>,
) -> Result<Json<ChartResponse>, ApiError> {
    check_window(params.from, params.to)?;
    let chart = state
        .charts
        .throughput_chart(&params.series, params.from, params.to, params.auto_refresh)
        .await?;
    Ok(Json(chart))
}

/// GET /api/charts/percentiles: one series per requested percentile (default 50,95,99).
pub(super) async fn percentiles_handler(
    State(state): State<AppState>,
    Query(params): Query<ChartParams>,
) -> Result<Json<ChartResponse>, ApiError> {
    check_window(params.from, params.to)?;
    let percentiles = parse_percentiles(params.percentiles.as_deref())?;
    let chart = state
        .charts
        .percentile_chart(
            &params.series,
            params.from,
            params.to,
            &percentiles,
            params.auto_refresh,
        )
        .await?;
    Ok(Json(chart))
}

/// GET /api/charts/synthetic: per-monitor duration with the grouped error overlay.
pub(super) async fn synthetic_handler(
    State(state): State<AppState>,
    Query(params): Query<SyntheticParams>,
) -> Result<Json<ChartResponse>, ApiError> {
    check_window(params.from, params.to)?;
    let monitors = split_ids(&params.monitors, "monitors")?;
    let chart = state
        .charts
        .synthetic_chart(&monitors, params.from, params.to, params.auto_refresh)
        .await?;
    Ok(Json(chart))
}

/// GET /api/report: one series per agent, queried in parallel through the worker pool.
pub(super) async fn report_handler(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
) -> Result<Json<ChartResponse>, ApiError> {
    check_window(params.from, params.to)?;
    let request = ReportRequest {
        agent_ids: split_ids(&params.agents, "agents")?,
        metric: params.metric,
        from: params.from,
        to: params.to,
        utc_offset_millis: params.utc_offset_millis,
    };
    let report = build_report(state.charts.engine(), &state.pool, &request).await?;
    Ok(Json(report))
}

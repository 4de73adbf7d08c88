// HTTP routes: charts, report, ingest, version. Static route table, no runtime dispatch.

mod collector;
mod http;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::aggregate_repo::SqliteAggregateRepo;
use crate::chart::ChartService;
use crate::error::EngineError;
use crate::live::LiveCollector;
use crate::worker_pool::WorkerPool;

pub type Charts = ChartService<SqliteAggregateRepo, LiveCollector>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) charts: Arc<Charts>,
    pub(crate) live: Arc<LiveCollector>,
    pub(crate) pool: Arc<WorkerPool>,
}

pub fn app(
    charts: Arc<Charts>,
    live: Arc<LiveCollector>,
    pool: Arc<WorkerPool>,
) -> Router {
    let state = AppState {
        charts,
        live,
        pool,
    };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/charts/overview", get(http::overview_handler)) // GET /api/charts/overview
        .route("/api/charts/throughput", get(http::throughput_handler)) // GET /api/charts/throughput
        .route("/api/charts/percentiles", get(http::percentiles_handler)) // GET /api/charts/percentiles
        .route("/api/charts/synthetic", get(http::synthetic_handler)) // GET /api/charts/synthetic
        .route("/api/report", get(http::report_handler)) // GET /api/report
        .route("/api/collector/transactions", post(collector::transactions_handler)) // POST /api/collector/transactions
        .route("/api/collector/synthetic", post(collector::synthetic_handler)) // POST /api/collector/synthetic
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

/// Handler error. Internal failures are logged and answered with a generic message.
#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(e) => {
                tracing::warn!(error = %e, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

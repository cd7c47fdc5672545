//! HTTP routes for the screener service.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use krx_common::DataValue;

use crate::error::{ApiError, ScreeningError};
use crate::scheduler::SchedulerStatus;
use crate::screener::AnalysisResults;
use crate::ScreenerState;

/// Where `/api/stock-analysis` results come from
pub const ANALYSIS_DATA_SOURCE: &str = "daily_cache_file (Scheduler)";

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    /// Trading date of the snapshot, `YYYYMMDD`
    pub analysis_date: String,
    pub results: AnalysisResults,
    pub data_source: String,
}

#[derive(Debug, Serialize)]
pub struct RunAcceptedResponse {
    pub status: String,
    pub market: String,
}

#[derive(Debug, Deserialize)]
pub struct FinancialsQuery {
    pub ticker: Option<String>,
}

// ============================================================================
// Router
// ============================================================================

/// Build the API router with permissive CORS.
pub fn build_router(state: Arc<ScreenerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/stock-analysis", get(stock_analysis))
        .route("/api/stock-chart/", get(missing_ticker))
        .route("/api/stock-chart/:ticker", get(stock_chart))
        .route("/api/stock-financials", get(stock_financials))
        .route("/api/screener/status", get(screener_status))
        .route("/api/screener/run", post(screener_run))
        .with_state(state)
        .layer(cors)
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "krx-screener".to_string(),
    })
}

/// Latest ranked views for today's trading day.
///
/// 503 until the first run for that day has been persisted.
pub async fn stock_analysis(
    State(state): State<Arc<ScreenerState>>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let trading_day = state.detail.trading_day().await?;
    let snapshot = state.store.load(trading_day).await?;

    Ok(Json(AnalysisResponse {
        analysis_date: snapshot.trading_date.format("%Y%m%d").to_string(),
        results: snapshot.results,
        data_source: ANALYSIS_DATA_SOURCE.to_string(),
    }))
}

pub async fn stock_chart(
    State(state): State<Arc<ScreenerState>>,
    Path(ticker): Path<String>,
) -> Result<Json<DataValue>, ApiError> {
    Ok(Json(state.detail.chart(&ticker).await?))
}

async fn missing_ticker() -> ApiError {
    ApiError::BadRequest("The ticker parameter is required".into())
}

pub async fn stock_financials(
    State(state): State<Arc<ScreenerState>>,
    Query(query): Query<FinancialsQuery>,
) -> Result<Json<DataValue>, ApiError> {
    let ticker = query.ticker.unwrap_or_default();
    Ok(Json(state.detail.financials(&ticker).await?))
}

pub async fn screener_status(State(state): State<Arc<ScreenerState>>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

/// Start a screening run in the background.
pub async fn screener_run(
    State(state): State<Arc<ScreenerState>>,
) -> Result<impl IntoResponse, ApiError> {
    match state.scheduler.spawn_scan().await {
        Ok(_) => {
            tracing::info!(trigger = "api", "Scan started");
            let body = RunAcceptedResponse {
                status: "started".to_string(),
                market: state.market.to_string(),
            };
            Ok((StatusCode::ACCEPTED, Json(body)))
        }
        Err(ScreeningError::AlreadyRunning) => {
            tracing::warn!(trigger = "api", "Scan already in progress, rejecting trigger");
            Err(ApiError::Conflict(ScreeningError::AlreadyRunning.to_string()))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

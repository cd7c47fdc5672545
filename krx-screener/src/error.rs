//! Error types for the screener service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;
use std::path::PathBuf;

use crate::data::{Market, ProviderError};

/// Failures that abort a whole screening run.
///
/// Per-ticker problems are not errors; they become skip reasons.
#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
    #[error("Could not resolve a trading day for {date}: {source}")]
    TradingDayUnresolved {
        date: NaiveDate,
        #[source]
        source: ProviderError,
    },

    #[error("Ticker universe unavailable for {market}: {source}")]
    UniverseUnavailable {
        market: Market,
        #[source]
        source: ProviderError,
    },

    #[error("A screening run is already in progress")]
    AlreadyRunning,

    #[error("Failed to persist snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Snapshot store failures.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// No run has completed for this trading date yet. Expected on read.
    #[error("No snapshot for {date}")]
    NotFound { date: NaiveDate },

    #[error("Snapshot {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Snapshot I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SnapshotError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// HTTP API errors.
///
/// Bodies are `{"detail": "<message>"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NotReady(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "detail": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<krx_common::Error> for ApiError {
    fn from(err: krx_common::Error) -> Self {
        let message = err.to_string();
        match err.status_code() {
            400 => Self::BadRequest(message),
            404 => Self::NotFound(message),
            503 => Self::NotReady(message),
            _ => Self::Internal(message),
        }
    }
}

impl From<SnapshotError> for ApiError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::NotFound { .. } => Self::NotReady(
                "Analysis data is being prepared; today's first run has not finished yet".into(),
            ),
            other => {
                tracing::error!(error = %other, "Failed to read snapshot");
                Self::Internal("Failed to read the analysis data file".into())
            }
        }
    }
}

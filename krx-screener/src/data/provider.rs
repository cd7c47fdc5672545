//! Market data source abstraction.
//!
//! Defines the `MarketDataSource` trait the screening pipeline and the
//! chart/financials services are written against, so tests can swap the
//! KRX adapter for an in-memory source.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use super::{Candle, FundamentalRow, Market};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to market data sources.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream throttled the request
    #[error("Rate limited{}", retry_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// No data for the requested ticker or range
    #[error("Data not available: {0}")]
    DataNotAvailable(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response body did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Internal provider error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn retry_suffix(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(", retry after {} seconds", secs))
        .unwrap_or_default()
}

impl ProviderError {
    /// Check if the error is recoverable (worth retrying)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }

    /// Map onto the shared service error used at the HTTP boundary.
    pub fn into_service_error(self, context: impl Into<String>) -> krx_common::Error {
        let err = match self {
            Self::DataNotAvailable(msg) => krx_common::Error::NotFound(msg),
            Self::InvalidRequest(msg) => krx_common::Error::InvalidInput(msg),
            other => krx_common::Error::External(other.to_string()),
        };
        err.with_context(context)
    }
}

// ============================================================================
// Market Data Source Trait
// ============================================================================

/// Source of listed issues, daily prices and fundamentals.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Source name for logging (e.g., "krx")
    fn name(&self) -> &'static str;

    /// Latest trading day on or before `date`, looking back at most a week.
    async fn nearest_business_day(&self, date: NaiveDate) -> Result<NaiveDate, ProviderError>;

    /// All ticker codes listed on `market` as of `date`.
    async fn list_tickers(
        &self,
        market: Market,
        date: NaiveDate,
    ) -> Result<Vec<String>, ProviderError>;

    /// Display name for a ticker code.
    async fn ticker_name(&self, ticker: &str) -> Result<String, ProviderError>;

    /// Daily OHLCV for `ticker` over `[start, end]`, ascending by date.
    async fn daily_candles(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Candle>, ProviderError>;

    /// Daily fundamentals for `ticker` over `[start, end]`, ascending by date.
    async fn fundamentals(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FundamentalRow>, ProviderError>;
}

// ============================================================================
// Tests
// ============================================================================

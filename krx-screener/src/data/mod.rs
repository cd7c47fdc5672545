//! Market data module for KRX-listed equities.
//!
//! Provides the data source abstraction the screener and the detail
//! services depend on, plus the KRX data portal adapter.
//!
//! # Data Sources
//! - **KRX** (`data.krx.co.kr`): listed issues, adjusted daily OHLCV,
//!   per-issue fundamentals and the KOSPI composite series used to find
//!   trading days.

mod cache;
mod krx;
mod provider;
mod rate_limiter;

pub use cache::TradingDayCache;
pub use krx::KrxAdapter;
pub use provider::{MarketDataSource, ProviderError};
pub use rate_limiter::{shared_limiter, RateLimiter, SharedRateLimiter};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Core Data Types
// ============================================================================

/// KRX equity market segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Kospi,
    Kosdaq,
    Konex,
}

impl Market {
    /// Market id used by the KRX portal (`mktId`).
    pub fn krx_id(self) -> &'static str {
        match self {
            Self::Kospi => "STK",
            Self::Kosdaq => "KSQ",
            Self::Konex => "KNX",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kospi => write!(f, "KOSPI"),
            Self::Kosdaq => write!(f, "KOSDAQ"),
            Self::Konex => write!(f, "KONEX"),
        }
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "KOSPI" | "STK" => Ok(Self::Kospi),
            "KOSDAQ" | "KSQ" => Ok(Self::Kosdaq),
            "KONEX" | "KNX" => Ok(Self::Konex),
            other => Err(format!("Unknown market: {}", other)),
        }
    }
}

/// One trading session for a ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One day of per-share fundamentals.
///
/// KRX reports `-` for values that do not apply (loss-making issues have
/// no PER, for example); those arrive here as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundamentalRow {
    pub date: NaiveDate,
    pub bps: Option<f64>,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub eps: Option<f64>,
    pub div: Option<f64>,
    pub dps: Option<f64>,
}

/// Extract closing prices in series order.
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Extract volumes in series order.
pub fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.volume).collect()
}

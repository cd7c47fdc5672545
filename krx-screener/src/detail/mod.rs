//! On-demand per-ticker detail: price chart with overlays and averaged
//! fundamentals.
//!
//! Nothing here is cached except the trading-day lookup; every request
//! recomputes from fresh upstream data.

mod chart;
mod financials;

pub use chart::chart_points;
pub use financials::average_fundamentals;

use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tracing::info;

use krx_common::{DataValue, Error, ScreenerConfig};

use crate::data::{MarketDataSource, TradingDayCache};
use crate::screener::exchange_today;

/// Chart and financials lookups for a single ticker.
pub struct DetailService {
    source: Arc<dyn MarketDataSource>,
    trading_days: Arc<TradingDayCache>,
    config: ScreenerConfig,
}

impl DetailService {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        trading_days: Arc<TradingDayCache>,
        config: ScreenerConfig,
    ) -> Self {
        Self {
            source,
            trading_days,
            config,
        }
    }

    /// Today's trading day, through the shared cache.
    pub async fn trading_day(&self) -> Result<NaiveDate, Error> {
        let today = exchange_today(&self.config);
        self.trading_days
            .resolve(self.source.as_ref(), today)
            .await
            .map_err(|e| Error::External(e.to_string()).with_context("resolving trading day"))
    }

    /// `[today - lookback, latest trading day]`
    async fn window(&self) -> Result<(NaiveDate, NaiveDate), Error> {
        let end = self.trading_day().await?;
        let start = exchange_today(&self.config) - Duration::days(self.config.lookback_days);
        Ok((start, end))
    }

    /// Daily OHLCV with MA5, MA20 and Bollinger overlays.
    pub async fn chart(&self, ticker: &str) -> Result<DataValue, Error> {
        let ticker = require_ticker(ticker)?;
        info!(ticker = %ticker, "Chart request");

        let (start, end) = self.window().await?;
        let candles = self
            .source
            .daily_candles(ticker, start, end)
            .await
            .map_err(|e| e.into_service_error(format!("loading chart for {}", ticker)))?;

        if candles.is_empty() {
            return Err(Error::NotFound(format!("No price data for ticker {}", ticker)));
        }

        Ok(chart_points(&candles))
    }

    /// Lookback-window means of the daily fundamentals plus ROE.
    pub async fn financials(&self, ticker: &str) -> Result<DataValue, Error> {
        let ticker = require_ticker(ticker)?;
        info!(ticker = %ticker, "Financials request");

        let (start, end) = self.window().await?;
        let rows = self
            .source
            .fundamentals(ticker, start, end)
            .await
            .map_err(|e| e.into_service_error(format!("loading financials for {}", ticker)))?;

        if rows.is_empty() {
            return Err(Error::NotFound(format!("No financial data for ticker {}", ticker)));
        }

        Ok(average_fundamentals(&rows))
    }
}

fn require_ticker(ticker: &str) -> Result<&str, Error> {
    let ticker = ticker.trim();
    if ticker.is_empty() {
        return Err(Error::InvalidInput("The ticker parameter is required".into()));
    }
    Ok(ticker)
}

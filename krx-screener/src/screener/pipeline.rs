//! Screening pipeline.
//!
//! One run walks the whole ticker universe of a market, sequentially:
//! fetch history, filter, compute indicators, resolve a name for
//! survivors, then rank.

use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use krx_common::ScreenerConfig;

use crate::data::{closes, volumes, Candle, Market, MarketDataSource};
use crate::error::ScreeningError;
use crate::indicators::{self, IndicatorSet};

use super::result::{
    AnalysisResults, BandSignal, MacdSignal, RunStats, ScreenedStock, SkipReason, TickerOutcome,
    DEADLINE_RESULT_MESSAGE,
};

// ============================================================================
// Per-ticker Screening
// ============================================================================

/// Values extracted from a ticker that passed every filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub close: f64,
    pub change_pct: f64,
    pub avg_volume: f64,
    pub golden_cross: bool,
    pub breakout: bool,
}

impl Candidate {
    pub fn into_stock(self, ticker: String, name: String) -> ScreenedStock {
        ScreenedStock {
            ticker,
            name,
            close: self.close,
            change_pct: self.change_pct,
            avg_volume: self.avg_volume,
            macd_signal: if self.golden_cross {
                MacdSignal::GoldenCross
            } else {
                MacdSignal::None
            },
            bb_signal: if self.breakout {
                BandSignal::Breakout
            } else {
                BandSignal::Inside
            },
        }
    }
}

/// Apply the history, liquidity and price filters to one series, then
/// evaluate the signal flags at the latest session.
pub fn screen_series(candles: &[Candle], config: &ScreenerConfig) -> Result<Candidate, SkipReason> {
    if candles.len() < config.min_history {
        return Err(SkipReason::InsufficientHistory);
    }

    let closes = closes(candles);
    let window = config.change_window;

    let change_pct =
        indicators::percent_change(&closes, window).ok_or(SkipReason::ZeroReferenceClose)?;

    let avg_volume =
        indicators::trailing_mean(&volumes(candles), window).ok_or(SkipReason::InsufficientHistory)?;
    let avg_price =
        indicators::trailing_mean(&closes, window).ok_or(SkipReason::InsufficientHistory)?;

    if avg_volume < config.min_avg_volume {
        return Err(SkipReason::Illiquid);
    }
    if avg_price < config.min_avg_price {
        return Err(SkipReason::PennyStock);
    }

    let set = IndicatorSet::compute(candles);
    let close = *closes.last().ok_or(SkipReason::InsufficientHistory)?;
    let upper = set.latest_upper_band().ok_or(SkipReason::IndicatorUndefined)?;

    if ![close, change_pct, avg_volume, upper].iter().all(|v| v.is_finite()) {
        return Err(SkipReason::IndicatorUndefined);
    }

    Ok(Candidate {
        close,
        change_pct,
        avg_volume,
        golden_cross: set.latest_golden_cross(),
        breakout: indicators::breakout(close, Some(upper)),
    })
}

// ============================================================================
// Pipeline
// ============================================================================

/// Result of one completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreeningRun {
    pub market: Market,
    pub trading_date: NaiveDate,
    pub results: AnalysisResults,
    pub stats: RunStats,
}

/// Runs the full-universe screen against a market data source.
pub struct ScreeningPipeline {
    source: Arc<dyn MarketDataSource>,
    config: ScreenerConfig,
}

impl ScreeningPipeline {
    pub fn new(source: Arc<dyn MarketDataSource>, config: ScreenerConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &ScreenerConfig {
        &self.config
    }

    /// Screen `market` as of the trading day nearest to `as_of`.
    ///
    /// Only trading-day resolution and the universe fetch can fail the
    /// run. Every per-ticker failure is recorded as a skip.
    pub async fn run(&self, market: Market, as_of: NaiveDate) -> Result<ScreeningRun, ScreeningError> {
        let started = Instant::now();
        let deadline = self
            .config
            .run_deadline_secs
            .map(|secs| started + std::time::Duration::from_secs(secs));

        let trading_date = self
            .source
            .nearest_business_day(as_of)
            .await
            .map_err(|source| ScreeningError::TradingDayUnresolved { date: as_of, source })?;
        let start = as_of - Duration::days(self.config.lookback_days);

        let tickers = self
            .source
            .list_tickers(market, trading_date)
            .await
            .map_err(|source| ScreeningError::UniverseUnavailable { market, source })?;

        info!(
            market = %market,
            trading_date = %trading_date,
            universe = tickers.len(),
            source = self.source.name(),
            "Starting screening run"
        );

        let mut stats = RunStats {
            universe: tickers.len(),
            ..RunStats::default()
        };
        let mut rows = Vec::new();
        let delay = std::time::Duration::from_millis(self.config.ticker_delay_ms);

        for (i, ticker) in tickers.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(
                    processed = stats.processed,
                    remaining = tickers.len() - i,
                    "Run deadline reached, ranking partial results"
                );
                stats.deadline_hit = true;
                break;
            }

            if self.config.progress_every > 0 && (i + 1) % self.config.progress_every == 0 {
                info!(progress = i + 1, total = tickers.len(), ticker = %ticker, "Screening progress");
            }

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let outcome = self.screen_ticker(ticker, start, trading_date, &mut stats).await;
            stats.record(&outcome);
            if let TickerOutcome::Passed(stock) = outcome {
                rows.push(stock);
            }
        }

        stats.duration_secs = started.elapsed().as_secs_f64();

        info!(
            market = %market,
            trading_date = %trading_date,
            universe = stats.universe,
            processed = stats.processed,
            passed = stats.passed,
            fetch_failed = stats.fetch_failed,
            insufficient_history = stats.insufficient_history,
            zero_reference_close = stats.zero_reference_close,
            illiquid = stats.illiquid,
            penny_stock = stats.penny_stock,
            indicator_undefined = stats.indicator_undefined,
            name_fallbacks = stats.name_fallbacks,
            deadline_hit = stats.deadline_hit,
            duration = format!("{:.1}s", stats.duration_secs),
            "Screening run complete"
        );

        let results = if rows.is_empty() && stats.deadline_hit {
            AnalysisResults::empty_with(DEADLINE_RESULT_MESSAGE)
        } else {
            AnalysisResults::from_rows(&rows, self.config.top_n)
        };

        Ok(ScreeningRun {
            market,
            trading_date,
            results,
            stats,
        })
    }

    async fn screen_ticker(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
        stats: &mut RunStats,
    ) -> TickerOutcome {
        let candles = match self.source.daily_candles(ticker, start, end).await {
            Ok(candles) => candles,
            Err(e) => {
                debug!(
                    ticker = %ticker,
                    error = %e,
                    recoverable = e.is_recoverable(),
                    reason = %SkipReason::FetchFailed,
                    "Skipping ticker"
                );
                return TickerOutcome::Skipped(SkipReason::FetchFailed);
            }
        };

        let candidate = match screen_series(&candles, &self.config) {
            Ok(candidate) => candidate,
            Err(reason) => {
                debug!(ticker = %ticker, sessions = candles.len(), reason = %reason, "Skipping ticker");
                return TickerOutcome::Skipped(reason);
            }
        };

        let name = match self.source.ticker_name(ticker).await {
            Ok(name) => name,
            Err(e) => {
                debug!(ticker = %ticker, error = %e, "Name lookup failed, using ticker code");
                stats.name_fallbacks += 1;
                ticker.to_string()
            }
        };

        TickerOutcome::Passed(candidate.into_stock(ticker.to_string(), name))
    }
}

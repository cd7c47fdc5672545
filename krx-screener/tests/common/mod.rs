//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use krx_common::Config;
use krx_screener::data::{Candle, FundamentalRow, Market, MarketDataSource, ProviderError};

pub fn trading_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 3).unwrap()
}

/// Config for tests: no scheduler loop, no pacing, snapshots under `dir`.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.screener.enabled = false;
    config.screener.ticker_delay_ms = 0;
    config.screener.progress_every = 0;
    config.snapshot.dir = dir.to_path_buf();
    config
}

pub fn series(closes: &[f64], volume: f64) -> Vec<Candle> {
    let first = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            date: first + chrono::Duration::days(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        })
        .collect()
}

/// Steady climb from `base` by `step` per session.
pub fn rising(len: usize, base: f64, step: f64) -> Vec<f64> {
    (0..len).map(|i| base + step * i as f64).collect()
}

/// Steady decline followed by a sharp final jump.
pub fn reversal(len: usize) -> Vec<f64> {
    let mut closes: Vec<f64> = (0..len - 1).map(|i| 8000.0 - 50.0 * i as f64).collect();
    closes.push(9000.0);
    closes
}

// ============================================================================
// Mock Source
// ============================================================================

/// In-memory market data source with call counters.
pub struct MockSource {
    pub tickers: Option<Vec<String>>,
    pub candles: HashMap<String, Vec<Candle>>,
    pub fundamentals: HashMap<String, Vec<FundamentalRow>>,
    pub names: HashMap<String, String>,
    pub failing: HashSet<String>,
    pub universe_delay: Duration,
    pub universe_panics: bool,
    pub candle_calls: AtomicU32,
    pub universe_calls: AtomicU32,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            tickers: Some(Vec::new()),
            candles: HashMap::new(),
            fundamentals: HashMap::new(),
            names: HashMap::new(),
            failing: HashSet::new(),
            universe_delay: Duration::ZERO,
            universe_panics: false,
            candle_calls: AtomicU32::new(0),
            universe_calls: AtomicU32::new(0),
        }
    }

    /// Listed ticker with a name and a price history.
    pub fn with_ticker(mut self, ticker: &str, name: &str, candles: Vec<Candle>) -> Self {
        self.push_ticker(ticker);
        self.names.insert(ticker.to_string(), name.to_string());
        self.candles.insert(ticker.to_string(), candles);
        self
    }

    /// Listed ticker whose name lookup fails.
    pub fn with_unnamed(mut self, ticker: &str, candles: Vec<Candle>) -> Self {
        self.push_ticker(ticker);
        self.candles.insert(ticker.to_string(), candles);
        self
    }

    /// Listed ticker whose history fetch fails.
    pub fn with_failing(mut self, ticker: &str) -> Self {
        self.push_ticker(ticker);
        self.failing.insert(ticker.to_string());
        self
    }

    pub fn with_fundamentals(mut self, ticker: &str, rows: Vec<FundamentalRow>) -> Self {
        self.fundamentals.insert(ticker.to_string(), rows);
        self
    }

    pub fn without_universe(mut self) -> Self {
        self.tickers = None;
        self
    }

    pub fn with_universe_delay(mut self, delay: Duration) -> Self {
        self.universe_delay = delay;
        self
    }

    /// Listing the universe panics, as a bug in a source would.
    pub fn with_universe_panic(mut self) -> Self {
        self.universe_panics = true;
        self
    }

    pub fn candle_calls(&self) -> u32 {
        self.candle_calls.load(Ordering::Relaxed)
    }

    fn push_ticker(&mut self, ticker: &str) {
        if let Some(tickers) = self.tickers.as_mut() {
            tickers.push(ticker.to_string());
        }
    }
}

#[async_trait]
impl MarketDataSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn nearest_business_day(&self, _date: NaiveDate) -> Result<NaiveDate, ProviderError> {
        Ok(trading_day())
    }

    async fn list_tickers(
        &self,
        _market: Market,
        _date: NaiveDate,
    ) -> Result<Vec<String>, ProviderError> {
        self.universe_calls.fetch_add(1, Ordering::Relaxed);
        if !self.universe_delay.is_zero() {
            tokio::time::sleep(self.universe_delay).await;
        }
        if self.universe_panics {
            panic!("universe listing blew up");
        }
        self.tickers
            .clone()
            .ok_or_else(|| ProviderError::Network("connection reset".into()))
    }

    async fn ticker_name(&self, ticker: &str) -> Result<String, ProviderError> {
        self.names
            .get(ticker)
            .cloned()
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no name for {}", ticker)))
    }

    async fn daily_candles(
        &self,
        ticker: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<Candle>, ProviderError> {
        self.candle_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.contains(ticker) {
            return Err(ProviderError::Network("timeout".into()));
        }
        Ok(self.candles.get(ticker).cloned().unwrap_or_default())
    }

    async fn fundamentals(
        &self,
        ticker: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<FundamentalRow>, ProviderError> {
        Ok(self.fundamentals.get(ticker).cloned().unwrap_or_default())
    }
}

//! KRX Screener Library
//!
//! Daily full-market technical screener for the Korea Exchange.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    krx-screener (Rust Service)                      │
//! │                           :5001                                     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐      │
//! │  │  KRX Adapter    │  │  Screening      │  │  Snapshot       │      │
//! │  │  (rate limited) │  │  Pipeline       │  │  Store          │      │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘      │
//! │  ┌─────────────────┐  ┌─────────────────┐                           │
//! │  │  Scan Scheduler │  │  Chart and      │                           │
//! │  │  (cron)         │  │  Financials     │                           │
//! │  └─────────────────┘  └─────────────────┘                           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! - **Screening run**: every ticker of one market is fetched, filtered on
//!   liquidity and price, and scored with MACD and Bollinger signals.
//! - **Ranked views**: five top-N lists built from the passing tickers.
//! - **Snapshot**: the ranked views persisted once per trading day; the
//!   ranking API only ever reads snapshots.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod detail;
pub mod error;
pub mod indicators;
pub mod routes;
pub mod scheduler;
pub mod screener;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

use krx_common::Config;

use crate::data::{shared_limiter, KrxAdapter, Market, MarketDataSource, TradingDayCache};
use crate::detail::DetailService;
use crate::scheduler::ScanScheduler;
use crate::screener::{ScreeningPipeline, SnapshotStore};

/// Screener service state
pub struct ScreenerState {
    /// Configuration
    pub config: Config,
    /// Market scanned by the scheduler
    pub market: Market,
    /// Upstream market data
    pub source: Arc<dyn MarketDataSource>,
    /// Trading-day lookups for the read path
    pub trading_days: Arc<TradingDayCache>,
    /// Daily snapshot files
    pub store: Arc<SnapshotStore>,
    /// Scan scheduler and run guard
    pub scheduler: ScanScheduler,
    /// Chart and financials lookups
    pub detail: Arc<DetailService>,
}

impl ScreenerState {
    /// Wire the service around `source`.
    pub fn new(config: Config, source: Arc<dyn MarketDataSource>) -> krx_common::Result<Self> {
        config.validate()?;

        let market: Market = config
            .screener
            .market
            .parse()
            .map_err(krx_common::Error::Config)?;

        let trading_days = Arc::new(TradingDayCache::new(config.source.trading_day_ttl_secs));
        let store = Arc::new(SnapshotStore::new(&config.snapshot));
        let pipeline = Arc::new(ScreeningPipeline::new(
            Arc::clone(&source),
            config.screener.clone(),
        ));
        let scheduler = ScanScheduler::new(
            config.screener.clone(),
            market,
            pipeline,
            Arc::clone(&store),
        )?;
        let detail = Arc::new(DetailService::new(
            Arc::clone(&source),
            Arc::clone(&trading_days),
            config.screener.clone(),
        ));

        Ok(Self {
            config,
            market,
            source,
            trading_days,
            store,
            scheduler,
            detail,
        })
    }
}

/// Main screener service
pub struct ScreenerService {
    state: Arc<ScreenerState>,
}

impl ScreenerService {
    /// Create a service backed by the KRX data portal
    pub fn new(config: Config) -> Result<Self> {
        let limiter = shared_limiter("krx", config.source.requests_per_second);
        let source: Arc<dyn MarketDataSource> =
            Arc::new(KrxAdapter::new(&config.source, limiter));
        Self::with_source(config, source)
    }

    pub fn with_source(config: Config, source: Arc<dyn MarketDataSource>) -> Result<Self> {
        let state = Arc::new(ScreenerState::new(config, source)?);
        Ok(Self { state })
    }

    pub fn state(&self) -> Arc<ScreenerState> {
        Arc::clone(&self.state)
    }

    /// Start the scheduler and serve HTTP until Ctrl-C
    pub async fn start(self) -> Result<()> {
        let network = &self.state.config.network;
        let app = routes::build_router(self.state.clone());

        // Start the scan scheduler
        let scheduler = self.state.scheduler.clone();
        tokio::spawn(async move {
            scheduler.run().await;
        });

        // First scan shortly after startup
        self.state.scheduler.spawn_startup_scan();

        // Start HTTP server
        let addr: SocketAddr = format!("{}:{}", network.host, network.port).parse()?;
        tracing::info!(
            address = %addr,
            market = %self.state.market,
            source = self.state.source.name(),
            "Starting HTTP server"
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.state.scheduler.stop().await;
        tracing::info!("Screener service stopped");

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

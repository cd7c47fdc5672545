//! Full market screener.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │ScanScheduler│────▶│ ScreeningPipeline│────▶│ SnapshotStore │
//! └─────────────┘     └────────┬─────────┘     └───────┬───────┘
//!                              │                       │
//!                   MarketDataSource +          GET /api/stock-analysis
//!                   indicators (per ticker)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let pipeline = ScreeningPipeline::new(source, config.screener.clone());
//! let run = pipeline.run(Market::Kospi, exchange_today(&config.screener)).await?;
//! SnapshotStore::new(&config.snapshot).save(&run.into()).await?;
//! ```

pub mod pipeline;
pub mod result;
pub mod snapshot;

pub use pipeline::{screen_series, Candidate, ScreeningPipeline, ScreeningRun};
pub use result::{
    AnalysisResults, BandSignal, MacdSignal, RankedViews, RunStats, ScreenedStock, SkipReason,
    TickerOutcome, DEADLINE_RESULT_MESSAGE, EMPTY_RESULT_MESSAGE,
};
pub use snapshot::{Snapshot, SnapshotStore};

use chrono::{NaiveDate, Utc};
use krx_common::ScreenerConfig;

/// Current calendar date on the exchange's wall clock.
pub fn exchange_today(config: &ScreenerConfig) -> NaiveDate {
    Utc::now().with_timezone(&config.timezone()).date_naive()
}

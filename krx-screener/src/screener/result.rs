//! Screening rows, ranked views and run statistics.

use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;

// ============================================================================
// Screened Stock
// ============================================================================

/// MACD state at the latest session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacdSignal {
    #[serde(rename = "Golden Cross")]
    GoldenCross,
    #[serde(rename = "-")]
    None,
}

/// Latest close relative to the upper Bollinger band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandSignal {
    Breakout,
    Inside,
}

/// A ticker that passed every filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedStock {
    #[serde(rename = "Ticker")]
    pub ticker: String,
    #[serde(rename = "Name")]
    pub name: String,
    /// Latest close (KRW)
    #[serde(rename = "Close(원)", serialize_with = "serialize_whole")]
    pub close: f64,
    /// Percent change over the change window
    #[serde(rename = "Change_5D(%)")]
    pub change_pct: f64,
    /// Average volume over the change window
    #[serde(rename = "Avg_Vol_5D")]
    pub avg_volume: f64,
    #[serde(rename = "MACD_Signal")]
    pub macd_signal: MacdSignal,
    #[serde(rename = "BB_Signal")]
    pub bb_signal: BandSignal,
}

impl ScreenedStock {
    pub fn is_golden_cross(&self) -> bool {
        self.macd_signal == MacdSignal::GoldenCross
    }

    pub fn is_breakout(&self) -> bool {
        self.bb_signal == BandSignal::Breakout
    }
}

/// Whole won amounts go out as integers (`78100`, not `78100.0`).
fn serialize_whole<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53

    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

// ============================================================================
// Ranked Views
// ============================================================================

/// The five rankings served to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedViews {
    pub top_risers: Vec<ScreenedStock>,
    pub top_fallers: Vec<ScreenedStock>,
    pub top_volume: Vec<ScreenedStock>,
    pub macd_golden_cross: Vec<ScreenedStock>,
    pub bb_breakout: Vec<ScreenedStock>,
}

impl RankedViews {
    /// Rank `rows` (in encounter order).
    ///
    /// Sorts are stable, so equal keys keep encounter order. The two
    /// signal views are filtered, not capped.
    pub fn build(rows: &[ScreenedStock], top_n: usize) -> Self {
        Self {
            top_risers: top_by(rows, top_n, |a, b| b.change_pct.total_cmp(&a.change_pct)),
            top_fallers: top_by(rows, top_n, |a, b| a.change_pct.total_cmp(&b.change_pct)),
            top_volume: top_by(rows, top_n, |a, b| b.avg_volume.total_cmp(&a.avg_volume)),
            macd_golden_cross: rows.iter().filter(|r| r.is_golden_cross()).cloned().collect(),
            bb_breakout: rows.iter().filter(|r| r.is_breakout()).cloned().collect(),
        }
    }
}

fn top_by<F>(rows: &[ScreenedStock], n: usize, cmp: F) -> Vec<ScreenedStock>
where
    F: FnMut(&ScreenedStock, &ScreenedStock) -> Ordering,
{
    let mut sorted = rows.to_vec();
    sorted.sort_by(cmp);
    sorted.truncate(n);
    sorted
}

/// Message stored when no ticker survives the filters.
pub const EMPTY_RESULT_MESSAGE: &str = "No tickers satisfied the screening conditions.";

/// Message stored when the run deadline passed before any ticker survived.
pub const DEADLINE_RESULT_MESSAGE: &str =
    "The screening run hit its deadline before any ticker satisfied the conditions.";

/// Outcome of a run as stored and served.
///
/// The empty case is a valid result, not an error: `{"message": …, "data": {}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisResults {
    Ranked(RankedViews),
    Empty {
        message: String,
        data: serde_json::Map<String, serde_json::Value>,
    },
}

impl AnalysisResults {
    pub fn empty() -> Self {
        Self::empty_with(EMPTY_RESULT_MESSAGE)
    }

    pub fn empty_with(message: &str) -> Self {
        Self::Empty {
            message: message.to_string(),
            data: serde_json::Map::new(),
        }
    }

    pub fn from_rows(rows: &[ScreenedStock], top_n: usize) -> Self {
        if rows.is_empty() {
            Self::empty()
        } else {
            Self::Ranked(RankedViews::build(rows, top_n))
        }
    }

    pub fn views(&self) -> Option<&RankedViews> {
        match self {
            Self::Ranked(views) => Some(views),
            Self::Empty { .. } => None,
        }
    }
}

// ============================================================================
// Per-ticker Outcomes
// ============================================================================

/// Why a ticker was left out of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Price history could not be fetched or parsed
    FetchFailed,
    /// Fewer sessions than the indicator minimum
    InsufficientHistory,
    /// Percent-change reference close was zero
    ZeroReferenceClose,
    /// Average volume below the floor
    Illiquid,
    /// Average close below the floor
    PennyStock,
    /// An indicator needed for the flags was undefined
    IndicatorUndefined,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FetchFailed => "fetch_failed",
            Self::InsufficientHistory => "insufficient_history",
            Self::ZeroReferenceClose => "zero_reference_close",
            Self::Illiquid => "illiquid",
            Self::PennyStock => "penny_stock",
            Self::IndicatorUndefined => "indicator_undefined",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickerOutcome {
    Passed(ScreenedStock),
    Skipped(SkipReason),
}

/// Counters describing one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub universe: usize,
    pub processed: usize,
    pub passed: usize,
    pub fetch_failed: usize,
    pub insufficient_history: usize,
    pub zero_reference_close: usize,
    pub illiquid: usize,
    pub penny_stock: usize,
    pub indicator_undefined: usize,
    /// Passing rows whose name lookup failed and fell back to the code
    pub name_fallbacks: usize,
    pub deadline_hit: bool,
    pub duration_secs: f64,
}

impl RunStats {
    pub fn record(&mut self, outcome: &TickerOutcome) {
        self.processed += 1;
        match outcome {
            TickerOutcome::Passed(_) => self.passed += 1,
            TickerOutcome::Skipped(reason) => self.record_skip(*reason),
        }
    }

    fn record_skip(&mut self, reason: SkipReason) {
        let counter = match reason {
            SkipReason::FetchFailed => &mut self.fetch_failed,
            SkipReason::InsufficientHistory => &mut self.insufficient_history,
            SkipReason::ZeroReferenceClose => &mut self.zero_reference_close,
            SkipReason::Illiquid => &mut self.illiquid,
            SkipReason::PennyStock => &mut self.penny_stock,
            SkipReason::IndicatorUndefined => &mut self.indicator_undefined,
        };
        *counter += 1;
    }

    pub fn skipped(&self) -> usize {
        self.processed - self.passed
    }
}

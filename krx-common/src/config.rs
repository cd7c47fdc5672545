//! Configuration management for the KRX screener.
//!
//! The service reads a single configuration file at `~/.krx-screener/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (KRX_SCREENER_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `KRX_SCREENER_HOST` → network.host
//! - `KRX_SCREENER_PORT` → network.port
//! - `KRX_SCREENER_LOG_LEVEL` → observability.log_level
//! - `KRX_SCREENER_SNAPSHOT_DIR` → snapshot.dir
//! - `KRX_SCREENER_MARKET` → screener.market

use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

/// Slowest MACD EMA span plus the signal span; no indicator set is complete before this.
pub const MIN_INDICATOR_HISTORY: usize = 26 + 9;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".krx-screener"),
        |dirs| dirs.home_dir().join(".krx-screener"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Network Configuration
// ============================================================================

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address. Default is `127.0.0.1` (local only).
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5001
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets forced to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Screener Configuration
// ============================================================================

/// Configuration for the daily market screening run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenerConfig {
    /// Whether the scheduled screener is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Market whose full ticker universe is scanned (KOSPI, KOSDAQ, KONEX)
    #[serde(default = "default_market")]
    pub market: String,

    /// Calendar days of history fetched per ticker
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    /// Minimum sessions of history required before any indicator is computed
    #[serde(default = "default_min_history")]
    pub min_history: usize,

    /// Sessions used for percent change and the liquidity averages
    #[serde(default = "default_change_window")]
    pub change_window: usize,

    /// Size of the risers / fallers / volume views
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Minimum average volume over `change_window` sessions
    #[serde(default = "default_min_avg_volume")]
    pub min_avg_volume: f64,

    /// Minimum average close over `change_window` sessions (KRW)
    #[serde(default = "default_min_avg_price")]
    pub min_avg_price: f64,

    /// Pause between per-ticker fetches. The KRX portal blocks clients that skip it.
    #[serde(default = "default_ticker_delay_ms")]
    pub ticker_delay_ms: u64,

    /// Cron expression (seconds first) for the daily scan, in exchange-local time
    #[serde(default = "default_schedule_cron")]
    pub schedule_cron: String,

    /// Delay before the one-shot scan fired at startup
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    /// Exchange-local UTC offset in hours (KST = +9, no DST)
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Optional soft deadline for one run
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,

    /// Log a progress line every N tickers
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            market: default_market(),
            lookback_days: default_lookback_days(),
            min_history: default_min_history(),
            change_window: default_change_window(),
            top_n: default_top_n(),
            min_avg_volume: default_min_avg_volume(),
            min_avg_price: default_min_avg_price(),
            ticker_delay_ms: default_ticker_delay_ms(),
            schedule_cron: default_schedule_cron(),
            startup_delay_secs: default_startup_delay_secs(),
            utc_offset_hours: default_utc_offset_hours(),
            run_deadline_secs: None,
            progress_every: default_progress_every(),
        }
    }
}

impl ScreenerConfig {
    /// Exchange-local timezone.
    ///
    /// Falls back to UTC when the offset is out of range; `Config::validate` rejects that case.
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Parsed cron schedule for the daily scan.
    pub fn schedule(&self) -> std::result::Result<Schedule, Error> {
        Schedule::from_str(&self.schedule_cron).map_err(|e| {
            Error::Config(format!("Invalid schedule_cron '{}': {}", self.schedule_cron, e))
        })
    }
}

fn default_market() -> String {
    "KOSPI".to_string()
}

fn default_lookback_days() -> i64 {
    90
}

fn default_min_history() -> usize {
    MIN_INDICATOR_HISTORY
}

fn default_change_window() -> usize {
    5
}

fn default_top_n() -> usize {
    10
}

fn default_min_avg_volume() -> f64 {
    50_000.0
}

fn default_min_avg_price() -> f64 {
    1_000.0
}

fn default_ticker_delay_ms() -> u64 {
    100
}

fn default_schedule_cron() -> String {
    "0 30 17 * * Mon-Fri".to_string() // 17:30 KST on weekdays, after the close
}

fn default_startup_delay_secs() -> u64 {
    10
}

fn default_utc_offset_hours() -> i32 {
    9
}

fn default_progress_every() -> usize {
    100
}

// ============================================================================
// Snapshot Configuration
// ============================================================================

/// Where daily analysis snapshots are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory holding one JSON document per trading date
    #[serde(default = "default_snapshot_dir")]
    pub dir: PathBuf,

    /// File name prefix; the document is `<prefix><YYYYMMDD>.json`
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

fn default_file_prefix() -> String {
    "analysis_cache_".to_string()
}

// ============================================================================
// Market Data Source Configuration
// ============================================================================

/// KRX data portal access settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// JSON endpoint of the KRX market data portal
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Referer header the portal expects
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Global request budget shared by the scan and the HTTP handlers
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long a resolved trading day is reused by the read path
    #[serde(default = "default_trading_day_ttl_secs")]
    pub trading_day_ttl_secs: i64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            referer: default_referer(),
            requests_per_second: default_requests_per_second(),
            timeout_secs: default_timeout_secs(),
            trading_day_ttl_secs: default_trading_day_ttl_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://data.krx.co.kr/comm/bldAttendant/getJsonData.cmd".to_string()
}

fn default_referer() -> String {
    "http://data.krx.co.kr/contents/MDC/MDI/mdiLoader/index.cmd".to_string()
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_trading_day_ttl_secs() -> i64 {
    600
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP listener
    #[serde(default)]
    pub network: NetworkConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Daily screening run
    #[serde(default)]
    pub screener: ScreenerConfig,

    /// Snapshot storage
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Upstream market data source
    #[serde(default)]
    pub source: SourceConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("KRX_SCREENER_HOST") {
            self.network.host = host;
        }
        if let Some(port) = lookup("KRX_SCREENER_PORT") {
            if let Ok(p) = port.parse() {
                self.network.port = p;
            }
        }
        if let Some(level) = lookup("KRX_SCREENER_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(dir) = lookup("KRX_SCREENER_SNAPSHOT_DIR") {
            self.snapshot.dir = PathBuf::from(dir);
        }
        if let Some(market) = lookup("KRX_SCREENER_MARKET") {
            self.screener.market = market;
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> std::result::Result<(), Error> {
        let screener = &self.screener;

        screener.schedule()?;

        if screener.top_n == 0 {
            return Err(Error::Config("screener.top_n must be at least 1".into()));
        }
        if screener.change_window == 0 {
            return Err(Error::Config("screener.change_window must be at least 1".into()));
        }
        if screener.min_history < MIN_INDICATOR_HISTORY {
            return Err(Error::Config(format!(
                "screener.min_history must be at least {} sessions",
                MIN_INDICATOR_HISTORY
            )));
        }
        if screener.change_window > screener.min_history {
            return Err(Error::Config(
                "screener.change_window cannot exceed screener.min_history".into(),
            ));
        }
        if !(-12..=14).contains(&screener.utc_offset_hours) {
            return Err(Error::Config(format!(
                "screener.utc_offset_hours out of range: {}",
                screener.utc_offset_hours
            )));
        }
        if self.source.requests_per_second == 0 {
            return Err(Error::Config("source.requests_per_second must be at least 1".into()));
        }

        Ok(())
    }
}

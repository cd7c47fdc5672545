//! KRX data portal adapter.
//!
//! # API
//! All queries are form-encoded POSTs to a single JSON endpoint
//! (`getJsonData.cmd`), selected by the `bld` parameter.
//!
//! # Quirks
//! - Numbers arrive as strings with thousands separators (`"82,200"`);
//!   `-` or an empty string means the value does not apply
//! - Dates arrive as `YYYY/MM/DD`
//! - Price history comes back newest first
//! - Requests without a portal `Referer` are rejected
//! - Issue-level queries take the ISIN (`KR7005930003`), not the short
//!   code (`005930`)

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

use krx_common::SourceConfig;

use super::provider::{MarketDataSource, ProviderError};
use super::rate_limiter::SharedRateLimiter;
use super::{Candle, FundamentalRow, Market};

// ============================================================================
// Constants
// ============================================================================

/// All listed issues of a market for one trading date
const ISSUE_LIST_BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT01501";

/// Adjusted daily OHLCV for one issue over a date range
const ISSUE_OHLCV_BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT01701";

/// Daily BPS/PER/PBR/EPS/DIV/DPS for one issue over a date range
const ISSUE_FUNDAMENTAL_BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT03502";

/// Daily index series; used with the KOSPI composite to find sessions
const INDEX_OHLCV_BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT00301";

/// Issue search by code or name
const ISSUE_FINDER_BLD: &str = "dbms/comm/finder/finder_stkisu";

/// Calendar days searched backwards for a trading session
const BUSINESS_DAY_LOOKBACK_DAYS: i64 = 7;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Retry delay suggested after the portal throttles us (seconds)
const RATE_LIMIT_RETRY_SECS: u64 = 10;

// ============================================================================
// Response Types
// ============================================================================

/// Portal envelope; the row block name differs per query.
#[derive(Debug, Deserialize)]
struct KrxResponse<T> {
    #[serde(rename = "output", alias = "OutBlock_1", alias = "block1", default = "Vec::new")]
    rows: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct IssueRow {
    #[serde(rename = "ISU_SRT_CD")]
    short_code: String,
    #[serde(rename = "ISU_CD")]
    isin: String,
    #[serde(rename = "ISU_ABBRV")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct FinderRow {
    full_code: String,
    short_code: String,
    #[serde(rename = "codeName")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct OhlcvRow {
    #[serde(rename = "TRD_DD")]
    date: String,
    #[serde(rename = "TDD_OPNPRC", default)]
    open: String,
    #[serde(rename = "TDD_HGPRC", default)]
    high: String,
    #[serde(rename = "TDD_LWPRC", default)]
    low: String,
    #[serde(rename = "TDD_CLSPRC", default)]
    close: String,
    #[serde(rename = "ACC_TRDVOL", default)]
    volume: String,
}

#[derive(Debug, Deserialize)]
struct FundamentalRecord {
    #[serde(rename = "TRD_DD")]
    date: String,
    #[serde(rename = "BPS", default)]
    bps: String,
    #[serde(rename = "PER", default)]
    per: String,
    #[serde(rename = "PBR", default)]
    pbr: String,
    #[serde(rename = "EPS", default)]
    eps: String,
    #[serde(rename = "DVD_YLD", default)]
    div: String,
    #[serde(rename = "DPS", default)]
    dps: String,
}

#[derive(Debug, Deserialize)]
struct SessionRow {
    #[serde(rename = "TRD_DD")]
    date: String,
}

// ============================================================================
// Field Parsing
// ============================================================================

/// Parse a portal number (`"1,234.5"`); `-` and blanks are `None`.
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse().ok()
}

fn parse_date(raw: &str) -> Result<NaiveDate, ProviderError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y/%m/%d")
        .map_err(|e| ProviderError::Parse(format!("Failed to parse date '{}': {}", raw, e)))
}

fn krx_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

impl OhlcvRow {
    /// `None` for rows without a close (suspended sessions report `-`).
    fn into_candle(self) -> Result<Option<Candle>, ProviderError> {
        let date = parse_date(&self.date)?;
        let Some(close) = parse_number(&self.close) else {
            return Ok(None);
        };

        Ok(Some(Candle {
            date,
            open: parse_number(&self.open).unwrap_or(close),
            high: parse_number(&self.high).unwrap_or(close),
            low: parse_number(&self.low).unwrap_or(close),
            close,
            volume: parse_number(&self.volume).unwrap_or(0.0),
        }))
    }
}

impl FundamentalRecord {
    fn into_row(self) -> Result<FundamentalRow, ProviderError> {
        Ok(FundamentalRow {
            date: parse_date(&self.date)?,
            bps: parse_number(&self.bps),
            per: parse_number(&self.per),
            pbr: parse_number(&self.pbr),
            eps: parse_number(&self.eps),
            div: parse_number(&self.div),
            dps: parse_number(&self.dps),
        })
    }
}

// ============================================================================
// KRX Adapter
// ============================================================================

/// Short code → ISIN and abbreviated name.
#[derive(Debug, Clone)]
struct IssueInfo {
    isin: String,
    name: String,
}

/// KRX data portal client.
pub struct KrxAdapter {
    client: reqwest::Client,
    base_url: String,
    referer: String,
    rate_limiter: SharedRateLimiter,
    issues: RwLock<HashMap<String, IssueInfo>>,
}

impl KrxAdapter {
    /// Create an adapter drawing from the shared `rate_limiter`.
    pub fn new(config: &SourceConfig, rate_limiter: SharedRateLimiter) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.clone(),
            referer: config.referer.clone(),
            rate_limiter,
            issues: RwLock::new(HashMap::new()),
        }
    }

    /// POST one `bld` query and decode its row block.
    async fn call_api<T>(&self, bld: &str, params: &[(&str, String)]) -> Result<Vec<T>, ProviderError>
    where
        T: DeserializeOwned,
    {
        self.rate_limiter.acquire().await;

        debug!(bld = %bld, "Calling KRX portal");

        let mut form: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 1);
        form.push(("bld", bld));
        form.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        let response = self
            .client
            .post(&self.base_url)
            .header(reqwest::header::REFERER, &self.referer)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Network("Request timeout".into())
                } else if e.is_connect() {
                    ProviderError::Network("Connection failed".into())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: Some(RATE_LIMIT_RETRY_SECS),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Internal(format!("HTTP {}: {}", status, body)));
        }

        // A blocked client gets an HTML "LOGOUT" page with a 200 status.
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("Failed to read response: {}", e)))?;

        let parsed: KrxResponse<T> = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Parse(format!("Failed to parse {} response: {}", bld, e)))?;

        Ok(parsed.rows)
    }

    fn cached_issue(&self, ticker: &str) -> Option<IssueInfo> {
        self.issues.read().ok()?.get(ticker).cloned()
    }

    fn remember_issues(&self, rows: impl IntoIterator<Item = (String, IssueInfo)>) {
        if let Ok(mut issues) = self.issues.write() {
            issues.extend(rows);
        }
    }

    /// Resolve a short code, consulting the issue finder on a cache miss.
    async fn issue(&self, ticker: &str) -> Result<IssueInfo, ProviderError> {
        if let Some(info) = self.cached_issue(ticker) {
            return Ok(info);
        }

        let rows: Vec<FinderRow> = self
            .call_api(
                ISSUE_FINDER_BLD,
                &[
                    ("mktsel", "ALL".to_string()),
                    ("searchText", ticker.to_string()),
                ],
            )
            .await?;

        let info = rows
            .into_iter()
            .find(|row| row.short_code.trim_start_matches('A') == ticker)
            .map(|row| IssueInfo {
                isin: row.full_code,
                name: row.name,
            })
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("Unknown ticker: {}", ticker)))?;

        self.remember_issues([(ticker.to_string(), info.clone())]);
        Ok(info)
    }
}

#[async_trait]
impl MarketDataSource for KrxAdapter {
    fn name(&self) -> &'static str {
        "krx"
    }

    async fn nearest_business_day(&self, date: NaiveDate) -> Result<NaiveDate, ProviderError> {
        let start = date - Duration::days(BUSINESS_DAY_LOOKBACK_DAYS);

        let rows: Vec<SessionRow> = self
            .call_api(
                INDEX_OHLCV_BLD,
                &[
                    ("indIdx", "1".to_string()),
                    ("indIdx2", "001".to_string()),
                    ("strtDd", krx_date(start)),
                    ("endDd", krx_date(date)),
                ],
            )
            .await?;

        let mut latest = None;
        for row in rows {
            let day = parse_date(&row.date)?;
            if day <= date && latest.map_or(true, |l| day > l) {
                latest = Some(day);
            }
        }

        latest.ok_or_else(|| {
            ProviderError::DataNotAvailable(format!("No trading session in the week before {}", date))
        })
    }

    async fn list_tickers(
        &self,
        market: Market,
        date: NaiveDate,
    ) -> Result<Vec<String>, ProviderError> {
        let rows: Vec<IssueRow> = self
            .call_api(
                ISSUE_LIST_BLD,
                &[
                    ("mktId", market.krx_id().to_string()),
                    ("trdDd", krx_date(date)),
                    ("share", "1".to_string()),
                    ("money", "1".to_string()),
                ],
            )
            .await?;

        if rows.is_empty() {
            return Err(ProviderError::DataNotAvailable(format!(
                "No {} issues listed on {}",
                market, date
            )));
        }

        let tickers: Vec<String> = rows.iter().map(|r| r.short_code.clone()).collect();
        self.remember_issues(rows.into_iter().map(|r| {
            (
                r.short_code,
                IssueInfo {
                    isin: r.isin,
                    name: r.name,
                },
            )
        }));

        debug!(market = %market, date = %date, count = tickers.len(), "Fetched ticker universe");
        Ok(tickers)
    }

    async fn ticker_name(&self, ticker: &str) -> Result<String, ProviderError> {
        Ok(self.issue(ticker).await?.name)
    }

    async fn daily_candles(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Candle>, ProviderError> {
        let issue = self.issue(ticker).await?;

        let rows: Vec<OhlcvRow> = self
            .call_api(
                ISSUE_OHLCV_BLD,
                &[
                    ("isuCd", issue.isin),
                    ("strtDd", krx_date(start)),
                    ("endDd", krx_date(end)),
                    ("adjStkPrc", "2".to_string()),
                    ("share", "1".to_string()),
                    ("money", "1".to_string()),
                ],
            )
            .await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_candle()? {
                Some(candle) => candles.push(candle),
                None => debug!(ticker = %ticker, "Skipping session without a close"),
            }
        }

        if candles.is_empty() {
            return Err(ProviderError::DataNotAvailable(format!(
                "No price history for {} between {} and {}",
                ticker, start, end
            )));
        }

        candles.sort_by_key(|c| c.date);
        Ok(candles)
    }

    async fn fundamentals(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FundamentalRow>, ProviderError> {
        let issue = self.issue(ticker).await?;

        let records: Vec<FundamentalRecord> = self
            .call_api(
                ISSUE_FUNDAMENTAL_BLD,
                &[
                    ("searchType", "2".to_string()),
                    ("mktId", "ALL".to_string()),
                    ("isuCd", issue.isin),
                    ("strtDd", krx_date(start)),
                    ("endDd", krx_date(end)),
                ],
            )
            .await?;

        let mut rows = records
            .into_iter()
            .map(FundamentalRecord::into_row)
            .collect::<Result<Vec<_>, _>>()?;

        if rows.is_empty() {
            warn!(ticker = %ticker, "No fundamentals returned");
            return Err(ProviderError::DataNotAvailable(format!(
                "No fundamentals for {} between {} and {}",
                ticker, start, end
            )));
        }

        rows.sort_by_key(|r| r.date);
        Ok(rows)
    }
}

// ============================================================================
// Tests
// ============================================================================

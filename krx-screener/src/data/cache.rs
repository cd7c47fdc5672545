//! Trading-day cache.
//!
//! The read path resolves "today" to a trading day on every request. This
//! keeps resolved days in memory with a TTL so those requests do not each
//! hit the data portal.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::provider::{MarketDataSource, ProviderError};

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl_secs: i64) -> Self {
        Self {
            data,
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Calendar date → resolved trading day.
pub struct TradingDayCache {
    days: RwLock<HashMap<NaiveDate, CacheEntry<NaiveDate>>>,
    ttl_secs: i64,
}

impl TradingDayCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            days: RwLock::new(HashMap::new()),
            ttl_secs,
        }
    }

    /// Cached trading day for `date`, if present and fresh.
    pub fn get(&self, date: NaiveDate) -> Option<NaiveDate> {
        let cache = self.days.read().ok()?;
        cache
            .get(&date)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.data)
    }

    pub fn insert(&self, date: NaiveDate, trading_day: NaiveDate) {
        if let Ok(mut cache) = self.days.write() {
            // Only a handful of calendar dates are ever live at once.
            cache.retain(|_, entry| !entry.is_expired());
            cache.insert(date, CacheEntry::new(trading_day, self.ttl_secs));
        }
    }

    /// Resolve `date` through the cache, asking `source` on a miss.
    ///
    /// Uses the same `nearest_business_day` rule as the screening run, so
    /// readers and the writer agree on the snapshot key.
    pub async fn resolve(
        &self,
        source: &dyn MarketDataSource,
        date: NaiveDate,
    ) -> Result<NaiveDate, ProviderError> {
        if let Some(day) = self.get(date) {
            return Ok(day);
        }

        let day = source.nearest_business_day(date).await?;
        debug!(date = %date, trading_day = %day, "Resolved trading day");
        self.insert(date, day);
        Ok(day)
    }

    pub fn len(&self) -> usize {
        self.days.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

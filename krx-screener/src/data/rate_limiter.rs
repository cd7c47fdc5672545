//! Token bucket rate limiter for KRX portal requests.
//!
//! One bucket is shared by the screening run and the HTTP handlers so the
//! process as a whole never exceeds the portal's tolerated request rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens are stored in thousandths so partial refills accumulate.
const TOKEN_SCALE: u64 = 1000;

/// A token bucket rate limiter.
///
/// Holds at most `capacity` tokens (one second of budget) and refills
/// continuously at `capacity` tokens per second.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    /// Available tokens, scaled by `TOKEN_SCALE`
    tokens: AtomicU64,
    /// Scaled tokens added per elapsed millisecond
    refill_per_ms: f64,
    last_refill: Mutex<Instant>,
    name: String,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_second` requests each second.
    pub fn new(name: impl Into<String>, requests_per_second: u32) -> Self {
        let capacity = requests_per_second.max(1);

        Self {
            capacity,
            tokens: AtomicU64::new(u64::from(capacity) * TOKEN_SCALE),
            refill_per_ms: f64::from(capacity) * TOKEN_SCALE as f64 / 1000.0,
            last_refill: Mutex::new(Instant::now()),
            name: name.into(),
        }
    }

    /// Acquire a token, waiting if necessary.
    pub async fn acquire(&self) {
        while !self.try_acquire() {
            let wait = self.token_interval();

            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis(),
                "Rate limited, waiting for token"
            );

            tokio::time::sleep(wait).await;
        }
    }

    /// Try to take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.refill();

        self.tokens
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(TOKEN_SCALE)
            })
            .is_ok()
    }

    /// Time for one token to refill, clamped to a sane polling range.
    fn token_interval(&self) -> Duration {
        let ms = (TOKEN_SCALE as f64 / self.refill_per_ms).ceil() as u64;
        Duration::from_millis(ms.clamp(10, 1000))
    }

    fn refill(&self) {
        // A concurrent caller already refilling is enough.
        let Ok(mut last_refill) = self.last_refill.try_lock() else {
            return;
        };

        let now = Instant::now();
        let elapsed_ms = now.duration_since(*last_refill).as_millis() as f64;
        let added = (elapsed_ms * self.refill_per_ms) as u64;
        if added == 0 {
            return;
        }

        let max_tokens = u64::from(self.capacity) * TOKEN_SCALE;
        let _ = self
            .tokens
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some((current + added).min(max_tokens))
            });
        *last_refill = now;
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Shared rate limiter that can be cloned.
pub type SharedRateLimiter = Arc<RateLimiter>;

/// Create a shared rate limiter.
pub fn shared_limiter(name: impl Into<String>, requests_per_second: u32) -> SharedRateLimiter {
    Arc::new(RateLimiter::new(name, requests_per_second))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_one_second_of_budget() {
        let limiter = RateLimiter::new("test", 10);
        assert_eq!(limiter.capacity(), 10);
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let limiter = RateLimiter::new("test", 0);
        assert_eq!(limiter.capacity(), 1);
    }

    #[test]
    fn test_bucket_empties() {
        let limiter = RateLimiter::new("test", 2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new("test", 100);
        while limiter.try_acquire() {}

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_token_interval() {
        assert_eq!(RateLimiter::new("test", 10).token_interval(), Duration::from_millis(100));
        assert_eq!(RateLimiter::new("test", 1000).token_interval(), Duration::from_millis(10));
    }
}

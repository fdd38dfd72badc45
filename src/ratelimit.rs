//! Rate limiting for the serving API.
//!
//! Token-bucket limiting with optional per-client buckets to protect the
//! inference path from overload.
//!
//! # Example
//!
//! ```rust,ignore
//! use servio::ratelimit::RateLimiter;
//! use servio::config::RateLimitSettings;
//!
//! let limiter = RateLimiter::new(settings);
//!
//! if limiter.try_acquire("client-123") {
//!     // Process request
//! } else {
//!     // Return 429 Too Many Requests
//! }
//! ```

use crate::config::RateLimitSettings;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

/// Token bucket state.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter.
pub struct RateLimiter {
    settings: RateLimitSettings,
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

/// Key used when limits are global rather than per-client.
const GLOBAL_KEY: &str = "__global__";

impl RateLimiter {
    /// Creates a limiter from settings.
    pub fn new(settings: RateLimitSettings) -> Self {
        let window_secs = settings.window.as_secs_f64().max(0.001);
        let refill_per_sec = settings.max_requests as f64 / window_secs;
        let capacity = (settings.max_requests + settings.burst) as f64;

        Self {
            settings,
            capacity,
            refill_per_sec,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take one token for a client. Returns whether the request is
    /// allowed.
    pub fn try_acquire(&self, client: &str) -> bool {
        let key = if self.settings.per_client {
            client
        } else {
            GLOBAL_KEY
        };

        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current usage for a client.
    pub fn usage(&self, client: &str) -> RateLimitUsage {
        let key = if self.settings.per_client {
            client
        } else {
            GLOBAL_KEY
        };

        let buckets = self.buckets.lock();
        let remaining = buckets
            .get(key)
            .map(|b| b.tokens.floor() as u64)
            .unwrap_or(self.capacity as u64);

        RateLimitUsage {
            remaining,
            limit: self.capacity as u64,
        }
    }

    /// Drop idle per-client buckets; full buckets carry no history.
    pub fn evict_idle(&self) {
        let mut buckets = self.buckets.lock();
        let capacity = self.capacity;
        let refill = self.refill_per_sec;
        buckets.retain(|_, bucket| {
            let elapsed = bucket.last_refill.elapsed().as_secs_f64();
            (bucket.tokens + elapsed * refill) < capacity
        });
    }
}

/// Usage snapshot for a client.
#[derive(Debug, Clone)]
pub struct RateLimitUsage {
    /// Tokens remaining.
    pub remaining: u64,
    /// Bucket capacity.
    pub limit: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(max: u64, burst: u64, per_client: bool) -> RateLimitSettings {
        RateLimitSettings {
            max_requests: max,
            window: Duration::from_secs(1),
            burst,
            per_client,
        }
    }

    #[test]
    fn test_allows_up_to_capacity() {
        let limiter = RateLimiter::new(settings(2, 1, false));
        assert!(limiter.try_acquire("a"));
        assert!(limiter.try_acquire("a"));
        assert!(limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("a"));
    }

    #[test]
    fn test_global_bucket_shared_across_clients() {
        let limiter = RateLimiter::new(settings(1, 0, false));
        assert!(limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("b"));
    }

    #[test]
    fn test_per_client_buckets() {
        let limiter = RateLimiter::new(settings(1, 0, true));
        assert!(limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("a"));
        assert!(limiter.try_acquire("b"));
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = RateLimiter::new(settings(1000, 0, false));
        for _ in 0..1000 {
            assert!(limiter.try_acquire("a"));
        }
        assert!(!limiter.try_acquire("a"));

        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.try_acquire("a"));
    }

    #[test]
    fn test_usage() {
        let limiter = RateLimiter::new(settings(10, 0, false));
        limiter.try_acquire("a");
        let usage = limiter.usage("a");
        assert_eq!(usage.limit, 10);
        assert_eq!(usage.remaining, 9);
    }
}

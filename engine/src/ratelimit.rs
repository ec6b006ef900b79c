//! Pluggable rate limiting, consumed by the tool registry and the router.
//! The concrete algorithm is out of scope; this module supplies a
//! default in-memory token bucket so tests and the demo binary run without
//! an external dependency.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Consumed by the registry (per tool-call) and the router (per message).
/// `consume` returns `true` if a token was available.
pub trait RateLimiter: Send + Sync {
    fn consume(&self, key: &str) -> bool;
}

/// Always allows. Used as the default when no limiter is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn consume(&self, _key: &str) -> bool {
        true
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A simple per-key token bucket: `capacity` tokens, refilled at
/// `refill_per_sec` tokens/second.
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    #[must_use]
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn consume(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
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
}

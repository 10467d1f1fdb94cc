//! Per-method token-bucket rate limiting.
//!
//! Buckets refill lazily: every [`RateLimiter::acquire`] recomputes the
//! available tokens from the time elapsed since the previous update, so no
//! background timer is involved. Refusal is immediate; callers never queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Tolerance for floating-point refill drift.
const EPSILON: f64 = 1e-9;

/// Token bucket with lazy refill.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    state: tokio::sync::Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

impl RateLimiter {
    /// Create a full bucket refilling at `rate` tokens per second.
    #[must_use]
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            rate,
            capacity,
            state: tokio::sync::Mutex::new(Bucket {
                tokens: capacity,
                last_update: Instant::now(),
            }),
        }
    }

    /// Refill rate in tokens per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum burst size.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Take `tokens` from the bucket if available.
    ///
    /// Returns `false` without waiting when the bucket holds fewer tokens.
    pub async fn acquire(&self, tokens: f64) -> bool {
        let mut bucket = self.state.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens + EPSILON >= tokens {
            bucket.tokens = (bucket.tokens - tokens).max(0.0);
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after refill.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.state.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_update = now;
    }
}

/// Lazily-populated map of one [`RateLimiter`] per method.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    config: RateLimitConfig,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    /// Create an empty registry using `config` for new buckets.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter for `method`, created on first use.
    #[must_use]
    pub fn limiter(&self, method: &str) -> Arc<RateLimiter> {
        let mut limiters = self
            .limiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(limiter) = limiters.get(method) {
            return Arc::clone(limiter);
        }
        let bucket = self.config.bucket_for(method);
        debug!(
            method,
            rate = bucket.rate,
            capacity = bucket.capacity,
            "creating rate limiter"
        );
        let limiter = Arc::new(RateLimiter::new(bucket.rate, bucket.capacity));
        limiters.insert(method.to_owned(), Arc::clone(&limiter));
        limiter
    }

    /// Take one token from `method`'s bucket.
    pub async fn acquire(&self, method: &str) -> bool {
        self.limiter(method).acquire(1.0).await
    }
}

//! Global token-bucket rate limiting
//!
//! Every configured budget gets one bucket shared by all clients. A request is
//! admitted only if every bucket has a token, and then takes one from each.

use entropy_core::config::RateLimit;
use parking_lot::Mutex;
use std::time::Instant;

pub struct RateLimiter {
    buckets: Mutex<Vec<TokenBucket>>,
}

struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: &RateLimit, now: Instant) -> Self {
        let capacity = limit.requests as f64;
        Self {
            capacity,
            refill_per_sec: capacity / limit.per_seconds as f64,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

impl RateLimiter {
    pub fn new(limits: &[RateLimit]) -> Self {
        let now = Instant::now();
        Self {
            buckets: Mutex::new(limits.iter().map(|l| TokenBucket::new(l, now)).collect()),
        }
    }

    /// Try to admit one request
    pub fn check(&self) -> bool {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();

        for bucket in buckets.iter_mut() {
            bucket.refill(now);
        }

        if buckets.iter().any(|b| b.tokens < 1.0) {
            return false;
        }

        for bucket in buckets.iter_mut() {
            bucket.tokens -= 1.0;
        }
        true
    }
}

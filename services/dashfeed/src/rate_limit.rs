//! Coarse per-source rate limiting
//!
//! Token buckets keyed by caller, refilling at the configured requests per
//! second. This is a hardening control on the request endpoint, not a
//! fairness mechanism.

use std::time::Instant;

use dashmap::DashMap;

use crate::error::AppError;

#[derive(Clone)]
struct Bucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl Bucket {
    fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_update: Instant::now(),
        }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = f64::min(self.capacity as f64, self.tokens + elapsed * self.refill_rate);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-key token buckets, e.g. keyed `"<ip>:ingest"`.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: u32,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(per_sec: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: per_sec,
            refill_rate: f64::from(per_sec),
        }
    }

    pub fn check(&self, key: &str) -> Result<(), AppError> {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(self.capacity, self.refill_rate));

        if bucket.allow() {
            Ok(())
        } else {
            Err(AppError::RateLimited)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_budget_allowed() {
        let limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.check("a:ingest").is_ok());
        }
    }

    #[test]
    fn test_exhausted_budget_rejected() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.check("a:ingest").is_ok());
        assert!(limiter.check("a:ingest").is_ok());
        assert!(matches!(
            limiter.check("a:ingest"),
            Err(AppError::RateLimited)
        ));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("a:ingest").is_ok());
        assert!(limiter.check("b:ingest").is_ok());
        assert!(limiter.check("a:ingest").is_err());
    }
}

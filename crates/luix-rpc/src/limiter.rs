//! Token bucket rate limiter for consumer stubs

use luix_registry::sync::lock;
use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Allows up to `permits_per_second` calls per second with a burst of the
/// same size
pub struct RateLimiter {
    permits_per_second: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket
    pub fn new(permits_per_second: f64) -> Self {
        let permits_per_second = permits_per_second.max(0.0);
        Self {
            permits_per_second,
            bucket: Mutex::new(Bucket {
                tokens: permits_per_second,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Configured rate
    pub fn permits_per_second(&self) -> f64 {
        self.permits_per_second
    }

    /// Take one permit if available
    pub fn try_acquire(&self) -> bool {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.permits_per_second).min(self.permits_per_second);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_burst_then_refill() {
        let limiter = RateLimiter::new(2.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        std::thread::sleep(Duration::from_millis(600));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_zero_rate_rejects() {
        let limiter = RateLimiter::new(0.0);
        assert!(!limiter.try_acquire());
    }
}

//! Per-connection read rate limiting.

use tokio::time::Instant;

/// A token bucket admitting up to `rate` reads per second, with a burst of
/// one second's worth of tokens.
///
/// Each session owns its own limiter, so no locking is needed.
#[derive(Debug)]
pub struct RateLimiter {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl RateLimiter {
    /// Create a limiter admitting `rate` reads per second.
    pub fn per_second(rate: u32) -> Self {
        let capacity = rate.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity,
            last_update: Instant::now(),
        }
    }

    /// Returns `true` when the quota is exhausted and the caller must back off.
    ///
    /// When it returns `false` one token has been consumed.
    pub fn limit(&mut self) -> bool {
        !self.try_acquire()
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
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

    #[tokio::test(start_paused = true)]
    async fn admits_burst_then_limits() {
        let mut limiter = RateLimiter::per_second(3);
        assert!(!limiter.limit());
        assert!(!limiter.limit());
        assert!(!limiter.limit());
        assert!(limiter.limit());
    }

    #[tokio::test(start_paused = true)]
    async fn refills_over_time() {
        let mut limiter = RateLimiter::per_second(2);
        assert!(!limiter.limit());
        assert!(!limiter.limit());
        assert!(limiter.limit());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!limiter.limit());
        assert!(limiter.limit());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_capacity() {
        let mut limiter = RateLimiter::per_second(1);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!limiter.limit());
        assert!(limiter.limit());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_still_admits_one_per_second() {
        let mut limiter = RateLimiter::per_second(0);
        assert!(!limiter.limit());
        assert!(limiter.limit());
    }
}

//! Rate limiting and retry backoff

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Scales `delay` by a factor drawn uniformly from `[0.5, 1.5)`
pub fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(0.5 + fastrand::f64())
}

/// Spaces consecutive requests of one session
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_request: None,
        }
    }

    /// Waits until a jittered delay has passed since the previous request
    ///
    /// The first request of a session goes out immediately.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_request {
            if !self.delay.is_zero() {
                sleep_until(last + jittered(self.delay)).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

/// Retry budget for one fetch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
        }
    }

    /// Delay after the failed attempt with 0-based index `attempt`: `base * 2^attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_secs(2);
        for _ in 0..200 {
            let d = jittered(delay);
            assert!(d >= Duration::from_secs(1));
            assert!(d < Duration::from_secs(3));
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_limiter_spaces_requests() {
        let mut limiter = RateLimiter::new(Duration::from_millis(40));
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(20));

        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}

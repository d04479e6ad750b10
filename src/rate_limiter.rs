//! Token bucket admission control for outbound calls to one upstream

use crate::{config::RateLimitConfig, error::FetchError};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const MIN_WAIT: Duration = Duration::from_millis(1);
const MIN_REFILL_RATE: f64 = 1e-6;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    /// Adds the tokens accrued since the last refill, capped at capacity
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = f64::min(self.capacity, self.tokens + elapsed * self.refill_rate);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one whole token is available, never below 1ms
    fn time_to_next_token(&self) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        Duration::from_secs_f64(missing / self.refill_rate).max(MIN_WAIT)
    }
}

/// Token bucket rate limiter
///
/// Bursts up to `capacity` calls pass immediately; beyond that the long-run
/// throughput never exceeds `refill_per_sec`. The limiter never rejects a
/// caller of [`RateLimiter::acquire`], it only delays them.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a full bucket
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1.0);
        let refill_rate = if refill_per_sec > 0.0 {
            refill_per_sec
        } else {
            MIN_REFILL_RATE
        };
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                capacity,
                refill_rate,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.refill_per_sec)
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits until a token is available, then consumes it
    ///
    /// The wait is a timer sleep, never a spin. Each retry sleeps for the
    /// time the bucket needs to accrue one token, so sustained contention
    /// loops instead of growing the stack.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.lock();
                if bucket.try_take() {
                    return;
                }
                bucket.time_to_next_token()
            };
            sleep(wait).await;
        }
    }

    /// Like [`RateLimiter::acquire`] but gives up after `max_wait`
    pub async fn acquire_timeout(&self, max_wait: Duration) -> Result<(), FetchError> {
        let started = Instant::now();
        tokio::time::timeout(max_wait, self.acquire())
            .await
            .map_err(|_| FetchError::RateLimitWaitAborted {
                waited: started.elapsed(),
            })
    }

    /// Consumes a token only if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.lock().try_take()
    }

    /// Tokens currently in the bucket, after lazy refill
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.lock();
        bucket.refill();
        bucket.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.lock().capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_passes_immediately() {
        let limiter = RateLimiter::new(5.0, 1.0);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_is_bounded_by_refill_rate() {
        let capacity = 3.0;
        let rate = 10.0;
        let extra = 7;
        let limiter = Arc::new(RateLimiter::new(capacity, rate));

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..(capacity as usize + extra) {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let min_elapsed = Duration::from_secs_f64(extra as f64 / rate);
        assert!(
            start.elapsed() + Duration::from_millis(1) >= min_elapsed,
            "elapsed {:?} < {:?}",
            start.elapsed(),
            min_elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_never_exceed_capacity() {
        let limiter = RateLimiter::new(2.0, 100.0);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available_tokens(), 2.0);

        limiter.acquire().await;
        let tokens = limiter.available_tokens();
        assert!((0.0..=2.0).contains(&tokens));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_aborts() {
        let limiter = RateLimiter::new(1.0, 0.1);
        limiter.acquire().await;

        let err = limiter
            .acquire_timeout(Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::RateLimitWaitAborted { .. }));

        // A token accrues after 10s
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.acquire_timeout(Duration::from_millis(1)).await.is_ok());
    }
}

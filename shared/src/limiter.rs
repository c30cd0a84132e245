//! Rate limiter without burst: permits are handed out no more often than once per period.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter wait cancelled")]
pub struct Cancelled;

pub struct RateLimiter {
    ticker: Mutex<Interval>,
}

impl RateLimiter {
    /// Must be created inside a Tokio runtime.
    pub fn new(period: Duration) -> Self {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker: Mutex::new(ticker),
        }
    }

    /// One permit per `1s / rate`; a zero rate is treated as one request per second.
    pub fn per_second(rate: u32) -> Self {
        Self::new(Duration::from_secs(1) / rate.max(1))
    }

    /// Waits for the next permit and returns the instant it was granted at.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Instant, Cancelled> {
        let mut ticker = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            ticker = self.ticker.lock() => ticker,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            _ = ticker.tick() => Ok(Instant::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn permits_are_spaced_by_the_period() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let first = limiter.acquire(&cancel).await.unwrap();
        let second = limiter.acquire(&cancel).await.unwrap();
        let third = limiter.acquire(&cancel).await.unwrap();

        assert_eq!(first - start, Duration::ZERO);
        assert_eq!(second - first, Duration::from_millis(100));
        assert_eq!(third - second, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_does_not_accumulate_a_burst() {
        let limiter = RateLimiter::per_second(10);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        time::sleep(Duration::from_secs(5)).await;
        let a = limiter.acquire(&cancel).await.unwrap();
        let b = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(b - a, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_returns_promptly() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        cancel.cancel();
        assert_eq!(limiter.acquire(&cancel).await, Err(Cancelled));
    }
}

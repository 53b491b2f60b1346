//! Sliding-window rate limiting for the remote API.
//!
//! The limiter keeps the dispatch instant of every request still inside the
//! trailing 60-second window. A caller that finds the window full sleeps
//! until enough of the oldest instants age out, so no rolling 60-second
//! interval ever contains more than `max_requests_per_minute` dispatches.
//!
//! The whole check-wait-record sequence runs under one async mutex. Callers
//! queue behind it in arrival order and the window is never over-committed
//! by two callers that both saw spare capacity.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::config::ConfigSource;
use crate::error::{SyncError, SyncResult};

/// Length of the rate-limit window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Process-wide request limiter shared by every API surface.
#[derive(Debug)]
pub struct RateLimiter {
    config: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    window: Duration,
    dispatched: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            window: RATE_WINDOW,
            dispatched: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits for window capacity, then records one dispatch.
    pub async fn acquire(&self) -> SyncResult<()> {
        self.acquire_before(None).await
    }

    /// Like [`acquire`](Self::acquire), but fails instead of waiting past
    /// `deadline`.
    pub async fn acquire_before(&self, deadline: Option<Instant>) -> SyncResult<()> {
        let mut dispatched = self.dispatched.lock().await;

        loop {
            // Read on every pass so a lowered limit applies immediately.
            let limit = self.config.current().api.max_requests_per_minute.max(1) as usize;
            let now = self.clock.now();

            while let Some(&oldest) = dispatched.front() {
                if now.saturating_duration_since(oldest) >= self.window {
                    dispatched.pop_front();
                } else {
                    break;
                }
            }

            if dispatched.len() < limit {
                dispatched.push_back(now);
                return Ok(());
            }

            // The instant that must leave the window before one more fits.
            let blocking = dispatched[dispatched.len() - limit];
            let ready_at = blocking + self.window;

            if deadline.is_some_and(|d| ready_at > d) {
                debug!(limit, "Rate limit wait would overrun deadline");
                return Err(SyncError::DeadlineExceeded { attempts: 0 });
            }

            let wait = ready_at.saturating_duration_since(now);
            debug!(limit, wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            self.clock.sleep(wait).await;
        }
    }

    /// Number of dispatches still inside the window.
    pub async fn in_window(&self) -> usize {
        let dispatched = self.dispatched.lock().await;
        let now = self.clock.now();
        dispatched
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{BridgeConfig, StaticConfig};

    fn limiter(max_rpm: u32, clock: &ManualClock) -> RateLimiter {
        let mut config = BridgeConfig::default();
        config.api.max_requests_per_minute = max_rpm;
        RateLimiter::new(Arc::new(StaticConfig::new(config)), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_under_limit_does_not_wait() {
        let clock = ManualClock::new();
        let limiter = limiter(5, &clock);

        for _ in 0..5 {
            limiter.acquire().await.unwrap();
        }

        assert!(clock.sleeps().is_empty());
        assert_eq!(limiter.in_window().await, 5);
    }

    #[tokio::test]
    async fn test_full_window_waits_for_oldest() {
        let clock = ManualClock::new();
        let limiter = limiter(2, &clock);

        limiter.acquire().await.unwrap();
        clock.advance(Duration::from_secs(10));
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();

        // Third request waits until the first is 60s old.
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(50)]);
        assert_eq!(clock.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_never_more_than_limit_in_rolling_window() {
        let clock = ManualClock::new();
        let limiter = limiter(3, &clock);
        let mut stamps = Vec::new();

        for i in 0..12 {
            limiter.acquire().await.unwrap();
            stamps.push(clock.elapsed());
            clock.advance(Duration::from_secs(i % 4 * 7));
        }

        for (i, start) in stamps.iter().enumerate() {
            let in_window = stamps[i..]
                .iter()
                .filter(|t| **t - *start < RATE_WINDOW)
                .count();
            assert!(in_window <= 3, "window starting at {start:?} had {in_window}");
        }
    }

    #[tokio::test]
    async fn test_deadline_fails_without_sleeping() {
        let clock = ManualClock::new();
        let limiter = limiter(1, &clock);

        limiter.acquire().await.unwrap();
        let deadline = clock.now() + Duration::from_secs(30);

        let err = limiter.acquire_before(Some(deadline)).await.unwrap_err();
        assert!(matches!(err, SyncError::DeadlineExceeded { .. }));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_zero_limit_treated_as_one() {
        let clock = ManualClock::new();
        let limiter = limiter(0, &clock);

        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();

        assert_eq!(clock.sleeps(), vec![RATE_WINDOW]);
    }
}

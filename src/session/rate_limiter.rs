//! Sliding-window rate limiting for session requests.
//!
//! This module provides the [`RateLimiter`] struct which admits at most
//! `calls` request attempts within any window of length `period`. Callers
//! that find the window full wait until the oldest admission ages out; they
//! are never rejected.
//!
//! The limiter belongs to one session. Clones of that session share it, so
//! concurrent tasks racing through the same session are bounded together,
//! while two independently built sessions never slow each other down.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use fetcher_core::session::{RateLimit, RateLimiter};
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(RateLimit::new(2, Duration::from_secs(1)));
//!
//! // The first two attempts proceed immediately
//! limiter.acquire().await;
//! limiter.acquire().await;
//!
//! // The third waits until the first admission is a second old
//! limiter.acquire().await;
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::CUMULATIVE_WAIT_WARNING_THRESHOLD;

/// Shortest window a [`RateLimit`] accepts.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Admission budget: `calls` attempts per sliding `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    calls: u32,
    period: Duration,
}

impl RateLimit {
    /// Creates a rate limit. `calls` below 1 is raised to 1 and `period`
    /// below [`MIN_PERIOD`] is raised to it.
    #[must_use]
    pub fn new(calls: u32, period: Duration) -> Self {
        Self {
            calls: calls.max(1),
            period: period.max(MIN_PERIOD),
        }
    }

    /// Maximum admissions per window.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls
    }

    /// Window length.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Sliding-window rate limiter shared by all clones of a session.
///
/// `RateLimiter` is `Send + Sync`; the admission log sits behind a
/// `tokio::sync::Mutex` that is released before any waiting caller sleeps.
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,

    /// Admission times inside the current window, oldest first.
    admitted: Mutex<VecDeque<Instant>>,

    /// Total time callers have spent waiting (in milliseconds).
    cumulative_wait_ms: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter enforcing `limit`.
    #[must_use]
    #[instrument(skip_all, fields(calls = limit.calls(), period_ms = limit.period().as_millis()))]
    pub fn new(limit: RateLimit) -> Self {
        debug!("creating rate limiter");
        Self {
            limit,
            admitted: Mutex::new(VecDeque::with_capacity(limit.calls() as usize)),
            cumulative_wait_ms: AtomicU64::new(0),
        }
    }

    /// Returns the configured limit.
    #[must_use]
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Waits until the window admits one more attempt, then records it.
    ///
    /// Returns how long the caller waited.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        loop {
            let wait = {
                let mut admitted = self.admitted.lock().await;
                let now = Instant::now();
                while admitted
                    .front()
                    .is_some_and(|oldest| now.duration_since(*oldest) >= self.limit.period)
                {
                    admitted.pop_front();
                }

                if admitted.len() < self.limit.calls as usize {
                    admitted.push_back(now);
                    None
                } else {
                    // Full window: the front entry is the next to expire
                    admitted
                        .front()
                        .map(|oldest| (*oldest + self.limit.period).saturating_duration_since(now))
                }
            };

            match wait {
                None => break,
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis(), "rate limit window full, waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let waited = started.elapsed();
        if !waited.is_zero() {
            let cumulative = self.add_cumulative_wait(waited);
            if cumulative >= CUMULATIVE_WAIT_WARNING_THRESHOLD {
                warn!(
                    cumulative_wait_secs = cumulative.as_secs(),
                    "excessive rate limiting - consider reducing request volume"
                );
            }
        }
        waited
    }

    /// Total time callers have waited on this limiter.
    #[must_use]
    pub fn cumulative_wait(&self) -> Duration {
        Duration::from_millis(self.cumulative_wait_ms.load(Ordering::SeqCst))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_wait(&self, wait: Duration) -> Duration {
        let wait_ms = wait.as_millis() as u64;
        let total = self.cumulative_wait_ms.fetch_add(wait_ms, Ordering::SeqCst) + wait_ms;
        Duration::from_millis(total)
    }
}

//! Helpers shared by integration tests.

#![allow(dead_code)]

pub mod socket_guard;

use std::time::Duration;

use fetcher_core::{RateLimit, RetryPolicy, Session};

/// A session with fast retries so tests do not wait on production backoff.
pub fn fast_session(max_attempts: u32) -> Session {
    Session::build(
        "fetcher-integration-tests",
        RetryPolicy::new(max_attempts, Duration::from_millis(10), 2.0),
        None,
        &[],
    )
    .expect("session builds")
}

/// Like [`fast_session`] with a sliding-window rate limit.
pub fn rate_limited_session(calls: u32, period: Duration) -> Session {
    Session::build(
        "fetcher-integration-tests",
        RetryPolicy::with_max_attempts(1),
        Some(RateLimit::new(calls, period)),
        &[],
    )
    .expect("session builds")
}

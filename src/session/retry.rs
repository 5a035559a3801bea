//! Retry logic with exponential backoff for transient request failures.
//!
//! When an attempt fails, the [`RequestError`] is classified into a
//! [`FailureType`] by the session's [`RetryPolicy`]:
//! - [`FailureType::Retryable`] - status in the policy's retry set, or a
//!   connection-level failure when the policy allows it
//! - [`FailureType::NonRetryable`] - everything else, returned immediately
//!
//! The policy then decides whether another attempt is allowed and how long
//! to wait first.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use fetcher_core::session::{FailureType, RequestError, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(10), 2.0);
//! let error = RequestError::http_status("https://example.com/data.csv", 503);
//! let failure_type = policy.classify(&error);
//! assert_eq!(failure_type, FailureType::Retryable);
//!
//! match policy.should_retry(failure_type, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_millis(10));
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::RequestError;
use super::constants::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
    DEFAULT_RETRY_STATUS_CODES, MAX_RETRY_AFTER,
};

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Reissuing the request may succeed.
    ///
    /// Examples: 503, 429, connection refused, timeout.
    Retryable,

    /// Reissuing the request will not help.
    ///
    /// Examples: 404, 400, invalid certificate, missing local file.
    NonRetryable,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `backoff_base`: 400 ms
/// - `backoff_factor`: 2.0
/// - `max_delay`: 120 seconds
/// - `retry_status_codes`: 429, 500, 502, 503, 504
/// - `retry_on_connection_error`: true
/// - `respect_retry_after`: true
///
/// # Delay Calculation
///
/// ```text
/// delay(attempt) = min(backoff_base * backoff_factor^(attempt - 1), max_delay)
/// ```
///
/// There is no jitter, so with `backoff_factor >= 1` successive delays never
/// decrease.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    retry_status_codes: BTreeSet<u16>,
    retry_on_connection_error: bool,
    respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.into_iter().collect(),
            retry_on_connection_error: true,
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom attempt count and backoff, using the
    /// default status set and delay cap.
    ///
    /// `max_attempts` below 1 is raised to 1 and `backoff_factor` below 1.0
    /// (or NaN) is raised to 1.0.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_factor: clamp_factor(backoff_factor),
            ..Self::default()
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Replaces the cap on a single delay.
    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Replaces the set of retryable HTTP status codes.
    #[must_use]
    pub fn retry_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_status_codes = codes.into_iter().collect();
        self
    }

    /// Sets whether connection-level failures and timeouts are retried.
    #[must_use]
    pub fn retry_on_connection_error(mut self, enabled: bool) -> Self {
        self.retry_on_connection_error = enabled;
        self
    }

    /// Sets whether a server `Retry-After` header may lengthen the delay.
    #[must_use]
    pub fn respect_retry_after(mut self, enabled: bool) -> Self {
        self.respect_retry_after = enabled;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before the first retry.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Returns the per-attempt multiplier.
    #[must_use]
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Returns the retryable status codes.
    #[must_use]
    pub fn status_codes(&self) -> &BTreeSet<u16> {
        &self.retry_status_codes
    }

    /// Classifies an attempt failure under this policy.
    #[must_use]
    pub fn classify(&self, error: &RequestError) -> FailureType {
        match error {
            RequestError::HttpStatus { status, .. } => {
                if self.retry_status_codes.contains(status) {
                    FailureType::Retryable
                } else {
                    FailureType::NonRetryable
                }
            }
            RequestError::Timeout { .. } => self.connection_failure(),
            RequestError::Network { source, .. } => {
                // Certificate problems will not fix themselves
                if is_tls_error(source) || source.is_builder() || source.is_redirect() {
                    FailureType::NonRetryable
                } else {
                    self.connection_failure()
                }
            }
            RequestError::NotFound { .. } | RequestError::Io { .. } => FailureType::NonRetryable,
        }
    }

    fn connection_failure(&self) -> FailureType {
        if self.retry_on_connection_error {
            FailureType::Retryable
        } else {
            FailureType::NonRetryable
        }
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::NonRetryable {
            return RetryDecision::DoNotRetry {
                reason: "non-retryable failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.backoff_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Like [`should_retry`](Self::should_retry), but lets a server
    /// `Retry-After` on the failed response lengthen the wait.
    #[must_use]
    pub fn decide(&self, error: &RequestError, attempt: u32) -> RetryDecision {
        let decision = self.should_retry(self.classify(error), attempt);
        match decision {
            RetryDecision::Retry { delay, attempt } if self.respect_retry_after => {
                let server_delay = match error {
                    RequestError::HttpStatus {
                        retry_after: Some(value),
                        ..
                    } => parse_retry_after(value),
                    _ => None,
                };
                RetryDecision::Retry {
                    delay: server_delay.map_or(delay, |server| server.max(delay)),
                    attempt,
                }
            }
            other => other,
        }
    }

    /// Calculates the backoff before the attempt following `attempt`.
    ///
    /// Formula: `min(backoff_base * backoff_factor^(attempt - 1), max_delay)`
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);

        // Nanosecond arithmetic keeps whole-millisecond bases exact
        #[allow(clippy::cast_precision_loss)]
        let base_nanos = self.backoff_base.as_nanos() as f64;
        #[allow(clippy::cast_precision_loss)]
        let max_nanos = self.max_delay.as_nanos() as f64;
        let delay_nanos = base_nanos * self.backoff_factor.powi(exponent);

        if !delay_nanos.is_finite() || delay_nanos >= max_nanos {
            return self.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay_nanos = delay_nanos as u64;
        Duration::from_nanos(delay_nanos)
    }
}

fn clamp_factor(factor: f64) -> f64 {
    if factor.is_nan() || factor < 1.0 {
        1.0
    } else {
        factor
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fetcher_core::session::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        if let Ok(duration) = datetime.duration_since(now) {
            if duration > MAX_RETRY_AFTER {
                warn!(
                    delay_secs = duration.as_secs(),
                    max_secs = MAX_RETRY_AFTER.as_secs(),
                    "Retry-After date exceeds maximum, capping at 1 hour"
                );
                return Some(MAX_RETRY_AFTER);
            }
            Some(duration)
        } else {
            debug!(
                header_value,
                "Retry-After date is in the past, returning zero"
            );
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

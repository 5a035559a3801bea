//! Retrying, rate-limited HTTP sessions.
//!
//! A [`Session`] owns a pooled `reqwest` client, a [`RetryPolicy`] and an
//! optional [`RateLimiter`]. Every request sent through it is wrapped by the
//! retry loop, and every attempt (retries included) takes a rate-limit slot
//! before it is sent.
//!
//! # Features
//!
//! - Bounded exponential backoff, no jitter (delays never decrease)
//! - Configurable retryable status set, connection errors optional
//! - `Retry-After` support for 429/503 responses
//! - Sliding-window rate limiting shared by all clones of a session
//! - Cooperative cancellation through `CancellationToken`
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use fetcher_core::session::{RateLimit, RetryPolicy, Session};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::builder("my-app/1.0 (ops@example.org)")
//!     .retry_policy(RetryPolicy::new(3, Duration::from_millis(200), 2.0))
//!     .rate_limit(RateLimit::new(10, Duration::from_secs(1)))
//!     .build()?;
//! let response = session.get("https://example.com/data.csv").await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

mod constants;
pub mod default;
mod error;
mod rate_limiter;
mod retry;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY, DEFAULT_RETRY_STATUS_CODES, READ_TIMEOUT_SECS,
};
pub use error::{RequestError, SessionBuildError};
pub use rate_limiter::{RateLimit, RateLimiter};
pub use retry::{FailureType, RetryDecision, RetryPolicy, parse_retry_after};

use crate::FetchError;
use constants::POOL_MAX_IDLE_PER_HOST;

/// HTTP session with retry and rate limiting applied to every request.
///
/// Cloning is cheap: clones share the connection pool, the rate limiter and
/// the attempt counter. Dropping the last clone releases pooled connections.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    client: Client,
    policy: RetryPolicy,
    limiter: Option<RateLimiter>,
    user_agent: String,
    extra_params: Vec<(String, String)>,
    attempts_sent: AtomicU64,
}

/// Builder for [`Session`].
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    user_agent: String,
    policy: RetryPolicy,
    rate_limit: Option<RateLimit>,
    headers: Vec<(String, String)>,
    basic_auth: Option<String>,
    extra_params: Vec<(String, String)>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl SessionBuilder {
    /// Starts a builder for a session identifying itself as `user_agent`.
    #[must_use]
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            policy: RetryPolicy::default(),
            rate_limit: None,
            headers: Vec::new(),
            basic_auth: None,
            extra_params: Vec::new(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }

    /// Sets the retry policy applied to every request.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enables sliding-window rate limiting.
    #[must_use]
    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Same as [`rate_limit`](Self::rate_limit) but accepts an `Option`.
    #[must_use]
    pub fn maybe_rate_limit(mut self, limit: Option<RateLimit>) -> Self {
        self.rate_limit = limit;
        self
    }

    /// Adds a default header sent with every request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sends `Authorization: Basic <credential>` with every request.
    ///
    /// `credential` is the already base64-encoded `user:password` pair.
    #[must_use]
    pub fn basic_auth(mut self, credential: impl Into<String>) -> Self {
        self.basic_auth = Some(credential.into());
        self
    }

    /// Appends a query parameter to every request URL.
    #[must_use]
    pub fn extra_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }

    /// Overrides the connect and whole-request timeouts.
    #[must_use]
    pub fn timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Builds the session.
    ///
    /// # Errors
    ///
    /// - [`SessionBuildError::EmptyUserAgent`] for a blank user agent
    /// - [`SessionBuildError::InvalidHeader`] for unencodable headers
    /// - [`SessionBuildError::Client`] if reqwest cannot build the client
    #[instrument(skip(self), fields(user_agent = %self.user_agent))]
    pub fn build(self) -> Result<Session, SessionBuildError> {
        let user_agent = self.user_agent.trim().to_string();
        if user_agent.is_empty() {
            return Err(SessionBuildError::EmptyUserAgent);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid_header(name, e))?;
            let header_value = HeaderValue::from_str(value).map_err(|e| invalid_header(name, e))?;
            headers.insert(header_name, header_value);
        }
        if let Some(credential) = &self.basic_auth {
            let mut value = HeaderValue::from_str(&format!("Basic {credential}"))
                .map_err(|e| invalid_header(AUTHORIZATION.as_str(), e))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .gzip(true)
            .user_agent(user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(SessionBuildError::Client)?;

        debug!(
            max_attempts = self.policy.max_attempts(),
            rate_limited = self.rate_limit.is_some(),
            "session built"
        );

        Ok(Session {
            inner: Arc::new(SessionInner {
                client,
                policy: self.policy,
                limiter: self.rate_limit.map(RateLimiter::new),
                user_agent,
                extra_params: self.extra_params,
                attempts_sent: AtomicU64::new(0),
            }),
        })
    }
}

fn invalid_header(name: &str, error: impl std::fmt::Display) -> SessionBuildError {
    SessionBuildError::InvalidHeader {
        name: name.to_string(),
        reason: error.to_string(),
    }
}

impl Session {
    /// Starts a [`SessionBuilder`].
    #[must_use]
    pub fn builder(user_agent: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(user_agent)
    }

    /// Builds a session in one call.
    ///
    /// # Errors
    ///
    /// Same as [`SessionBuilder::build`].
    pub fn build(
        user_agent: &str,
        retry_policy: RetryPolicy,
        rate_limit: Option<RateLimit>,
        extra_headers: &[(&str, &str)],
    ) -> Result<Self, SessionBuildError> {
        extra_headers
            .iter()
            .fold(
                SessionBuilder::new(user_agent)
                    .retry_policy(retry_policy)
                    .maybe_rate_limit(rate_limit),
                |builder, (name, value)| builder.header(*name, *value),
            )
            .build()
    }

    /// The user agent sent with every request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.inner.user_agent
    }

    /// The retry policy applied to every request.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// The configured rate limit, if any.
    #[must_use]
    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.inner.limiter.as_ref().map(RateLimiter::limit)
    }

    /// Number of attempts sent over the network by this session and its clones.
    #[must_use]
    pub fn attempts_sent(&self) -> u64 {
        self.inner.attempts_sent.load(Ordering::SeqCst)
    }

    /// Sends a GET request with retries.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] if `url` does not parse
    /// - [`FetchError::NonRetryable`] for failures outside the retry policy
    /// - [`FetchError::RetryExhausted`] when every attempt failed retryably
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get(&self, url: &str) -> Result<Response, FetchError> {
        self.execute(url, None).await.map(|(response, _)| response)
    }

    /// Like [`get`](Self::get), but aborts when `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`FetchError::Cancelled`] when the token
    /// fires while waiting for a slot, sending, or backing off.
    #[instrument(skip(self, cancel), fields(url = %url))]
    pub async fn get_cancellable(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Response, FetchError> {
        self.execute(url, Some(cancel))
            .await
            .map(|(response, _)| response)
    }

    /// Releases this handle; the pool closes once every clone is gone.
    pub fn close(self) {
        debug!(
            attempts_sent = self.attempts_sent(),
            remaining_handles = Arc::strong_count(&self.inner) - 1,
            "closing session handle"
        );
    }

    /// The retry loop; on success also returns how many attempts it took.
    pub(crate) async fn execute(
        &self,
        url: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<(Response, u32), FetchError> {
        let request_url = self.request_url(url)?;
        let policy = &self.inner.policy;
        let mut attempt: u32 = 0;

        loop {
            if let Some(limiter) = &self.inner.limiter
                && until_cancelled(cancel, limiter.acquire()).await.is_none()
            {
                return Err(FetchError::cancelled(url, attempt));
            }

            attempt += 1;
            self.inner.attempts_sent.fetch_add(1, Ordering::SeqCst);
            debug!(attempt, "sending request");

            let Some(outcome) = until_cancelled(cancel, self.send_once(&request_url)).await else {
                return Err(FetchError::cancelled(url, attempt));
            };

            let error = match outcome {
                Ok(response) => {
                    if attempt > 1 {
                        info!(attempt, "request succeeded after retry");
                    }
                    return Ok((response, attempt));
                }
                Err(error) => error,
            };

            match policy.decide(&error, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        attempt,
                        next_attempt = next,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retryable failure, backing off"
                    );
                    if until_cancelled(cancel, tokio::time::sleep(delay))
                        .await
                        .is_none()
                    {
                        return Err(FetchError::cancelled(url, attempt));
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, %reason, "giving up");
                    return Err(match policy.classify(&error) {
                        FailureType::Retryable => FetchError::retry_exhausted(url, attempt, error),
                        FailureType::NonRetryable => {
                            FetchError::non_retryable(url, attempt, error)
                        }
                    });
                }
            }
        }
    }

    /// Parses `url` and appends the session's extra query parameters.
    fn request_url(&self, url: &str) -> Result<Url, FetchError> {
        let mut parsed = Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        if !self.inner.extra_params.is_empty() {
            let mut pairs = parsed.query_pairs_mut();
            for (key, value) in &self.inner.extra_params {
                pairs.append_pair(key, value);
            }
        }
        Ok(parsed)
    }

    async fn send_once(&self, url: &Url) -> Result<Response, RequestError> {
        let response = self
            .inner
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RequestError::from_transport(url.as_str(), e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        Err(RequestError::http_status_with_retry_after(
            url.as_str(),
            status.as_u16(),
            retry_after,
        ))
    }
}

/// Runs `future` unless `cancel` fires first; `None` means cancelled.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: Option<&CancellationToken>,
    future: F,
) -> Option<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => None,
            output = future => Some(output),
        },
        None => Some(future.await),
    }
}

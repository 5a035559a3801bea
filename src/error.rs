//! The error taxonomy shared by the session, download and retrieve layers.
//!
//! Transport failures that may succeed on retry are handled inside the
//! session and only surface as [`FetchError::RetryExhausted`]. Everything
//! else propagates immediately with the URL (or path) and attempt count
//! needed to diagnose it.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::RequestError;

/// Errors returned by [`Session`](crate::Session),
/// [`Downloader`](crate::Downloader) and [`Retriever`](crate::Retriever).
#[derive(Debug, Error)]
pub enum FetchError {
    /// Terminal failure not eligible for retry (e.g. HTTP 404).
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    NonRetryable {
        /// The requested URL.
        url: String,
        /// Attempts made, including the failing one.
        attempts: u32,
        /// The failure of the final attempt.
        #[source]
        source: RequestError,
    },

    /// All retry attempts were consumed without success.
    #[error("retries exhausted for {url} after {attempts} attempt(s): {source}")]
    RetryExhausted {
        /// The requested URL.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// The failure of the last attempt.
        #[source]
        source: RequestError,
    },

    /// The transfer succeeded but the content did not parse as the requested format.
    #[error("failed to parse {url} as {format}: {message}")]
    Parse {
        /// The requested URL.
        url: String,
        /// Name of the requested format (json, yaml, csv, text).
        format: &'static str,
        /// Parser diagnostic.
        message: String,
    },

    /// A cache-only retrieval could not be satisfied without a network call.
    #[error("{key} is not cached in {dir}")]
    NotCached {
        /// The cache key that was looked up.
        key: String,
        /// The directory that was searched.
        dir: PathBuf,
    },

    /// An external cancellation aborted the in-flight request.
    #[error("request to {url} cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// The requested URL.
        url: String,
        /// Attempts started before cancellation.
        attempts: u32,
    },

    /// The destination exists and overwriting was not requested.
    #[error("refusing to overwrite existing file {path}")]
    FileExists {
        /// The existing destination.
        path: PathBuf,
    },

    /// Local filesystem failure while saving or reading a payload.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The URL scheme is neither http(s) nor file.
    #[error("unsupported URL scheme {scheme} in {url}")]
    UnsupportedScheme {
        /// The requested URL.
        url: String,
        /// The rejected scheme.
        scheme: String,
    },
}

impl FetchError {
    /// Creates a non-retryable error.
    pub fn non_retryable(url: impl Into<String>, attempts: u32, source: RequestError) -> Self {
        Self::NonRetryable {
            url: url.into(),
            attempts,
            source,
        }
    }

    /// Creates a retry-exhausted error.
    pub fn retry_exhausted(url: impl Into<String>, attempts: u32, source: RequestError) -> Self {
        Self::RetryExhausted {
            url: url.into(),
            attempts,
            source,
        }
    }

    /// Creates a parse error.
    pub fn parse(url: impl Into<String>, format: &'static str, message: impl ToString) -> Self {
        Self::Parse {
            url: url.into(),
            format,
            message: message.to_string(),
        }
    }

    /// Creates a not-cached error.
    pub fn not_cached(key: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self::NotCached {
            key: key.into(),
            dir: dir.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>, attempts: u32) -> Self {
        Self::Cancelled {
            url: url.into(),
            attempts,
        }
    }

    /// Creates a file-exists error.
    pub fn file_exists(path: impl Into<PathBuf>) -> Self {
        Self::FileExists { path: path.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns the number of attempts recorded on transport errors.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::NonRetryable { attempts, .. }
            | Self::RetryExhausted { attempts, .. }
            | Self::Cancelled { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Returns the HTTP status of the final attempt, when there was one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NonRetryable { source, .. } | Self::RetryExhausted { source, .. } => {
                source.status()
            }
            _ => None,
        }
    }

    /// True for failures that happened before or during transport,
    /// as opposed to parse, cache and local filesystem failures.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NonRetryable { .. } | Self::RetryExhausted { .. } | Self::Cancelled { .. }
        )
    }
}

// Like the request errors, there are no `From<std::io::Error>` or
// `From<reqwest::Error>` impls: every variant needs a url or path that the
// source error does not carry.

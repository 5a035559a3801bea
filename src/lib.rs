//! Fetcher Core Library
//!
//! A resilient retrieval layer: retrying, rate-limited HTTP sessions, a
//! downloader that streams to disk and decodes JSON, YAML and tabular data,
//! and a retriever that adds an on-disk cache and replayable fixtures.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`session`] - Retry with exponential backoff and sliding-window rate limiting
//! - [`download`] - Raw, streamed and typed downloads over `http(s)://` and `file://`
//! - [`retrieve`] - Cache and fixture strategy (normal, save, use-saved)
//! - [`user_agent`] - User agent composition and resolution
//! - [`config`] - YAML configuration with environment overrides
//! - [`registry`] - Named sessions built from configuration
//! - [`errors_on_exit`] - Deferred error reporting for batch runs

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
mod error;
pub mod errors_on_exit;
pub mod registry;
pub mod retrieve;
pub mod session;
pub mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, FetchConfig};
pub use download::{
    Body, DownloadOptions, DownloadResult, Downloader, FetchFormat, Origin, Row, TabularOptions,
    TabularRows,
};
pub use error::FetchError;
pub use errors_on_exit::ErrorsOnExit;
pub use registry::SessionRegistry;
pub use retrieve::{CacheEntry, RetrievalMode, RetrieveOptions, Retriever};
pub use session::{RateLimit, RequestError, RetryPolicy, Session, SessionBuilder};
pub use user_agent::{UserAgent, UserAgentError, UserAgentOptions};

// Note: there are no module-local Result aliases.
// Use `Result<T, FetchError>` explicitly in function signatures.

//! YAML configuration with environment overrides.
//!
//! Precedence, lowest first: built-in defaults, the YAML file, the
//! `FETCHER_*` environment variables, then whatever the caller (usually the
//! CLI) sets on the loaded [`FetchConfig`].
//!
//! ```yaml
//! user_agent: my-pipeline
//! retry:
//!   max_attempts: 3
//!   backoff_base_ms: 250
//! rate_limit:
//!   calls: 10
//!   period_ms: 1000
//! cache_dir: ./cache
//! mode: save
//! sessions:
//!   partner:
//!     basic_auth: dXNlcjpwYXNz
//!     extra_params:
//!       key: abc
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::retrieve::RetrievalMode;
use crate::session::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
    DEFAULT_RETRY_STATUS_CODES, RateLimit, RetryPolicy, SessionBuildError,
};
use crate::user_agent::{UserAgentError, UserAgentOptions};

/// Overrides [`FetchConfig::cache_dir`].
pub const CACHE_DIR_ENV: &str = "FETCHER_CACHE_DIR";
/// Overrides [`FetchConfig::fallback_dir`].
pub const FALLBACK_DIR_ENV: &str = "FETCHER_FALLBACK_DIR";
/// Overrides [`FetchConfig::mode`].
pub const MODE_ENV: &str = "FETCHER_MODE";

/// Upper bound for `retry.max_attempts`.
pub const MAX_ATTEMPTS_LIMIT: u32 = 20;

/// Errors loading configuration or building what it describes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        field: String,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid value '{value}' in environment variable {name}: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown session '{0}'")]
    UnknownSession(String),

    #[error(transparent)]
    UserAgent(#[from] UserAgentError),

    #[error(transparent)]
    Session(#[from] SessionBuildError),
}

fn invalid(field: impl Into<String>, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        value: value.to_string(),
        expected,
    }
}

/// Retry settings in plain units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub status_codes: Vec<u16>,
    pub retry_on_connection_error: bool,
    pub respect_retry_after: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: duration_ms(DEFAULT_BACKOFF_BASE),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay_ms: duration_ms(DEFAULT_MAX_DELAY),
            status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            retry_on_connection_error: true,
            respect_retry_after: true,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl RetrySettings {
    /// The equivalent [`RetryPolicy`].
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_base_ms),
            self.backoff_factor,
        )
        .max_delay(Duration::from_millis(self.max_delay_ms))
        .retry_status_codes(self.status_codes.iter().copied())
        .retry_on_connection_error(self.retry_on_connection_error)
        .respect_retry_after(self.respect_retry_after)
    }
}

/// Sliding-window rate limit in plain units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    pub calls: u32,
    pub period_ms: u64,
}

impl RateLimitSettings {
    #[must_use]
    pub fn to_rate_limit(self) -> RateLimit {
        RateLimit::new(self.calls, Duration::from_millis(self.period_ms))
    }
}

/// Settings for one named session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamedSessionSettings {
    /// Replaces the top-level user agent for this session.
    pub user_agent: Option<String>,
    /// Pre-encoded `user:password` credential sent as `Authorization: Basic`.
    pub basic_auth: Option<String>,
    /// Query parameters appended to every request.
    pub extra_params: BTreeMap<String, String>,
    /// Extra default headers.
    pub headers: BTreeMap<String, String>,
}

/// Everything needed to build sessions and a retriever.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Explicit user agent.
    pub user_agent: Option<String>,
    /// Preprefix for the composed user agent.
    pub preprefix: Option<String>,
    /// YAML file to read the user agent from instead.
    pub user_agent_config: Option<PathBuf>,
    /// Mapping inside `user_agent_config` to read.
    pub user_agent_lookup: Option<String>,
    pub retry: RetrySettings,
    pub rate_limit: Option<RateLimitSettings>,
    pub cache_dir: Option<PathBuf>,
    pub fallback_dir: Option<PathBuf>,
    pub mode: Option<RetrievalMode>,
    pub sessions: BTreeMap<String, NamedSessionSettings>,
}

impl FetchConfig {
    /// Parses configuration from YAML text. An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed YAML or unknown keys.
    pub fn from_yaml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Reads and parses the YAML file at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] if the file cannot be read, [`ConfigError::Parse`]
    /// if it is not a valid configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&raw, path)?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Loads `path` if given (defaults otherwise), applies environment
    /// overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] from reading, parsing, overriding or validating.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `FETCHER_CACHE_DIR`, `FETCHER_FALLBACK_DIR` and `FETCHER_MODE`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for an unknown mode.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(dir) = non_empty_env(CACHE_DIR_ENV) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = non_empty_env(FALLBACK_DIR_ENV) {
            self.fallback_dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = non_empty_env(MODE_ENV) {
            self.mode = Some(mode.parse().map_err(|e: crate::retrieve::ParseModeError| {
                ConfigError::InvalidEnv {
                    name: MODE_ENV,
                    value: mode.clone(),
                    reason: e.to_string(),
                }
            })?);
        }
        Ok(())
    }

    /// Checks values against the ranges the session layer accepts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&retry.max_attempts) {
            return Err(invalid(
                "retry.max_attempts",
                retry.max_attempts,
                "a value in 1..=20",
            ));
        }
        if retry.backoff_factor < 1.0 || !retry.backoff_factor.is_finite() {
            return Err(invalid(
                "retry.backoff_factor",
                retry.backoff_factor,
                "a finite value >= 1",
            ));
        }
        if let Some(code) = retry
            .status_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(invalid("retry.status_codes", code, "HTTP status codes in 100..=599"));
        }
        if let Some(limit) = self.rate_limit {
            if limit.calls == 0 {
                return Err(invalid("rate_limit.calls", limit.calls, "a value >= 1"));
            }
            if limit.period_ms == 0 {
                return Err(invalid("rate_limit.period_ms", limit.period_ms, "a value >= 1"));
            }
        }
        for (name, session) in &self.sessions {
            if session
                .user_agent
                .as_deref()
                .is_some_and(|ua| ua.trim().is_empty())
            {
                return Err(invalid(
                    format!("sessions.{name}.user_agent"),
                    "\"\"",
                    "a non-empty user agent",
                ));
            }
        }
        Ok(())
    }

    /// User agent options for the default session.
    #[must_use]
    pub fn user_agent_options(&self) -> UserAgentOptions {
        let mut options = UserAgentOptions {
            user_agent: self.user_agent.clone(),
            config_yaml: self.user_agent_config.clone(),
            lookup: self.user_agent_lookup.clone(),
            preprefix: self.preprefix.clone(),
            prefix: None,
        };
        if options.user_agent.is_some() {
            options.config_yaml = None;
            options.lookup = None;
        }
        options
    }

    /// The retry policy shared by every session built from this config.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }

    /// The configured rate limit, if any.
    #[must_use]
    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit.map(RateLimitSettings::to_rate_limit)
    }

    /// The retrieval mode, defaulting to [`RetrievalMode::Normal`].
    #[must_use]
    pub fn mode(&self) -> RetrievalMode {
        self.mode.unwrap_or_default()
    }

    /// The configured cache directory, or the platform default.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// The configured fallback directory, or the cache directory.
    #[must_use]
    pub fn fallback_dir(&self) -> PathBuf {
        self.fallback_dir.clone().unwrap_or_else(|| self.cache_dir())
    }
}

/// Default cache directory.
///
/// Priority:
/// 1. `$XDG_CACHE_HOME/fetcher`
/// 2. `$HOME/.cache/fetcher`
/// 3. `./.fetcher-cache`
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    if let Some(xdg_cache_home) = env_var_non_empty_os("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache_home).join("fetcher");
    }
    match env_var_non_empty_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("fetcher"),
        None => PathBuf::from(".fetcher-cache"),
    }
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = std::env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

//! User-Agent composition for sessions.
//!
//! Many open-data APIs require callers to identify themselves, so every
//! session needs a non-empty user agent. The final header has the shape
//!
//! ```text
//! [<preprefix>:]<prefix>-<user_agent>
//! ```
//!
//! where `prefix` defaults to `fetcher/<crate version>`.
//!
//! The `user_agent` part is resolved in this order:
//! 1. an explicit value in [`UserAgentOptions`]
//! 2. a YAML config file (top level, or the mapping under a lookup key)
//! 3. the `USER_AGENT` environment variable
//! 4. the process-wide value installed with [`UserAgent::set_global`]
//!
//! The preprefix comes from the options, then the config file, then the
//! `PREPREFIX` environment variable.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, instrument};

/// Environment variable consulted for the user agent.
pub const USER_AGENT_ENV: &str = "USER_AGENT";

/// Environment variable consulted for the preprefix.
pub const PREPREFIX_ENV: &str = "PREPREFIX";

static GLOBAL_USER_AGENT: RwLock<Option<String>> = RwLock::new(None);

/// Default prefix identifying this library and its version.
#[must_use]
pub fn default_prefix() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{}/{version}", env!("CARGO_PKG_NAME"))
}

/// Errors resolving a user agent.
#[derive(Debug, Error)]
pub enum UserAgentError {
    /// Nothing supplied a user agent.
    #[error(
        "no user agent configured: pass one explicitly, use a config file, set {USER_AGENT_ENV} or install a global user agent"
    )]
    NotConfigured,

    /// The config file could not be read.
    #[error("failed to read user agent config {path}: {source}")]
    Load {
        /// The config path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file contains no YAML document.
    #[error("user agent config {path} is empty")]
    EmptyConfig {
        /// The config path.
        path: PathBuf,
    },

    /// The config file is not valid YAML.
    #[error("user agent config {path} is invalid: {message}")]
    InvalidConfig {
        /// The config path.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// The config has no `user_agent` entry.
    #[error("user agent config {path} has no user_agent entry")]
    MissingUserAgent {
        /// The config path.
        path: PathBuf,
    },

    /// The requested lookup key is not in the config.
    #[error("user agent config {path} has no entry for lookup {lookup}")]
    UnknownLookup {
        /// The config path.
        path: PathBuf,
        /// The key that was requested.
        lookup: String,
    },
}

/// Inputs for resolving a user agent. All fields are optional.
#[derive(Debug, Clone, Default)]
pub struct UserAgentOptions {
    /// Explicit user agent (highest priority).
    pub user_agent: Option<String>,
    /// YAML file holding `user_agent` (and optionally `preprefix`).
    pub config_yaml: Option<PathBuf>,
    /// Selects a nested mapping inside `config_yaml`.
    pub lookup: Option<String>,
    /// Text placed before the prefix, separated by `:`.
    pub preprefix: Option<String>,
    /// Replaces [`default_prefix`].
    pub prefix: Option<String>,
}

impl UserAgentOptions {
    /// Options with an explicit user agent.
    #[must_use]
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
            ..Self::default()
        }
    }

    /// Options reading the user agent from a YAML file.
    #[must_use]
    pub fn from_config(path: impl Into<PathBuf>) -> Self {
        Self {
            config_yaml: Some(path.into()),
            ..Self::default()
        }
    }

    /// Selects the mapping under `lookup` in the config file.
    #[must_use]
    pub fn lookup(mut self, lookup: impl Into<String>) -> Self {
        self.lookup = Some(lookup.into());
        self
    }

    /// Sets the preprefix.
    #[must_use]
    pub fn preprefix(mut self, preprefix: impl Into<String>) -> Self {
        self.preprefix = Some(preprefix.into());
        self
    }

    /// Replaces the default prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Namespace for user agent resolution.
#[derive(Debug)]
pub struct UserAgent;

impl UserAgent {
    /// Joins the parts into the final header value.
    ///
    /// ```
    /// use fetcher_core::UserAgent;
    ///
    /// assert_eq!(UserAgent::compose("my_ua", Some("papa"), Some("lib/1.0")), "papa:lib/1.0-my_ua");
    /// assert_eq!(UserAgent::compose("my_ua", None, Some("lib/1.0")), "lib/1.0-my_ua");
    /// ```
    #[must_use]
    pub fn compose(user_agent: &str, preprefix: Option<&str>, prefix: Option<&str>) -> String {
        let prefix = prefix.map_or_else(default_prefix, str::to_string);
        match preprefix.filter(|p| !p.is_empty()) {
            Some(preprefix) => format!("{preprefix}:{prefix}-{user_agent}"),
            None => format!("{prefix}-{user_agent}"),
        }
    }

    /// Resolves the user agent for `options`.
    ///
    /// # Errors
    ///
    /// Returns [`UserAgentError`] when no source supplies a user agent or the
    /// config file is unreadable, empty, or lacks the requested entry.
    #[instrument]
    pub fn get(options: &UserAgentOptions) -> Result<String, UserAgentError> {
        let env_preprefix = non_empty_env(PREPREFIX_ENV);
        let prefix = options.prefix.as_deref();

        if let Some(user_agent) = options.user_agent.as_deref().filter(|ua| !ua.is_empty()) {
            let preprefix = options.preprefix.clone().or(env_preprefix);
            return Ok(Self::compose(user_agent, preprefix.as_deref(), prefix));
        }

        if let Some(path) = &options.config_yaml {
            let (user_agent, config_preprefix) = load_config(path, options.lookup.as_deref())?;
            let preprefix = options
                .preprefix
                .clone()
                .or(config_preprefix)
                .or(env_preprefix);
            return Ok(Self::compose(&user_agent, preprefix.as_deref(), prefix));
        }

        if let Some(user_agent) = non_empty_env(USER_AGENT_ENV) {
            debug!("user agent taken from environment");
            let preprefix = options.preprefix.clone().or(env_preprefix);
            return Ok(Self::compose(&user_agent, preprefix.as_deref(), prefix));
        }

        GLOBAL_USER_AGENT
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(UserAgentError::NotConfigured)
    }

    /// Resolves `options` and installs the result as the global fallback.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn set_global(options: &UserAgentOptions) -> Result<(), UserAgentError> {
        let user_agent = Self::get(options)?;
        debug!(%user_agent, "installing global user agent");
        *GLOBAL_USER_AGENT
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(user_agent);
        Ok(())
    }

    /// Removes the global fallback.
    pub fn clear_global() {
        *GLOBAL_USER_AGENT
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Reads `user_agent` and `preprefix` from a YAML file.
fn load_config(
    path: &Path,
    lookup: Option<&str>,
) -> Result<(String, Option<String>), UserAgentError> {
    if path.as_os_str().is_empty() {
        return Err(UserAgentError::NotConfigured);
    }
    let text = std::fs::read_to_string(path).map_err(|source| UserAgentError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Err(UserAgentError::EmptyConfig {
            path: path.to_path_buf(),
        });
    }

    let document: Value =
        serde_yaml::from_str(&text).map_err(|e| UserAgentError::InvalidConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if document.is_null() {
        return Err(UserAgentError::EmptyConfig {
            path: path.to_path_buf(),
        });
    }

    let section = match lookup {
        Some(key) => document
            .get(key)
            .filter(|v| v.is_mapping())
            .ok_or_else(|| UserAgentError::UnknownLookup {
                path: path.to_path_buf(),
                lookup: key.to_string(),
            })?,
        None => &document,
    };

    let user_agent = section
        .get("user_agent")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|ua| !ua.is_empty())
        .ok_or_else(|| UserAgentError::MissingUserAgent {
            path: path.to_path_buf(),
        })?;
    let preprefix = section
        .get("preprefix")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok((user_agent.to_string(), preprefix))
}

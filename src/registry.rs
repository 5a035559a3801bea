//! Named sessions built from a [`FetchConfig`].
//!
//! Each named entry gets its own [`Session`] (and therefore its own rate
//! limiter) with the shared retry settings plus its own credentials, query
//! parameters and headers.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::config::{ConfigError, FetchConfig, NamedSessionSettings};
use crate::session::{Session, SessionBuilder};
use crate::user_agent::{UserAgent, UserAgentOptions};

/// The default session plus the named sessions of a configuration.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    default: Session,
    named: BTreeMap<String, Session>,
}

impl SessionRegistry {
    /// Builds every session described by `config`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UserAgent`] if no user agent can be resolved
    /// - [`ConfigError::Session`] if a session cannot be built (e.g. a bad header)
    #[instrument(skip(config), fields(named = config.sessions.len()))]
    pub fn from_config(config: &FetchConfig) -> Result<Self, ConfigError> {
        let user_agent_options = config.user_agent_options();
        let user_agent = UserAgent::get(&user_agent_options)?;
        let default = base_builder(config, user_agent).build()?;

        let mut named = BTreeMap::new();
        for (name, settings) in &config.sessions {
            let session = build_named(config, &user_agent_options, settings)?;
            debug!(session = %name, user_agent = session.user_agent(), "built named session");
            named.insert(name.clone(), session);
        }

        Ok(Self { default, named })
    }

    /// The session built from the top-level settings.
    #[must_use]
    pub fn default_session(&self) -> &Session {
        &self.default
    }

    /// The named session `name`, if configured.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Session> {
        self.named.get(name)
    }

    /// Like [`get`](Self::get) but reports an unknown name as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSession`] if `name` is not configured.
    pub fn require(&self, name: &str) -> Result<&Session, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::UnknownSession(name.to_string()))
    }

    /// Names of the configured sessions, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(String::as_str)
    }
}

fn base_builder(config: &FetchConfig, user_agent: String) -> SessionBuilder {
    Session::builder(user_agent)
        .retry_policy(config.retry_policy())
        .maybe_rate_limit(config.rate_limit())
}

fn build_named(
    config: &FetchConfig,
    user_agent_options: &UserAgentOptions,
    settings: &NamedSessionSettings,
) -> Result<Session, ConfigError> {
    let user_agent = match &settings.user_agent {
        Some(user_agent) => UserAgent::get(&UserAgentOptions {
            user_agent: Some(user_agent.clone()),
            config_yaml: None,
            lookup: None,
            ..user_agent_options.clone()
        })?,
        None => UserAgent::get(user_agent_options)?,
    };

    let mut builder = base_builder(config, user_agent);
    if let Some(credential) = &settings.basic_auth {
        builder = builder.basic_auth(credential.clone());
    }
    for (key, value) in &settings.extra_params {
        builder = builder.extra_param(key.clone(), value.clone());
    }
    for (name, value) in &settings.headers {
        builder = builder.header(name.clone(), value.clone());
    }
    Ok(builder.build()?)
}

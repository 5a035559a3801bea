//! Process-wide default session.
//!
//! Nothing is created at startup. [`get`] builds the default lazily from the
//! resolved user agent (see [`UserAgent`]) the first time it is needed;
//! [`set`] replaces it with a caller-built session and [`clear`] drops it so
//! pooled connections are released and the next [`get`] starts over.

use std::sync::{PoisonError, RwLock};

use tracing::{debug, instrument};

use super::{Session, SessionBuildError};
use crate::user_agent::{UserAgent, UserAgentError, UserAgentOptions};

static DEFAULT_SESSION: RwLock<Option<Session>> = RwLock::new(None);

/// Why the default session could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum DefaultSessionError {
    /// No user agent could be resolved for the lazily built session.
    #[error(transparent)]
    UserAgent(#[from] UserAgentError),

    /// Building the session failed.
    #[error(transparent)]
    Build(#[from] SessionBuildError),
}

/// Returns the default session, building it on first use.
///
/// # Errors
///
/// Returns [`DefaultSessionError`] when no default was installed and no
/// user agent can be resolved from the environment or the global setting.
#[instrument]
pub fn get() -> Result<Session, DefaultSessionError> {
    if let Some(session) = DEFAULT_SESSION
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return Ok(session.clone());
    }

    let mut slot = DEFAULT_SESSION
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    // Another thread may have won the race while we waited for the write lock
    if let Some(session) = slot.as_ref() {
        return Ok(session.clone());
    }

    let user_agent = UserAgent::get(&UserAgentOptions::default())?;
    let session = Session::builder(user_agent).build()?;
    debug!(user_agent = session.user_agent(), "built default session");
    *slot = Some(session.clone());
    Ok(session)
}

/// Installs `session` as the default, returning the previous one.
pub fn set(session: Session) -> Option<Session> {
    DEFAULT_SESSION
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(session)
}

/// Removes the default session, returning it if one was set.
pub fn clear() -> Option<Session> {
    DEFAULT_SESSION
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::{EnvVarRestore, env_lock};

    #[test]
    fn test_set_get_clear_roundtrip() {
        let _lock = env_lock();
        clear();

        let session = Session::builder("installed/1.0").build().unwrap();
        assert!(set(session).is_none());
        assert_eq!(get().unwrap().user_agent(), "installed/1.0");

        let replacement = Session::builder("replacement/2.0").build().unwrap();
        let previous = set(replacement).unwrap();
        assert_eq!(previous.user_agent(), "installed/1.0");
        assert_eq!(get().unwrap().user_agent(), "replacement/2.0");

        assert!(clear().is_some());
        assert!(clear().is_none());
    }

    #[test]
    fn test_get_builds_lazily_from_global_user_agent() {
        let _lock = env_lock();
        let _user_agent = EnvVarRestore::set("USER_AGENT", None);
        let _preprefix = EnvVarRestore::set("PREPREFIX", None);
        clear();
        UserAgent::set_global(&UserAgentOptions::with_user_agent("lazy")).unwrap();

        let session = get().unwrap();
        assert!(
            session.user_agent().ends_with("-lazy"),
            "unexpected user agent {}",
            session.user_agent()
        );

        UserAgent::clear_global();
        clear();
    }
}

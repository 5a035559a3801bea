//! Helpers shared by unit tests.

use std::sync::{Mutex, MutexGuard, PoisonError};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that touch environment variables or process-wide state.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sets (or removes) an environment variable and restores it on drop.
pub(crate) struct EnvVarRestore {
    name: &'static str,
    previous: Option<String>,
}

impl EnvVarRestore {
    pub(crate) fn set(name: &'static str, value: Option<&str>) -> Self {
        let previous = std::env::var(name).ok();
        // SAFETY: callers hold `env_lock` so no other test mutates the environment concurrently.
        unsafe {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
        Self { name, previous }
    }
}

impl Drop for EnvVarRestore {
    fn drop(&mut self) {
        // SAFETY: paired restoration under the same lock.
        unsafe {
            match &self.previous {
                Some(previous) => std::env::set_var(self.name, previous),
                None => std::env::remove_var(self.name),
            }
        }
    }
}

pub(crate) mod socket_guard {
    use std::net::TcpListener;
    use std::panic::Location;

    use wiremock::MockServer;

    fn socket_tests_required() -> bool {
        std::env::var("FETCHER_REQUIRE_SOCKET_TESTS")
            .ok()
            .is_some_and(|value| {
                matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
            })
    }

    #[track_caller]
    fn should_skip_socket_bound_test() -> bool {
        if TcpListener::bind("127.0.0.1:0").is_ok() {
            return false;
        }

        let location = Location::caller();
        let message = format!(
            "[socket-bound-test] cannot bind localhost socket at {}:{}; wiremock-based test cannot run in this environment",
            location.file(),
            location.line()
        );
        assert!(
            !socket_tests_required(),
            "{message}. Set FETCHER_REQUIRE_SOCKET_TESTS=0 to allow local skip behavior."
        );

        eprintln!(
            "{message}. Skipping test. Set FETCHER_REQUIRE_SOCKET_TESTS=1 to fail-fast instead."
        );
        true
    }

    pub(crate) async fn start_mock_server_or_skip() -> Option<MockServer> {
        if should_skip_socket_bound_test() {
            None
        } else {
            Some(MockServer::start().await)
        }
    }
}

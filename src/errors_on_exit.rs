//! Deferred error reporting for batch runs.
//!
//! Failures are recorded as they happen and reported together at the end,
//! so one bad URL does not stop the rest of a batch but still fails the run.

use std::process::ExitCode;
use std::sync::{Mutex, PoisonError};

use tracing::error;

/// Collects error messages to log before exiting.
///
/// `add` takes `&self`, so one collector can be shared by concurrent tasks.
#[derive(Debug, Default)]
pub struct ErrorsOnExit {
    errors: Mutex<Vec<String>>,
}

impl ErrorsOnExit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `message` with surrounding whitespace removed.
    pub fn add(&self, message: impl AsRef<str>) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.as_ref().trim().to_string());
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// A snapshot of the recorded messages, in insertion order.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Logs every recorded message at `error` level.
    pub fn log(&self) {
        for message in self
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            error!("{message}");
        }
    }

    /// 1 if anything was recorded, 0 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(self.has_errors())
    }

    /// Logs the recorded messages and returns the process exit code.
    #[must_use]
    pub fn finish(&self) -> ExitCode {
        self.log();
        ExitCode::from(self.exit_code())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_trims_and_preserves_order() {
        let errors = ErrorsOnExit::new();
        assert!(!errors.has_errors());
        errors.add("  first failure\n");
        errors.add(String::from("second"));
        assert!(errors.has_errors());
        assert_eq!(errors.errors(), ["first failure", "second"]);
    }

    #[test]
    fn test_finish_exit_codes() {
        let clean = ErrorsOnExit::new();
        assert_eq!(clean.exit_code(), 0);

        let failed = ErrorsOnExit::new();
        failed.add("boom");
        assert_eq!(failed.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_shared_between_tasks() {
        let errors = Arc::new(ErrorsOnExit::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let errors = Arc::clone(&errors);
            handles.push(tokio::spawn(async move {
                errors.add(format!("task {i} failed"));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(errors.errors().len(), 8);
    }
}

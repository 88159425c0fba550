//! Engine error taxonomy.
//!
//! Four classes matter to callers: transient remote failures (the only ones
//! a task's retry budget covers), remote command exits and other hard
//! failures (propagated up through module and pipeline), cancellation
//! (surfaced as-is, never converted), and internal invariant violations
//! such as a missing cache key.

use thiserror::Error;

/// Errors produced by the pipeline engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A remote-execution failure, transient or not.
    #[error(transparent)]
    Remote(#[from] sshkit::Error),

    /// A task failed on one or more hosts after exhausting retries.
    #[error("task '{task}' failed on {} host(s): {}", .failures.len(), summarize(.failures))]
    TaskFailed {
        /// Task name
        task: String,
        /// (host, error) pairs for every failed host
        failures: Vec<(String, String)>,
    },

    /// A pipeline stopped at a failing module.
    #[error("pipeline '{pipeline}' failed at module '{module}': {message}")]
    PipelineFailed {
        /// Pipeline name
        pipeline: String,
        /// The module that failed
        module: String,
        /// Failure detail
        message: String,
    },

    /// The enclosing operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Invariant violation (missing cache key, programmer error).
    #[error("internal error: {0}")]
    Internal(String),
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(host, err)| format!("{host}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Whether this error is transient and worth consuming retry budget on.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Remote(e) if e.is_transient())
    }

    /// Whether this error is a cancellation, at any nesting.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Remote(sshkit::Error::Cancelled))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = Error::Remote(sshkit::Error::Unreachable {
            message: "connection reset".into(),
        });
        assert!(err.is_transient());

        let err = Error::Remote(sshkit::Error::CommandFailed {
            exit_code: 1,
            stderr: "oops".into(),
        });
        assert!(!err.is_transient());

        assert!(!Error::Internal("missing key".into()).is_transient());
    }

    #[test]
    fn test_cancelled_classification() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::Remote(sshkit::Error::Cancelled).is_cancelled());
        assert!(!Error::Internal("x".into()).is_cancelled());
    }

    #[test]
    fn test_task_failed_display_names_hosts() {
        let err = Error::TaskFailed {
            task: "SyncBinaries".into(),
            failures: vec![("n1".into(), "404 Not Found".into())],
        };
        let msg = err.to_string();
        assert!(msg.contains("SyncBinaries"));
        assert!(msg.contains("n1: 404 Not Found"));
    }
}

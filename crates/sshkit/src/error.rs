//! Error types for remote execution.
//!
//! Errors are categorized so callers can distinguish transient network
//! failures (worth retrying) from command failures and terminal auth
//! problems.

use thiserror::Error;

/// Categories of remote-execution errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Authentication was rejected. Terminal for the host.
    Auth,
    /// The host could not be reached (transient, retryable).
    Network,
    /// The remote command ran and returned a non-zero exit code.
    Command,
    /// Local or transfer I/O failure.
    Io,
    /// The operation was cancelled.
    Cancelled,
}

impl ErrorCategory {
    /// Whether this category is typically transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network)
    }
}

/// Errors that can occur while executing against a remote host.
#[derive(Debug, Error)]
pub enum Error {
    /// The host rejected our credentials.
    #[error("authentication failed: {message}")]
    AuthFailed {
        /// Detail from the SSH client
        message: String,
    },

    /// The host could not be reached over the network.
    #[error("host unreachable: {message}")]
    Unreachable {
        /// Detail from the SSH client
        message: String,
    },

    /// The remote command returned a non-zero exit code.
    ///
    /// `stderr` is carried verbatim for diagnostic surfacing.
    #[error("command exited with status {exit_code}: {stderr}")]
    CommandFailed {
        /// Remote exit code
        exit_code: i32,
        /// Standard error output, untrimmed
        stderr: String,
    },

    /// Local process or file I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The enclosing operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::AuthFailed { .. } => ErrorCategory::Auth,
            Error::Unreachable { .. } => ErrorCategory::Network,
            Error::CommandFailed { .. } => ErrorCategory::Command,
            Error::Io(_) => ErrorCategory::Io,
            Error::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        self.category().is_transient()
    }

    /// Classify a failed SSH invocation from its exit code and stderr.
    ///
    /// OpenSSH reserves exit code 255 for client-side failures; everything
    /// else is the remote command's own exit status. The stderr text is
    /// inspected to separate authentication rejections from network trouble.
    pub fn from_ssh_output(exit_code: i32, stderr: &str) -> Self {
        if exit_code != 255 {
            return Error::CommandFailed {
                exit_code,
                stderr: stderr.to_string(),
            };
        }

        let lower = stderr.to_lowercase();
        if lower.contains("permission denied")
            || lower.contains("authentication failed")
            || lower.contains("host key verification failed")
            || lower.contains("too many authentication failures")
        {
            return Error::AuthFailed {
                message: stderr.trim().to_string(),
            };
        }

        Error::Unreachable {
            message: stderr.trim().to_string(),
        }
    }
}

/// Result type for remote-execution operations.
pub type Result<T> = std::result::Result<T, Error>;

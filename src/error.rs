//! Orchestrator error type.

use thiserror::Error;

/// Errors surfaced by the orchestration layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Pipeline-engine failure
    #[error(transparent)]
    Engine(#[from] conveyor::Error),

    /// Remote-execution failure outside a pipeline (e.g. the ping gate)
    #[error(transparent)]
    Remote(#[from] sshkit::Error),

    /// The bootstrap payload could not be parsed
    #[error("invalid bootstrap payload: {0}")]
    Payload(String),

    /// Inventory preflight validation failed
    #[error("preflight failed: {0}")]
    Preflight(String),

    /// The target host's environment is unsupported
    #[error("unsupported environment: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether this error is a cancellation, at any nesting.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Engine(e) => e.is_cancelled(),
            Error::Remote(e) => matches!(e, sshkit::Error::Cancelled),
            _ => false,
        }
    }
}

/// Task actions speak the engine's error type; orchestrator errors fold
/// into it so services can be called from inside actions with `?`.
impl From<Error> for conveyor::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Engine(e) => e,
            Error::Remote(e) => conveyor::Error::Remote(e),
            other => conveyor::Error::Internal(other.to_string()),
        }
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

//! # sshkit
//!
//! A pooled, synchronous SSH execution facade.
//!
//! The crate provides a uniform command-execution contract over one remote
//! host: run commands as the connection user or with sudo elevation, upload
//! files, and probe liveness. Connections are pooled per (host, user),
//! transient network failures are retried internally, and every blocking
//! call honours a cooperative [`CancelToken`].
//!
//! ## Layering
//!
//! - [`Transport`] moves bytes. [`OpenSshTransport`] shells out to the
//!   system OpenSSH client with ControlMaster multiplexing;
//!   [`mock::MockTransport`] replays scripted responses for tests.
//! - [`SshExecutor`] implements [`RemoteRunner`], the per-host facade with
//!   the execution contract (serialization, sudo injection, retry).
//! - [`ExecutorPool`] hands out runners sharing one per-host lock.

pub mod cancel;
pub mod error;
pub mod executor;
pub mod host;
pub mod mock;
pub mod pool;
pub mod transport;

pub use cancel::CancelToken;
pub use error::{Error, ErrorCategory, Result};
pub use executor::{RemoteRunner, RunOptions, SshExecutor};
pub use host::{Auth, Host};
pub use pool::ExecutorPool;
pub use transport::{ExecOutput, OpenSshTransport, Transport};

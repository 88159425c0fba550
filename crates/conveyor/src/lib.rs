//! # conveyor
//!
//! A phased remote-execution pipeline engine.
//!
//! Work is composed in three layers, leaves first:
//!
//! - [`RemoteTask`]: a named, idempotent action bound to a selected set of
//!   hosts, with prepare predicates, a transient-only retry budget, and
//!   optional bounded-parallel dispatch.
//! - [`Module`]: an ordered task group for one cohesive stage, with a skip
//!   predicate over the pipeline cache and an optional post-hook.
//! - [`Pipeline`]: an ordered module sequence sharing one cache and one
//!   cancellation token, short-circuiting at the first failure and
//!   reporting a per-module outcome.
//!
//! Cross-module data flows only through the caches; a pipeline invocation
//! owns its cache and disposes it on return. Re-invoking a pipeline on the
//! same inventory is safe: tasks re-probe preconditions and skip where
//! satisfied.

pub mod cache;
pub mod error;
pub mod module;
pub mod pipeline;
pub mod prepare;
pub mod runtime;
pub mod task;

#[cfg(test)]
mod testutil;

pub use cache::{Cache, HostCaches};
pub use error::{Error, Result};
pub use module::{HookContext, Module, ModuleOutcome};
pub use pipeline::{Pipeline, PipelineReport};
pub use prepare::{Not, Prepare, PrepareCollection};
pub use runtime::Runtime;
pub use task::{Action, HostOutcome, HostSelector, RemoteTask, TaskContext, TaskReport};

//! Prepare predicates: the run/skip gate consulted per selected host.

use crate::error::Result;
use crate::task::TaskContext;

/// A boolean test run before a task dispatches to a host.
///
/// Returning `Ok(false)` skips the host; this is not an error. Probing the
/// remote side through `ctx.runner` is expected (e.g. "is the runtime
/// already installed?").
pub trait Prepare: Send + Sync {
    fn should_run(&self, ctx: &TaskContext) -> Result<bool>;
}

impl<F> Prepare for F
where
    F: Fn(&TaskContext) -> Result<bool> + Send + Sync,
{
    fn should_run(&self, ctx: &TaskContext) -> Result<bool> {
        self(ctx)
    }
}

/// Ordered conjunction of prepare predicates.
///
/// The result is the logical AND of the members; the first member returning
/// `Ok(false)` short-circuits to skip.
pub struct PrepareCollection {
    members: Vec<Box<dyn Prepare>>,
}

impl PrepareCollection {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    /// Append a member.
    pub fn with(mut self, prepare: impl Prepare + 'static) -> Self {
        self.members.push(Box::new(prepare));
        self
    }
}

impl Default for PrepareCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl Prepare for PrepareCollection {
    fn should_run(&self, ctx: &TaskContext) -> Result<bool> {
        for member in &self.members {
            if !member.should_run(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Inverts a prepare predicate.
pub struct Not<P>(pub P);

impl<P: Prepare> Prepare for Not<P> {
    fn should_run(&self, ctx: &TaskContext) -> Result<bool> {
        Ok(!self.0.should_run(ctx)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, HostCaches};
    use crate::task::{HostSelector, RemoteTask};
    use crate::testutil::TestRuntime;
    use sshkit::CancelToken;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Run a collection against a single-host runtime and report the result.
    fn eval(collection: PrepareCollection) -> bool {
        let rt = TestRuntime::new(&[("n1", &["worker"])]);
        let cache = Cache::new();
        let hosts = HostCaches::new();
        let token = CancelToken::new();
        let result = Arc::new(AtomicU32::new(0));
        let flag = result.clone();
        let task = RemoteTask::new(
            "Probe",
            "records whether it ran",
            HostSelector::All,
            move |_: &TaskContext| {
                flag.store(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .prepare(collection);
        task.run(&rt, &cache, &hosts, &token).unwrap();
        result.load(Ordering::SeqCst) == 1
    }

    #[test]
    fn test_empty_collection_runs() {
        assert!(eval(PrepareCollection::new()));
    }

    #[test]
    fn test_all_true_runs() {
        let collection = PrepareCollection::new()
            .with(|_: &TaskContext| Ok(true))
            .with(|_: &TaskContext| Ok(true));
        assert!(eval(collection));
    }

    #[test]
    fn test_first_false_short_circuits() {
        let evaluated = Arc::new(AtomicU32::new(0));
        let second = evaluated.clone();
        let collection = PrepareCollection::new()
            .with(|_: &TaskContext| Ok(false))
            .with(move |_: &TaskContext| {
                second.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            });
        assert!(!eval(collection));
        assert_eq!(evaluated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_not_inverts() {
        let collection = PrepareCollection::new().with(Not(|_: &TaskContext| Ok(false)));
        assert!(eval(collection));
    }
}

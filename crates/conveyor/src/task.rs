//! The task primitive: one named, idempotent action against a selected set
//! of hosts.
//!
//! A task selects hosts, consults its prepare predicates per host, then
//! dispatches the action: concurrently across hosts when the parallel flag
//! is set (bounded by a fixed worker pool), sequentially in selector order
//! otherwise. Only transient remote errors consume the retry budget; all
//! other failures are final for the host on first occurrence.

use crate::cache::{Cache, HostCaches};
use crate::error::{Error, Result};
use crate::prepare::Prepare;
use crate::runtime::Runtime;
use sshkit::{CancelToken, Host, RemoteRunner};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound on concurrent workers in a parallel task.
pub const MAX_WORKERS: usize = 16;

/// Which hosts a task targets.
#[derive(Debug, Clone)]
pub enum HostSelector {
    /// Every inventory host
    All,
    /// Hosts carrying any of the given roles (deduplicated, inventory order)
    Roles(Vec<String>),
    /// Explicitly named hosts, in the given order
    Names(Vec<String>),
}

impl HostSelector {
    /// Resolve the selector against the runtime's inventory.
    pub fn select(&self, runtime: &dyn Runtime) -> Vec<Host> {
        match self {
            HostSelector::All => runtime.all_hosts(),
            HostSelector::Roles(roles) => {
                let mut picked = Vec::new();
                for host in runtime.all_hosts() {
                    if roles.iter().any(|r| host.has_role(r))
                        && !picked.iter().any(|h: &Host| h.name == host.name)
                    {
                        picked.push(host);
                    }
                }
                picked
            }
            HostSelector::Names(names) => {
                let all = runtime.all_hosts();
                names
                    .iter()
                    .filter_map(|n| all.iter().find(|h| &h.name == n).cloned())
                    .collect()
            }
        }
    }
}

/// Everything an action (or prepare predicate) can see for one host.
pub struct TaskContext<'a> {
    /// The runtime handle (read-only)
    pub runtime: &'a dyn Runtime,
    /// The host this dispatch targets
    pub host: &'a Host,
    /// Pooled runner for the host
    pub runner: Arc<dyn RemoteRunner>,
    /// Per-host cache, shared by all tasks targeting this host
    pub host_cache: Arc<Cache>,
    /// Pipeline-wide cache
    pub pipeline_cache: &'a Cache,
    /// Cancellation token for the invocation
    pub token: &'a CancelToken,
}

/// The unit of work dispatched per host.
pub trait Action: Send + Sync {
    fn execute(&self, ctx: &TaskContext) -> Result<()>;
}

impl<F> Action for F
where
    F: Fn(&TaskContext) -> Result<()> + Send + Sync,
{
    fn execute(&self, ctx: &TaskContext) -> Result<()> {
        self(ctx)
    }
}

/// Outcome of one task dispatch on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    /// The action succeeded after `attempts` tries
    Succeeded { attempts: u32 },
    /// A prepare predicate returned skip
    Skipped,
    /// The action failed after `attempts` tries
    Failed { attempts: u32, error: String },
}

/// Per-host outcomes of one task execution.
#[derive(Debug)]
pub struct TaskReport {
    /// Task name
    pub task: String,
    /// (host, outcome) in selector order
    pub outcomes: Vec<(String, HostOutcome)>,
}

impl TaskReport {
    /// The task succeeds when every host either succeeded or was skipped.
    pub fn is_success(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|(_, o)| matches!(o, HostOutcome::Failed { .. }))
    }

    /// All (host, error) pairs for failed hosts.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.outcomes
            .iter()
            .filter_map(|(host, o)| match o {
                HostOutcome::Failed { error, .. } => Some((host.clone(), error.clone())),
                _ => None,
            })
            .collect()
    }

    /// The outcome recorded for `host`.
    pub fn outcome_for(&self, host: &str) -> Option<&HostOutcome> {
        self.outcomes
            .iter()
            .find(|(h, _)| h == host)
            .map(|(_, o)| o)
    }

    /// Convert to the aggregate result: `Err(TaskFailed)` if any host failed.
    pub fn to_result(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::TaskFailed {
                task: self.task.clone(),
                failures: self.failures(),
            })
        }
    }
}

/// A named, idempotent operation bound to a selected set of hosts.
pub struct RemoteTask {
    /// Task name
    pub name: String,
    /// Human-readable description
    pub desc: String,
    /// Host selector
    pub hosts: HostSelector,
    /// Prepare predicate, consulted per selected host
    pub prepare: Option<Box<dyn Prepare>>,
    /// The action dispatched per host
    pub action: Box<dyn Action>,
    /// Run all selected hosts concurrently
    pub parallel: bool,
    /// Retries after the first attempt (transient errors only)
    pub retry: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
}

impl RemoteTask {
    /// Create a sequential task with no retries.
    pub fn new(
        name: impl Into<String>,
        desc: impl Into<String>,
        hosts: HostSelector,
        action: impl Action + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            hosts,
            prepare: None,
            action: Box::new(action),
            parallel: false,
            retry: 0,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set the prepare predicate.
    pub fn prepare(mut self, prepare: impl Prepare + 'static) -> Self {
        self.prepare = Some(Box::new(prepare));
        self
    }

    /// Enable concurrent dispatch across hosts.
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// Set the retry budget.
    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Set the delay between attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Execute the task against the runtime.
    ///
    /// Returns `Ok(report)` with per-host outcomes; the report may contain
    /// failures. Returns `Err` only for cancellation.
    pub fn run(
        &self,
        runtime: &dyn Runtime,
        pipeline_cache: &Cache,
        host_caches: &HostCaches,
        token: &CancelToken,
    ) -> Result<TaskReport> {
        let selected = self.hosts.select(runtime);
        log::debug!(
            "task '{}': {} ({} host(s))",
            self.name,
            self.desc,
            selected.len()
        );

        if selected.is_empty() {
            return Ok(TaskReport {
                task: self.name.clone(),
                outcomes: Vec::new(),
            });
        }

        let outcomes = if self.parallel && selected.len() > 1 {
            self.run_parallel(&selected, runtime, pipeline_cache, host_caches, token)?
        } else {
            self.run_sequential(&selected, runtime, pipeline_cache, host_caches, token)?
        };

        Ok(TaskReport {
            task: self.name.clone(),
            outcomes,
        })
    }

    fn run_sequential(
        &self,
        hosts: &[Host],
        runtime: &dyn Runtime,
        pipeline_cache: &Cache,
        host_caches: &HostCaches,
        token: &CancelToken,
    ) -> Result<Vec<(String, HostOutcome)>> {
        let mut outcomes = Vec::with_capacity(hosts.len());
        for host in hosts {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let outcome = self.run_host(host, runtime, pipeline_cache, host_caches, token)?;
            outcomes.push((host.name.clone(), outcome));
        }
        Ok(outcomes)
    }

    fn run_parallel(
        &self,
        hosts: &[Host],
        runtime: &dyn Runtime,
        pipeline_cache: &Cache,
        host_caches: &HostCaches,
        token: &CancelToken,
    ) -> Result<Vec<(String, HostOutcome)>> {
        let workers = hosts.len().min(MAX_WORKERS);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create worker pool: {e}")))?;

        // Collect (index, result) then restore selector order; the progress
        // of individual hosts carries no mutual ordering guarantee.
        let results: Mutex<Vec<(usize, Result<HostOutcome>)>> = Mutex::new(Vec::new());
        pool.install(|| {
            rayon::scope(|scope| {
                for (idx, host) in hosts.iter().enumerate() {
                    let results = &results;
                    scope.spawn(move |_| {
                        let result = if token.is_cancelled() {
                            Err(Error::Cancelled)
                        } else {
                            self.run_host(host, runtime, pipeline_cache, host_caches, token)
                        };
                        results.lock().unwrap().push((idx, result));
                    });
                }
            });
        });

        let mut collected = results.into_inner().unwrap();
        collected.sort_by_key(|(idx, _)| *idx);

        let mut outcomes = Vec::with_capacity(hosts.len());
        for ((_, result), host) in collected.into_iter().zip(hosts) {
            outcomes.push((host.name.clone(), result?));
        }
        Ok(outcomes)
    }

    /// Dispatch on one host: prepare, then the attempt loop.
    ///
    /// `Err` is reserved for cancellation; every other failure becomes a
    /// `HostOutcome::Failed`.
    fn run_host(
        &self,
        host: &Host,
        runtime: &dyn Runtime,
        pipeline_cache: &Cache,
        host_caches: &HostCaches,
        token: &CancelToken,
    ) -> Result<HostOutcome> {
        let runner = match runtime.runner_for(host, token) {
            Ok(runner) => runner,
            Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
            Err(e) => {
                return Ok(HostOutcome::Failed {
                    attempts: 1,
                    error: e.to_string(),
                });
            }
        };

        let ctx = TaskContext {
            runtime,
            host,
            runner,
            host_cache: host_caches.for_host(&host.name),
            pipeline_cache,
            token,
        };

        if let Some(prepare) = &self.prepare {
            match prepare.should_run(&ctx) {
                Ok(true) => {}
                Ok(false) => {
                    log::debug!("task '{}': skipping host {}", self.name, host.name);
                    return Ok(HostOutcome::Skipped);
                }
                Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => {
                    return Ok(HostOutcome::Failed {
                        attempts: 0,
                        error: format!("prepare failed: {e}"),
                    });
                }
            }
        }

        let mut attempts = 0;
        loop {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempts += 1;
            match self.action.execute(&ctx) {
                Ok(()) => return Ok(HostOutcome::Succeeded { attempts }),
                Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                Err(e) if e.is_transient() && attempts <= self.retry => {
                    log::warn!(
                        "task '{}' on {}: attempt {attempts} failed ({e}), retrying in {:?}",
                        self.name,
                        host.name,
                        self.retry_delay
                    );
                    token.sleep(self.retry_delay).map_err(|_| Error::Cancelled)?;
                }
                Err(e) => {
                    return Ok(HostOutcome::Failed {
                        attempts,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

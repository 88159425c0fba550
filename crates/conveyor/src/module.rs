//! Modules: ordered task groups accomplishing one cohesive stage.

use crate::cache::{Cache, HostCaches};
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::task::RemoteTask;
use sshkit::CancelToken;

/// Skip predicate, evaluated against the pipeline cache before any task runs.
pub type SkipPredicate = Box<dyn Fn(&Cache) -> bool + Send + Sync>;

/// Context handed to a module's post-hook.
pub struct HookContext<'a> {
    /// The runtime handle
    pub runtime: &'a dyn Runtime,
    /// Pipeline-wide cache, typically the hook's output target
    pub pipeline_cache: &'a Cache,
    /// Cancellation token for the invocation
    pub token: &'a CancelToken,
}

/// Hook run once after the module's last task.
pub type PostHook = Box<dyn Fn(&HookContext) -> Result<()> + Send + Sync>;

/// How a module ended within one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// Every task succeeded (or skipped all its hosts)
    Succeeded,
    /// The skip predicate fired; nothing ran
    Skipped,
    /// A task failed; the error message is carried verbatim
    Failed { error: String },
    /// The invocation was cancelled while this module ran
    Cancelled,
    /// An earlier module failed, so this one never started
    NotRun,
}

/// An ordered collection of tasks targeting a role-filtered host subset.
pub struct Module {
    /// Module name
    pub name: String,
    /// Human-readable description
    pub desc: String,
    skip: Option<SkipPredicate>,
    tasks: Vec<RemoteTask>,
    post_hook: Option<PostHook>,
}

impl Module {
    pub fn new(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            skip: None,
            tasks: Vec::new(),
            post_hook: None,
        }
    }

    /// Skip the module when `predicate` evaluates true against the pipeline
    /// cache.
    pub fn skip_when(
        mut self,
        predicate: impl Fn(&Cache) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip = Some(Box::new(predicate));
        self
    }

    /// Unconditionally skip (decided at pipeline construction).
    pub fn skip(self, skip: bool) -> Self {
        if skip {
            self.skip_when(|_| true)
        } else {
            self
        }
    }

    /// Append a task.
    pub fn task(mut self, task: RemoteTask) -> Self {
        self.tasks.push(task);
        self
    }

    /// Set the post-hook, run once after the last task succeeds.
    pub fn post_hook(
        mut self,
        hook: impl Fn(&HookContext) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.post_hook = Some(Box::new(hook));
        self
    }

    /// Execute the module: skip check, tasks in declared order
    /// (short-circuiting on the first failure), then the post-hook.
    pub fn run(
        &self,
        runtime: &dyn Runtime,
        pipeline_cache: &Cache,
        host_caches: &HostCaches,
        token: &CancelToken,
    ) -> Result<ModuleOutcome> {
        if let Some(skip) = &self.skip
            && skip(pipeline_cache)
        {
            log::info!("module '{}': skipped", self.name);
            return Ok(ModuleOutcome::Skipped);
        }

        log::info!("module '{}': {}", self.name, self.desc);
        for task in &self.tasks {
            token.check().map_err(|_| Error::Cancelled)?;
            let report = task.run(runtime, pipeline_cache, host_caches, token)?;
            report.to_result()?;
        }

        if let Some(hook) = &self.post_hook {
            hook(&HookContext {
                runtime,
                pipeline_cache,
                token,
            })?;
        }

        Ok(ModuleOutcome::Succeeded)
    }
}

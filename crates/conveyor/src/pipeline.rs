//! Pipelines: ordered module sequences sharing one cache and one token.
//!
//! A pipeline lives for one invocation. Its cache is created empty at
//! `start` and disposed on return. There is no rollback: remote state from
//! completed modules persists, and reruns rely on task idempotence.

use crate::cache::{Cache, HostCaches};
use crate::error::{Error, Result};
use crate::module::{Module, ModuleOutcome};
use crate::runtime::Runtime;
use sshkit::CancelToken;
use std::sync::Arc;

/// Per-module outcomes of one pipeline invocation.
#[derive(Debug)]
pub struct PipelineReport {
    /// Pipeline name
    pub pipeline: String,
    /// (module, outcome) in declared order
    pub outcomes: Vec<(String, ModuleOutcome)>,
}

impl PipelineReport {
    /// Whether every module succeeded or was skipped.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| {
            matches!(o, ModuleOutcome::Succeeded | ModuleOutcome::Skipped)
        })
    }

    /// The outcome recorded for `module`.
    pub fn outcome_for(&self, module: &str) -> Option<&ModuleOutcome> {
        self.outcomes
            .iter()
            .find(|(m, _)| m == module)
            .map(|(_, o)| o)
    }

    /// The first failed module, if any.
    pub fn first_failure(&self) -> Option<(&str, &str)> {
        self.outcomes.iter().find_map(|(m, o)| match o {
            ModuleOutcome::Failed { error } => Some((m.as_str(), error.as_str())),
            _ => None,
        })
    }

    /// Convert to the aggregate result.
    pub fn to_result(&self) -> Result<()> {
        if let Some((module, message)) = self.first_failure() {
            return Err(Error::PipelineFailed {
                pipeline: self.pipeline.clone(),
                module: module.to_string(),
                message: message.to_string(),
            });
        }
        if self
            .outcomes
            .iter()
            .any(|(_, o)| matches!(o, ModuleOutcome::Cancelled))
        {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// An ordered sequence of modules sharing a mutable cache.
pub struct Pipeline {
    /// Pipeline name
    pub name: String,
    runtime: Arc<dyn Runtime>,
    modules: Vec<Module>,
    token: CancelToken,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, runtime: Arc<dyn Runtime>, token: CancelToken) -> Self {
        Self {
            name: name.into(),
            runtime,
            modules: Vec::new(),
            token,
        }
    }

    /// Append a module.
    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// Append several modules in order.
    pub fn modules(mut self, modules: impl IntoIterator<Item = Module>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Run modules in declared order, stopping at the first failure.
    ///
    /// Always returns the full report; modules after a failure are recorded
    /// as [`ModuleOutcome::NotRun`]. Use [`PipelineReport::to_result`] (or
    /// [`Pipeline::run`]) for the aggregate error.
    pub fn start(&self) -> PipelineReport {
        log::info!("pipeline '{}' starting ({} modules)", self.name, self.modules.len());
        let cache = Cache::new();
        let host_caches = HostCaches::new();

        let mut outcomes = Vec::with_capacity(self.modules.len());
        let mut stopped = false;
        for module in &self.modules {
            if stopped {
                outcomes.push((module.name.clone(), ModuleOutcome::NotRun));
                continue;
            }
            let outcome =
                match module.run(self.runtime.as_ref(), &cache, &host_caches, &self.token) {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_cancelled() => {
                        stopped = true;
                        ModuleOutcome::Cancelled
                    }
                    Err(e) => {
                        log::error!("pipeline '{}': module '{}' failed: {e}", self.name, module.name);
                        stopped = true;
                        ModuleOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };
            outcomes.push((module.name.clone(), outcome));
        }

        let report = PipelineReport {
            pipeline: self.name.clone(),
            outcomes,
        };
        log::info!(
            "pipeline '{}' finished (success: {})",
            self.name,
            report.is_success()
        );
        report
    }

    /// Run the pipeline and return the report, or the first failure.
    pub fn run(&self) -> Result<PipelineReport> {
        let report = self.start();
        report.to_result()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{HostSelector, RemoteTask, TaskContext};
    use crate::testutil::TestRuntime;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn runtime() -> Arc<TestRuntime> {
        Arc::new(TestRuntime::new(&[("n1", &["master", "worker"])]))
    }

    fn counting_module(name: &str, counter: Arc<AtomicU32>) -> Module {
        Module::new(name, "counts").task(RemoteTask::new(
            "T",
            "count",
            HostSelector::All,
            move |_: &TaskContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        ))
    }

    fn failing_module(name: &str) -> Module {
        Module::new(name, "fails").task(RemoteTask::new(
            "T",
            "fail",
            HostSelector::All,
            |_: &TaskContext| {
                Err(Error::Remote(sshkit::Error::CommandFailed {
                    exit_code: 1,
                    stderr: "broken mirror".into(),
                }))
            },
        ))
    }

    #[test]
    fn test_modules_run_in_order() {
        let rt = runtime();
        let a = Arc::new(AtomicU32::new(0));
        let b = Arc::new(AtomicU32::new(0));
        let pipeline = Pipeline::new("P", rt, CancelToken::new())
            .module(counting_module("A", a.clone()))
            .module(counting_module("B", b.clone()));

        let report = pipeline.run().unwrap();
        assert!(report.is_success());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_first_failure_skips_remaining_modules() {
        let rt = runtime();
        let after = Arc::new(AtomicU32::new(0));
        let pipeline = Pipeline::new("P", rt, CancelToken::new())
            .module(failing_module("Repo"))
            .module(counting_module("Binaries", after.clone()));

        let report = pipeline.start();
        assert!(!report.is_success());
        assert!(matches!(
            report.outcome_for("Repo"),
            Some(ModuleOutcome::Failed { .. })
        ));
        assert_eq!(report.outcome_for("Binaries"), Some(&ModuleOutcome::NotRun));
        assert_eq!(after.load(Ordering::SeqCst), 0);

        let err = report.to_result().unwrap_err();
        assert!(matches!(err, Error::PipelineFailed { ref module, .. } if module == "Repo"));
    }

    #[test]
    fn test_failure_message_carries_task_error() {
        let rt = runtime();
        let pipeline =
            Pipeline::new("P", rt, CancelToken::new()).module(failing_module("Repo"));
        let report = pipeline.start();
        let (_, message) = report.first_failure().unwrap();
        assert!(message.contains("broken mirror"));
    }

    #[test]
    fn test_skipped_module_counts_as_success() {
        let rt = runtime();
        let pipeline = Pipeline::new("P", rt, CancelToken::new())
            .module(Module::new("S", "skipped").skip(true));
        let report = pipeline.run().unwrap();
        assert_eq!(report.outcome_for("S"), Some(&ModuleOutcome::Skipped));
    }

    #[test]
    fn test_cancelled_pipeline_reports_cancelled() {
        let rt = runtime();
        let token = CancelToken::new();
        token.cancel();
        let pipeline = Pipeline::new("P", rt, token)
            .module(Module::new("M", "never runs").task(RemoteTask::new(
                "T",
                "noop",
                HostSelector::All,
                |_: &TaskContext| Ok(()),
            )));
        let report = pipeline.start();
        assert_eq!(report.outcome_for("M"), Some(&ModuleOutcome::Cancelled));
        assert!(matches!(report.to_result(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_rerun_on_converged_inventory_is_clean() {
        // Prepare predicates make reruns no-ops: the second invocation must
        // not dispatch any remote commands.
        let rt = runtime();
        let transport = rt.transport().clone();
        // Marker absent on the first probe, present ever after.
        transport.respond_times("test -e '/etc/converged'", 1, "", "", 1);
        transport.respond("test -e '/etc/converged'", 0, "", "");

        let build = |rt: Arc<TestRuntime>| {
            Pipeline::new("P", rt, CancelToken::new()).module(
                Module::new("M", "idempotent").task(
                    RemoteTask::new(
                        "T",
                        "writes a marker",
                        HostSelector::All,
                        |ctx: &TaskContext| {
                            ctx.runner.cmd("touch /etc/converged", true)?;
                            Ok(())
                        },
                    )
                    .prepare(|ctx: &TaskContext| {
                        Ok(!ctx.runner.file_exist(std::path::Path::new("/etc/converged"))?)
                    }),
                ),
            )
        };

        build(rt.clone()).run().unwrap();
        transport.clear_recordings();

        build(rt).run().unwrap();
        let commands = transport.commands();
        // Only the existence probe may run; no mutation is dispatched.
        assert_eq!(commands.len(), 1);
        assert!(commands[0].command.contains("test -e"));
    }
}

//! The reconciliation adapter: per-host state machine and condition writes.
//!
//! One reconcile drives one machine one step: it assembles a pipeline from
//! the distribution's phase descriptors, runs it, and folds the per-module
//! outcomes into condition writes. A phase whose condition is already True
//! is skipped outright, so reconciles resume at the first non-True
//! condition. Pipeline errors are caught at phase boundaries; a failed
//! phase never aborts later reconciles.

pub mod descriptor;

pub use descriptor::{PhaseDescriptor, descriptors_for, reason};

use crate::cluster::ClusterDeclaration;
use crate::error::Result;
use crate::inventory::Inventory;
use crate::machine::{Conditions, ConditionType, Machine, MachineState};
use crate::modules;
use crate::service::{ArtifactSource, BootstrapDataProvider};
use conveyor::{HostSelector, Module, ModuleOutcome, Pipeline, Runtime};
use sshkit::CancelToken;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on network-heavy phase operations.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// What one reconcile pass achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Every phase condition is True; the machine converged
    Converged,
    /// A phase failed; conditions carry the detail, try again next cycle
    PhaseFailed,
    /// Deletion cleanup finished; the owning controller may finalize
    Finalize,
}

/// Wrap a plain success/failure body in a condition write.
///
/// The body knows nothing about conditions: on success the bit goes True,
/// on failure it goes False with the descriptor's reason and severity and
/// the error text as message. Cancellation passes through without touching
/// the condition. A bit that is already True makes the whole call a no-op.
pub fn with_condition(
    conditions: &mut Conditions,
    descriptor: &PhaseDescriptor,
    body: impl FnOnce() -> Result<()>,
) -> Result<()> {
    if conditions.is_true(descriptor.condition) {
        return Ok(());
    }
    match body() {
        Ok(()) => {
            conditions.mark_true(descriptor.condition);
            Ok(())
        }
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            conditions.mark_false(
                descriptor.condition,
                descriptor.failure_reason,
                descriptor.severity,
                e.to_string(),
            );
            Err(e)
        }
    }
}

/// Drives declarative machines through the install phases.
pub struct Reconciler {
    inventory: Arc<Inventory>,
    decl: Arc<ClusterDeclaration>,
    source: Arc<dyn ArtifactSource>,
    provider: Arc<dyn BootstrapDataProvider>,
    wait_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        inventory: Arc<Inventory>,
        decl: Arc<ClusterDeclaration>,
        source: Arc<dyn ArtifactSource>,
        provider: Arc<dyn BootstrapDataProvider>,
    ) -> Self {
        Self {
            inventory,
            decl,
            source,
            provider,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Override the bound on network-heavy operations.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// One reconcile pass over one machine.
    pub fn reconcile(&self, machine: &mut Machine, token: &CancelToken) -> Result<ReconcileOutcome> {
        if machine.is_deleting() {
            return self.reconcile_delete(machine, token);
        }

        // A Failed machine re-enters Bootstrapping on the next reconcile;
        // phases whose conditions are already True stay no-ops.
        if matches!(
            machine.status.state,
            MachineState::Pending | MachineState::Failed
        ) {
            machine.status.state = MachineState::Bootstrapping;
        }

        // Reachability gate. No condition bit: an unreachable host is
        // surfaced as a reconcile error and retried by the controller.
        self.ping(machine, token)?;

        let descriptors = descriptors_for(machine.spec.distribution);
        let report = self.phase_pipeline(machine, &descriptors, token).start();

        let mut failed = false;
        for descriptor in &descriptors {
            match report.outcome_for(descriptor.module) {
                Some(ModuleOutcome::Succeeded) => {
                    machine.status.conditions.mark_true(descriptor.condition);
                }
                Some(ModuleOutcome::Failed { error }) => {
                    log::warn!(
                        "machine {}: phase '{}' failed: {error}",
                        machine.name(),
                        descriptor.module
                    );
                    machine.status.conditions.mark_false(
                        descriptor.condition,
                        descriptor.failure_reason,
                        descriptor.severity,
                        error.clone(),
                    );
                    failed = true;
                }
                Some(ModuleOutcome::Cancelled) => {
                    // Surfaced as-is; no condition update.
                    return Err(conveyor::Error::Cancelled.into());
                }
                // Skipped: condition already True. NotRun: a phase before
                // this one failed; leave the bit untouched this cycle.
                Some(ModuleOutcome::Skipped) | Some(ModuleOutcome::NotRun) | None => {}
            }
        }

        if failed {
            machine.status.state = MachineState::Failed;
            return Ok(ReconcileOutcome::PhaseFailed);
        }

        machine.status.state = MachineState::Running;
        machine.status.conditions.mark_true(ConditionType::Ready);
        machine.status.state = MachineState::Succeeded;
        log::info!("machine {} converged", machine.name());
        Ok(ReconcileOutcome::Converged)
    }

    fn reconcile_delete(&self, machine: &mut Machine, token: &CancelToken) -> Result<ReconcileOutcome> {
        machine.status.state = MachineState::Cleaning;
        log::info!("machine {}: deleting bootstrap", machine.name());

        let runtime: Arc<dyn Runtime> = self.inventory.clone();
        let pipeline = Pipeline::new(
            format!("delete-{}", machine.name()),
            runtime,
            token.clone(),
        )
        .module(modules::deletion_module(
            self.decl.clone(),
            self.selector(machine),
        ));

        with_condition(&mut machine.status.conditions, &descriptor::DELETION, || {
            pipeline.run()?;
            Ok(())
        })?;
        Ok(ReconcileOutcome::Finalize)
    }

    fn ping(&self, machine: &Machine, token: &CancelToken) -> Result<()> {
        let runner = self.inventory.runner(&machine.spec.host, token);
        runner.ping()?;
        Ok(())
    }

    fn selector(&self, machine: &Machine) -> HostSelector {
        HostSelector::Names(vec![machine.name().to_string()])
    }

    /// Assemble the per-reconcile pipeline: one module per phase, each
    /// skipped outright when its condition bit is already True.
    fn phase_pipeline(
        &self,
        machine: &Machine,
        descriptors: &[PhaseDescriptor],
        token: &CancelToken,
    ) -> Pipeline {
        let runtime: Arc<dyn Runtime> = self.inventory.clone();
        let mut pipeline = Pipeline::new(
            format!("reconcile-{}", machine.name()),
            runtime,
            token.clone(),
        );
        for descriptor in descriptors {
            let module = self
                .build_module(descriptor.module, self.selector(machine))
                .skip(machine.status.conditions.is_true(descriptor.condition));
            pipeline = pipeline.module(module);
        }
        pipeline
    }

    fn build_module(&self, name: &str, hosts: HostSelector) -> Module {
        match name {
            modules::BOOTSTRAP_MODULE => modules::bootstrap_module(self.decl.clone(), hosts),
            modules::REPOSITORY_MODULE => {
                modules::repository_module(self.decl.clone(), hosts, self.wait_timeout)
            }
            modules::BINARIES_MODULE => modules::binaries_module(
                self.decl.clone(),
                self.source.clone(),
                hosts,
                self.wait_timeout,
            ),
            modules::CONTAINER_MODULE => {
                modules::container_module(self.decl.clone(), hosts, self.wait_timeout)
            }
            modules::PROVISIONING_MODULE => {
                modules::provisioning_module(self.provider.clone(), hosts)
            }
            other => unreachable!("unknown phase module '{other}'"),
        }
    }
}

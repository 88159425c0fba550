//! Caller-facing pipeline compositions.
//!
//! One pipeline per cluster operation, built from the same phase modules
//! the reconciler uses. Node-facing phases target the master and worker
//! roles; bootstrap targets everything in the inventory, registry and etcd
//! hosts included.

use crate::cluster::ClusterDeclaration;
use crate::inventory::{Inventory, Role};
use crate::modules;
use crate::service::{ArtifactSource, BootstrapDataProvider};
use conveyor::{HostSelector, Pipeline, Runtime};
use sshkit::CancelToken;
use std::sync::Arc;
use std::time::Duration;

fn node_roles() -> HostSelector {
    HostSelector::Roles(vec![
        Role::Master.as_str().to_string(),
        Role::Worker.as_str().to_string(),
    ])
}

/// Bring every inventory host into a running cluster.
pub fn install_pipeline(
    inventory: Arc<Inventory>,
    decl: Arc<ClusterDeclaration>,
    source: Arc<dyn ArtifactSource>,
    provider: Arc<dyn BootstrapDataProvider>,
    wait_timeout: Duration,
    token: CancelToken,
) -> Pipeline {
    let runtime: Arc<dyn Runtime> = inventory;
    Pipeline::new("InstallCluster", runtime, token)
        .module(modules::bootstrap_module(decl.clone(), HostSelector::All))
        .module(modules::repository_module(
            decl.clone(),
            HostSelector::All,
            wait_timeout,
        ))
        .module(modules::status_module(
            decl.clone(),
            HostSelector::Roles(vec![Role::Master.as_str().to_string()]),
        ))
        .module(modules::binaries_module(
            decl.clone(),
            source,
            node_roles(),
            wait_timeout,
        ))
        .module(modules::container_module(
            decl,
            node_roles(),
            wait_timeout,
        ))
        .module(modules::provisioning_module(provider, node_roles()))
}

/// Join additional hosts to an existing cluster. Identical module order to
/// install; idempotent tasks make already-converged hosts no-ops.
pub fn add_nodes_pipeline(
    inventory: Arc<Inventory>,
    decl: Arc<ClusterDeclaration>,
    source: Arc<dyn ArtifactSource>,
    provider: Arc<dyn BootstrapDataProvider>,
    wait_timeout: Duration,
    token: CancelToken,
) -> Pipeline {
    let mut pipeline =
        install_pipeline(inventory, decl, source, provider, wait_timeout, token);
    pipeline.name = "AddNodes".to_string();
    pipeline
}

/// Undo the bootstrap on every inventory host.
pub fn delete_pipeline(
    inventory: Arc<Inventory>,
    decl: Arc<ClusterDeclaration>,
    token: CancelToken,
) -> Pipeline {
    let runtime: Arc<dyn Runtime> = inventory;
    Pipeline::new("DeleteCluster", runtime, token)
        .module(modules::deletion_module(decl, HostSelector::All))
}

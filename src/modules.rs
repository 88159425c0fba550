//! Phase modules: the conveyor modules each install phase is built from.
//!
//! Builders take a host selector so the same module serves both the
//! caller-facing cluster pipelines (role selectors) and the per-host
//! reconcile pipelines (a single named host).

use crate::cluster::{ClusterDeclaration, Distribution};
use crate::context::{ClusterStatus, ProvisionContext};
use crate::service::binary::manifest_for;
use crate::service::{
    ArtifactSource, BinaryService, BootstrapDataProvider, BootstrapService,
    ContainerManagerService, ProvisioningService, RepositoryService,
};
use conveyor::{HostSelector, Module, RemoteTask, TaskContext};
use std::sync::Arc;
use std::time::Duration;

/// Module names, shared with the reconcile phase descriptors.
pub const BOOTSTRAP_MODULE: &str = "BootstrapOS";
pub const REPOSITORY_MODULE: &str = "InitRepository";
pub const STATUS_MODULE: &str = "ClusterStatus";
pub const BINARIES_MODULE: &str = "NodeBinaries";
pub const CONTAINER_MODULE: &str = "InstallContainerRuntime";
pub const PROVISIONING_MODULE: &str = "Provision";
pub const DELETION_MODULE: &str = "ClearEnvironment";

/// OS preparation: users, hostname, directories, scratch reset, init script.
pub fn bootstrap_module(decl: Arc<ClusterDeclaration>, hosts: HostSelector) -> Module {
    Module::new(BOOTSTRAP_MODULE, "Prepare the operating system").task(
        RemoteTask::new(
            "InitOS",
            "Add users, set hostname, create directories, run the init script",
            hosts,
            move |ctx: &TaskContext| {
                BootstrapService::new(ctx.runner.as_ref(), &decl, ctx.host)
                    .bootstrap()
                    .map_err(conveyor::Error::from)
            },
        )
        .parallel()
        .retry(1),
    )
}

/// Package repository: probe the manager, stage/mount the offline ISO,
/// install prerequisite packages.
pub fn repository_module(
    decl: Arc<ClusterDeclaration>,
    hosts: HostSelector,
    wait_timeout: Duration,
) -> Module {
    Module::new(REPOSITORY_MODULE, "Prepare the package repository").task(
        RemoteTask::new(
            "InstallPackages",
            "Probe the package manager and install prerequisite packages",
            hosts,
            move |ctx: &TaskContext| {
                let svc = RepositoryService::new(ctx.runner.as_ref(), &decl);
                let pm = svc.check().map_err(conveyor::Error::from)?;
                svc.get(wait_timeout).map_err(conveyor::Error::from)?;
                svc.with_mounted_iso(|| svc.update_and_install(pm))
                    .map_err(conveyor::Error::from)
            },
        )
        .parallel()
        .retry(1),
    )
}

/// Cluster status: snapshot whether a cluster already exists behind the
/// control-plane hosts, so later modules can adapt to joins vs fresh
/// installs.
pub fn status_module(decl: Arc<ClusterDeclaration>, hosts: HostSelector) -> Module {
    Module::new(STATUS_MODULE, "Snapshot the existing cluster, if any").task(RemoteTask::new(
        "GetClusterStatus",
        "Probe the agent service and harvest the join token",
        hosts,
        move |ctx: &TaskContext| {
            let provision = ProvisionContext::new(ctx.pipeline_cache);
            // First control-plane host to find a cluster wins; the task is
            // sequential so later hosts see the published snapshot.
            if provision
                .cluster_status()
                .map_err(conveyor::Error::from)?
                .is_some_and(|s| s.cluster_exists)
            {
                return Ok(());
            }

            let service_path = match decl.distribution {
                Distribution::K3s => "/etc/systemd/system/k3s.service",
                Distribution::Kubernetes => "/etc/kubernetes/admin.conf",
            };
            let exists = ctx
                .runner
                .file_exist(std::path::Path::new(service_path))?;

            let mut status = ClusterStatus {
                cluster_exists: exists,
                ..Default::default()
            };
            if exists && decl.distribution == Distribution::K3s {
                status.node_token = ctx
                    .runner
                    .sudo_cmd("cat /var/lib/rancher/k3s/server/node-token", true)
                    .ok()
                    .map(|t| t.trim().to_string());
            }
            provision
                .set_cluster_status(&status)
                .map_err(conveyor::Error::from)
        },
    ))
}

/// Cluster binaries: publish the per-arch manifest, then download and place
/// the binaries on each host.
pub fn binaries_module(
    decl: Arc<ClusterDeclaration>,
    source: Arc<dyn ArtifactSource>,
    hosts: HostSelector,
    wait_timeout: Duration,
) -> Module {
    let plan_decl = decl.clone();
    Module::new(BINARIES_MODULE, "Download and place cluster binaries")
        .task(RemoteTask::new(
            "PlanBinaries",
            "Publish the binaries manifest per architecture",
            hosts.clone(),
            move |ctx: &TaskContext| {
                let provision = ProvisionContext::new(ctx.pipeline_cache);
                if !provision.has_binaries_manifest(&ctx.host.arch) {
                    let manifest = manifest_for(source.as_ref(), &plan_decl, &ctx.host.arch);
                    provision
                        .set_binaries_manifest(&ctx.host.arch, &manifest)
                        .map_err(conveyor::Error::from)?;
                }
                Ok(())
            },
        ))
        .task(
            RemoteTask::new(
                "SyncBinaries",
                "Download binaries onto each node",
                hosts,
                move |ctx: &TaskContext| {
                    let provision = ProvisionContext::new(ctx.pipeline_cache);
                    let manifest = provision
                        .binaries_manifest(&ctx.host.arch)
                        .map_err(conveyor::Error::from)?;
                    BinaryService::new(ctx.runner.as_ref(), &manifest, decl.tmp_dir())
                        .download(wait_timeout)
                        .map_err(conveyor::Error::from)
                },
            )
            .parallel()
            .retry(2),
        )
}

/// Container runtime: record an existing runtime, install the declared one
/// where nothing is running. Skipped entirely for distributions that embed
/// their runtime.
pub fn container_module(
    decl: Arc<ClusterDeclaration>,
    hosts: HostSelector,
    wait_timeout: Duration,
) -> Module {
    let skip = decl.distribution.embeds_container_runtime();
    let detect_decl = decl.clone();
    let install_decl = decl.clone();
    Module::new(CONTAINER_MODULE, "Install the container runtime")
        .skip(skip)
        .task(
            RemoteTask::new(
                "DetectRuntime",
                "Record any container runtime already running",
                hosts.clone(),
                move |ctx: &TaskContext| {
                    let svc = ContainerManagerService::new(ctx.runner.as_ref(), &detect_decl);
                    let existing = svc.detect().map_err(conveyor::Error::from)?;
                    if let Some(runtime) = existing {
                        log::info!(
                            "[{}] container runtime {runtime} already present, skipping install",
                            ctx.host.name
                        );
                    }
                    ctx.host_cache.set("existing-runtime", existing)?;
                    Ok(())
                },
            )
            .parallel(),
        )
        .task(
            RemoteTask::new(
                "InstallRuntime",
                "Fetch and install the declared runtime",
                hosts,
                move |ctx: &TaskContext| {
                    let svc = ContainerManagerService::new(ctx.runner.as_ref(), &install_decl);
                    svc.get(&ctx.host.arch, wait_timeout)
                        .map_err(conveyor::Error::from)?;
                    svc.install(&ctx.host.arch).map_err(conveyor::Error::from)
                },
            )
            .prepare(|ctx: &TaskContext| {
                Ok(ctx
                    .host_cache
                    .get::<Option<String>>("existing-runtime")?
                    .flatten()
                    .is_none())
            })
            .parallel()
            .retry(2),
        )
}

/// Provisioning: run each node's bootstrap payload in order.
pub fn provisioning_module(
    provider: Arc<dyn BootstrapDataProvider>,
    hosts: HostSelector,
) -> Module {
    Module::new(PROVISIONING_MODULE, "Run the bootstrap payload").task(RemoteTask::new(
        "RunBootstrapPayload",
        "Transform the payload into sudo commands and run them",
        hosts,
        move |ctx: &TaskContext| {
            let (data, format) = provider
                .bootstrap_data(&ctx.host.name)
                .map_err(conveyor::Error::from)?;
            ProvisioningService::new(ctx.runner.as_ref())
                .provision(&data, format)
                .map_err(conveyor::Error::from)
        },
    ))
}

/// Deletion-time cleanup: the five teardown sub-steps.
pub fn deletion_module(decl: Arc<ClusterDeclaration>, hosts: HostSelector) -> Module {
    Module::new(DELETION_MODULE, "Undo the bootstrap").task(
        RemoteTask::new(
            "ResetNode",
            "Reset the cluster agent, network, files, units and runtimes",
            hosts,
            move |ctx: &TaskContext| {
                let svc = BootstrapService::new(ctx.runner.as_ref(), &decl, ctx.host);
                svc.reset_cluster_agent(decl.container_manager.socket())
                    .map_err(conveyor::Error::from)?;
                svc.reset_network().map_err(conveyor::Error::from)?;
                svc.remove_files().map_err(conveyor::Error::from)?;
                svc.daemon_reload().map_err(conveyor::Error::from)?;
                svc.uninstall_k3s().map_err(conveyor::Error::from)
            },
        )
        .parallel(),
    )
}

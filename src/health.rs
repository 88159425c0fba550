//! Best-effort observability passes over an existing cluster.
//!
//! Both passes are read-only against the workload cluster and never return
//! probe trouble as an error: failure to inspect yields Unknown conditions
//! and the pass moves on. Aggregation to the cluster-level conditions
//! follows severity dominance: errors over warnings over info over true
//! over unknown.

use crate::error::Result;
use crate::machine::{
    Condition, ConditionStatus, ConditionType, Conditions, Machine, Severity, aggregate,
};

/// Reason codes written by the health passes.
pub mod reason {
    pub const POD_INSPECTION_FAILED: &str = "PodInspectionFailed";
    pub const POD_MISSING: &str = "PodMissing";
    pub const POD_FAILED: &str = "PodFailed";
    pub const NODE_NOT_READY: &str = "NodeNotReady";
    pub const DELETING: &str = "Deleting";
    pub const CONTROL_PLANE_UNHEALTHY: &str = "ControlPlaneComponentsUnhealthy";
    pub const CONTROL_PLANE_UNKNOWN: &str = "ControlPlaneComponentsUnknown";
    pub const CONTROL_PLANE_INSPECTION_FAILED: &str = "ControlPlaneComponentsInspectionFailed";
    pub const ETCD_MEMBER_INSPECTION_FAILED: &str = "EtcdMemberInspectionFailed";
    pub const ETCD_MEMBER_UNHEALTHY: &str = "EtcdMemberUnhealthy";
    pub const ETCD_CLUSTER_UNHEALTHY: &str = "EtcdClusterUnhealthy";
    pub const ETCD_CLUSTER_UNKNOWN: &str = "EtcdClusterUnknown";
    pub const ETCD_CLUSTER_INSPECTION_FAILED: &str = "EtcdClusterInspectionFailed";
}

/// One control-plane node as the workload cluster reports it.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// Whether the node's Ready condition is True
    pub ready: bool,
    /// Whether the node carries the unreachable taint
    pub unreachable: bool,
}

/// Lists the control-plane nodes of the workload cluster.
pub trait NodeLister: Send + Sync {
    fn control_plane_nodes(&self) -> Result<Vec<NodeInfo>>;
}

/// Probes datastore-member liveness per control-plane node.
pub trait MemberProber: Send + Sync {
    fn member_healthy(&self, node: &str) -> Result<bool>;
}

fn machine_for_node<'a>(machines: &'a mut [Machine], node: &str) -> Option<&'a mut Machine> {
    machines
        .iter_mut()
        .find(|m| m.status.node_ref.as_deref() == Some(node))
}

fn has_provisioning_machine(machines: &[Machine]) -> bool {
    machines.iter().any(|m| m.status.node_ref.is_none())
}

/// Update per-machine and cluster-level agent health.
///
/// Best effort: when the node list itself cannot be fetched, every machine
/// and the cluster condition go Unknown and the pass returns.
pub fn update_agent_conditions(
    cluster: &mut Conditions,
    machines: &mut [Machine],
    lister: &dyn NodeLister,
) {
    let nodes = match lister.control_plane_nodes() {
        Ok(nodes) => nodes,
        Err(e) => {
            for machine in machines.iter_mut() {
                machine.status.conditions.mark_unknown(
                    ConditionType::MachineAgentHealthy,
                    reason::POD_INSPECTION_FAILED,
                    "Failed to get the node which is hosting this component",
                );
            }
            cluster.mark_unknown(
                ConditionType::ControlPlaneComponentsHealthy,
                reason::CONTROL_PLANE_INSPECTION_FAILED,
                format!("Failed to list nodes which are hosting control plane components: {e}"),
            );
            return;
        }
    };

    let mut cluster_errors = Vec::new();

    for node in &nodes {
        let Some(machine) = machine_for_node(machines, &node.name) else {
            // A machine still provisioning may claim this node soon;
            // otherwise the node is unaccounted for and the error belongs
            // at cluster level.
            if !has_provisioning_machine(machines) {
                cluster_errors.push(format!(
                    "control plane node {} does not have a corresponding machine",
                    node.name
                ));
            }
            continue;
        };

        if machine.is_deleting() {
            machine.status.conditions.mark_false(
                ConditionType::MachineAgentHealthy,
                reason::DELETING,
                Severity::Info,
                "",
            );
            continue;
        }

        if node.unreachable {
            // Unreachable is assumed temporary; health checking elsewhere
            // decides whether the node is actually unhealthy.
            machine.status.conditions.mark_unknown(
                ConditionType::MachineAgentHealthy,
                reason::POD_INSPECTION_FAILED,
                "Node is unreachable",
            );
            continue;
        }

        if node.ready {
            machine
                .status
                .conditions
                .mark_true(ConditionType::MachineAgentHealthy);
        } else {
            machine.status.conditions.mark_false(
                ConditionType::MachineAgentHealthy,
                reason::NODE_NOT_READY,
                Severity::Warning,
                format!("Node {} Ready condition is not True", node.name),
            );
        }
    }

    // A provisioned machine whose node has vanished is a hard failure.
    for machine in machines.iter_mut() {
        let Some(node_ref) = machine.status.node_ref.clone() else {
            continue;
        };
        if !nodes.iter().any(|n| n.name == node_ref) {
            machine.status.conditions.mark_false(
                ConditionType::MachineAgentHealthy,
                reason::POD_FAILED,
                Severity::Error,
                "Missing node",
            );
        }
    }

    aggregate_to_cluster(
        cluster,
        machines,
        ConditionType::MachineAgentHealthy,
        ConditionType::ControlPlaneComponentsHealthy,
        reason::CONTROL_PLANE_UNHEALTHY,
        reason::CONTROL_PLANE_UNKNOWN,
        &cluster_errors,
        "control plane",
    );
}

/// Update per-machine and cluster-level datastore-member health.
///
/// Only distributions with an embedded datastore have members to probe;
/// the pass is a no-op otherwise. Probe failure yields Unknown for the
/// machine, never an error.
pub fn update_member_conditions(
    cluster: &mut Conditions,
    machines: &mut [Machine],
    lister: &dyn NodeLister,
    prober: &dyn MemberProber,
) {
    if !machines
        .iter()
        .any(|m| m.spec.distribution.has_embedded_datastore())
    {
        return;
    }

    let nodes = match lister.control_plane_nodes() {
        Ok(nodes) => nodes,
        Err(e) => {
            for machine in machines.iter_mut() {
                machine.status.conditions.mark_unknown(
                    ConditionType::MachineEtcdMemberHealthy,
                    reason::ETCD_MEMBER_INSPECTION_FAILED,
                    "Failed to get the node which is hosting the etcd member",
                );
            }
            cluster.mark_unknown(
                ConditionType::EtcdClusterHealthy,
                reason::ETCD_CLUSTER_INSPECTION_FAILED,
                format!("Failed to list nodes which are hosting the etcd members: {e}"),
            );
            return;
        }
    };

    for node in &nodes {
        let Some(machine) = machine_for_node(machines, &node.name) else {
            continue;
        };

        if machine.is_deleting() {
            machine.status.conditions.mark_false(
                ConditionType::MachineEtcdMemberHealthy,
                reason::DELETING,
                Severity::Info,
                "",
            );
            continue;
        }

        match prober.member_healthy(&node.name) {
            Ok(true) => machine
                .status
                .conditions
                .mark_true(ConditionType::MachineEtcdMemberHealthy),
            Ok(false) => machine.status.conditions.mark_false(
                ConditionType::MachineEtcdMemberHealthy,
                reason::ETCD_MEMBER_UNHEALTHY,
                Severity::Warning,
                format!("etcd member on node {} is not healthy", node.name),
            ),
            Err(e) => machine.status.conditions.mark_unknown(
                ConditionType::MachineEtcdMemberHealthy,
                reason::ETCD_MEMBER_INSPECTION_FAILED,
                format!("Failed to probe the etcd member: {e}"),
            ),
        }
    }

    aggregate_to_cluster(
        cluster,
        machines,
        ConditionType::MachineEtcdMemberHealthy,
        ConditionType::EtcdClusterHealthy,
        reason::ETCD_CLUSTER_UNHEALTHY,
        reason::ETCD_CLUSTER_UNKNOWN,
        &[],
        "etcd",
    );
}

/// Fold per-machine conditions into one cluster-level condition.
///
/// Severity dominance applies; extra cluster-level errors (nodes without
/// machines) count as errors. A machine appears in at most the group of its
/// highest severity.
#[allow(clippy::too_many_arguments)]
fn aggregate_to_cluster(
    cluster: &mut Conditions,
    machines: &[Machine],
    machine_condition: ConditionType,
    cluster_condition: ConditionType,
    unhealthy_reason: &str,
    unknown_reason: &str,
    extra_errors: &[String],
    note: &str,
) {
    let entries: Vec<&Condition> = machines
        .iter()
        .filter_map(|m| m.status.conditions.get(machine_condition))
        .collect();

    let names_with = |predicate: &dyn Fn(&Condition) -> bool| -> Vec<&str> {
        machines
            .iter()
            .filter(|m| {
                m.status
                    .conditions
                    .get(machine_condition)
                    .is_some_and(predicate)
            })
            .map(|m| m.name())
            .collect()
    };

    let errors = names_with(&|c| {
        c.status == ConditionStatus::False && c.severity == Some(Severity::Error)
    });
    if !errors.is_empty() || !extra_errors.is_empty() {
        let mut messages: Vec<String> = extra_errors.to_vec();
        if !errors.is_empty() {
            messages.push(format!(
                "following machines are reporting {note} errors: {}",
                errors.join(", ")
            ));
        }
        cluster.mark_false(
            cluster_condition,
            unhealthy_reason,
            Severity::Error,
            messages.join("; "),
        );
        return;
    }

    match aggregate(entries.iter().copied()) {
        Some((ConditionStatus::False, Some(Severity::Warning))) => {
            let warnings = names_with(&|c| {
                c.status == ConditionStatus::False && c.severity == Some(Severity::Warning)
            });
            cluster.mark_false(
                cluster_condition,
                unhealthy_reason,
                Severity::Warning,
                format!(
                    "following machines are reporting {note} warnings: {}",
                    warnings.join(", ")
                ),
            );
        }
        Some((ConditionStatus::False, _)) => {
            // No errors, no warnings, some info. The original tested the
            // warnings set again here, which suppressed this branch
            // entirely; the info set is the one that matters.
            let infos = names_with(&|c| {
                c.status == ConditionStatus::False
                    && matches!(c.severity, Some(Severity::Info) | None)
            });
            cluster.mark_false(
                cluster_condition,
                unhealthy_reason,
                Severity::Info,
                format!(
                    "following machines are reporting {note} info: {}",
                    infos.join(", ")
                ),
            );
        }
        Some((ConditionStatus::True, _)) => cluster.mark_true(cluster_condition),
        Some((ConditionStatus::Unknown, _)) => {
            let unknowns = names_with(&|c| c.status == ConditionStatus::Unknown);
            cluster.mark_unknown(
                cluster_condition,
                unknown_reason,
                format!(
                    "following machines are reporting unknown {note} status: {}",
                    unknowns.join(", ")
                ),
            );
        }
        // No provisioned machines, so no condition at cluster level either.
        None => {}
    }
}

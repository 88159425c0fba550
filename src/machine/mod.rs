//! Declarative machine objects.
//!
//! A `Machine` is the per-host declarative resource the reconciliation
//! adapter drives: the spec names the desired configuration, the status
//! holds the state-machine position and the condition bits. Persistence
//! lives in the external object store; the engine only mutates the in-memory
//! object handed to it.

pub mod condition;

pub use condition::{
    Condition, ConditionStatus, ConditionType, Conditions, Severity, aggregate,
};

use crate::cluster::{ContainerManager, Distribution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sshkit::Host;
use std::collections::BTreeMap;

/// Annotation requesting a machine be picked first as deletion candidate.
pub const DELETE_MACHINE_ANNOTATION: &str = "capstan.dev/delete-machine";

/// Position in the per-host state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    /// Resource created, no work started
    Pending,
    /// OS preparation in progress
    Bootstrapping,
    /// Bootstrapping succeeded; steady-state
    Running,
    /// Deletion requested; undoing bootstrap
    Cleaning,
    /// Reached Running and reported Provisioned=True
    Succeeded,
    /// A phase exceeded its retry budget
    Failed,
}

/// Desired configuration for one machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSpec {
    /// Addressing, credentials, roles and arch
    pub host: Host,
    /// Distribution to install
    pub distribution: Distribution,
    /// Distribution version
    pub version: String,
    /// Runtime for distributions that need one
    pub container_manager: ContainerManager,
    /// Operator-defined spreading label (e.g. availability zone)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,
}

/// Observed state for one machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineStatus {
    /// State-machine position
    pub state: MachineState,
    /// Condition bits
    pub conditions: Conditions,
    /// Name of the cluster node this machine became, once joined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<String>,
}

/// The declarative resource for one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub spec: MachineSpec,
    pub status: MachineStatus,
    /// Free-form annotations (e.g. the delete-candidate marker)
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Creation timestamp, used for oldest-first candidate selection
    pub created: DateTime<Utc>,
    /// Set when deletion has been requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl Machine {
    /// Create a fresh Pending machine.
    pub fn new(
        host: Host,
        distribution: Distribution,
        version: impl Into<String>,
        container_manager: ContainerManager,
    ) -> Self {
        Self {
            spec: MachineSpec {
                host,
                distribution,
                version: version.into(),
                container_manager,
                failure_domain: None,
            },
            status: MachineStatus {
                state: MachineState::Pending,
                conditions: Conditions::new(),
                node_ref: None,
            },
            annotations: BTreeMap::new(),
            created: Utc::now(),
            deletion_timestamp: None,
        }
    }

    /// Set the failure domain.
    pub fn in_failure_domain(mut self, domain: impl Into<String>) -> Self {
        self.spec.failure_domain = Some(domain.into());
        self
    }

    /// The machine name (the host name).
    pub fn name(&self) -> &str {
        &self.spec.host.name
    }

    /// Whether deletion has been requested.
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Whether the operator marked this machine for deletion first.
    pub fn has_delete_annotation(&self) -> bool {
        self.annotations.contains_key(DELETE_MACHINE_ANNOTATION)
    }

    /// Request deletion.
    pub fn mark_for_deletion(&mut self) {
        self.deletion_timestamp = Some(Utc::now());
    }
}

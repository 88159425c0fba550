//! Phase-set descriptors.
//!
//! Each distribution contributes an ordered list of phase descriptors; the
//! adapter walks the list. Adding a distribution means registering a
//! descriptor list, not editing call sites.

use crate::cluster::Distribution;
use crate::machine::{ConditionType, Severity};
use crate::modules;

/// Stable reason codes written to False conditions.
pub mod reason {
    pub const INIT_OS_FAILED: &str = "InitOSFailed";
    pub const REPOSITORY_FAILED: &str = "RepositoryFailed";
    pub const GET_BINARY_FAILED: &str = "GetBinaryFailed";
    pub const INSTALL_CRI_FAILED: &str = "InstallCRIFailed";
    pub const RUN_CLOUD_CONFIG_FAILED: &str = "RunCloudConfigFailed";
    pub const CLEAR_ENVIRONMENT_FAILED: &str = "ClearEnvironmentFailed";
}

/// One install phase: which module realizes it, which condition bit it
/// flips, and how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDescriptor {
    /// Name of the conveyor module realizing the phase
    pub module: &'static str,
    /// Condition bit the phase owns
    pub condition: ConditionType,
    /// Stable reason code written on failure
    pub failure_reason: &'static str,
    /// Bootstrap and repository failures are often transient (bad mirror,
    /// slow DNS); the later phases usually need intervention.
    pub severity: Severity,
}

pub const BOOTSTRAP: PhaseDescriptor = PhaseDescriptor {
    module: modules::BOOTSTRAP_MODULE,
    condition: ConditionType::Bootstrapped,
    failure_reason: reason::INIT_OS_FAILED,
    severity: Severity::Warning,
};

pub const REPOSITORY: PhaseDescriptor = PhaseDescriptor {
    module: modules::REPOSITORY_MODULE,
    condition: ConditionType::RepositoryReady,
    failure_reason: reason::REPOSITORY_FAILED,
    severity: Severity::Warning,
};

pub const BINARIES: PhaseDescriptor = PhaseDescriptor {
    module: modules::BINARIES_MODULE,
    condition: ConditionType::BinariesReady,
    failure_reason: reason::GET_BINARY_FAILED,
    severity: Severity::Error,
};

pub const CONTAINER_MANAGER: PhaseDescriptor = PhaseDescriptor {
    module: modules::CONTAINER_MODULE,
    condition: ConditionType::CriReady,
    failure_reason: reason::INSTALL_CRI_FAILED,
    severity: Severity::Error,
};

pub const PROVISIONING: PhaseDescriptor = PhaseDescriptor {
    module: modules::PROVISIONING_MODULE,
    condition: ConditionType::Provisioned,
    failure_reason: reason::RUN_CLOUD_CONFIG_FAILED,
    severity: Severity::Error,
};

pub const DELETION: PhaseDescriptor = PhaseDescriptor {
    module: modules::DELETION_MODULE,
    condition: ConditionType::DeletingBootstrap,
    failure_reason: reason::CLEAR_ENVIRONMENT_FAILED,
    severity: Severity::Warning,
};

/// The ordered phase list for a distribution.
///
/// K3s-class distributions embed their runtime, so the container-manager
/// phase is absent from their list.
pub fn descriptors_for(distribution: Distribution) -> Vec<PhaseDescriptor> {
    let mut phases = vec![BOOTSTRAP, REPOSITORY, BINARIES];
    if !distribution.embeds_container_runtime() {
        phases.push(CONTAINER_MANAGER);
    }
    phases.push(PROVISIONING);
    phases
}

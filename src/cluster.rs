//! The desired-cluster declaration.
//!
//! Callers declare what to install; the engine never chooses a distribution
//! on its own. Concrete shell templates (init scripts, service units) are
//! opaque rendered inputs carried on the declaration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The flavour of Kubernetes being installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    /// Upstream Kubernetes
    Kubernetes,
    /// K3s-class distribution (embedded datastore and runtime)
    K3s,
}

impl Distribution {
    /// K3s-class distributions ship their own container runtime, so the
    /// container-manager phase is omitted for them.
    pub fn embeds_container_runtime(&self) -> bool {
        matches!(self, Distribution::K3s)
    }

    /// Whether the distribution runs an embedded datastore whose members
    /// the health pass probes.
    pub fn has_embedded_datastore(&self) -> bool {
        matches!(self, Distribution::K3s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Kubernetes => "kubernetes",
            Distribution::K3s => "k3s",
        }
    }
}

/// The container runtime to install for distributions that need one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerManager {
    Containerd,
    Docker,
}

impl ContainerManager {
    /// The CRI socket the runtime listens on.
    pub fn socket(&self) -> &'static str {
        match self {
            ContainerManager::Containerd => "unix:///run/containerd/containerd.sock",
            ContainerManager::Docker => "unix:///var/run/cri-dockerd.sock",
        }
    }

    /// The socket path probed to detect an existing runtime.
    pub fn socket_path(&self) -> &'static str {
        match self {
            ContainerManager::Containerd => "/run/containerd/containerd.sock",
            ContainerManager::Docker => "/var/run/docker.sock",
        }
    }

    /// The systemd unit name.
    pub fn service(&self) -> &'static str {
        match self {
            ContainerManager::Containerd => "containerd",
            ContainerManager::Docker => "docker",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.service()
    }
}

/// An operator-supplied `/etc/hosts` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcHostsEntry {
    /// The address the hostnames resolve to
    pub address: String,
    /// Hostnames mapped to the address
    pub hostnames: Vec<String>,
}

/// Desired configuration for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDeclaration {
    /// Cluster name
    pub name: String,
    /// Which distribution to install
    pub distribution: Distribution,
    /// Distribution version (e.g. "v1.29.2" or "v1.29.2+k3s1")
    pub version: String,
    /// Runtime for distributions that need one
    pub container_manager: ContainerManager,
    /// Optional registry mirror for image pulls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_mirror: Option<String>,
    /// Local path of an offline package ISO, when installing air-gapped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_path: Option<PathBuf>,
    /// Rendered OS init script, executed during bootstrap when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_script: Option<String>,
    /// Extra `/etc/hosts` entries injected on every host
    #[serde(default)]
    pub etc_hosts: Vec<EtcHostsEntry>,
}

impl ClusterDeclaration {
    pub fn new(
        name: impl Into<String>,
        distribution: Distribution,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            distribution,
            version: version.into(),
            container_manager: ContainerManager::Containerd,
            registry_mirror: None,
            iso_path: None,
            init_script: None,
            etc_hosts: Vec::new(),
        }
    }

    /// The per-host scratch directory, created and reset by bootstrap.
    pub fn tmp_dir(&self) -> &'static str {
        "/tmp/capstan"
    }

    /// The per-host work directory.
    pub fn work_dir(&self) -> &'static str {
        "/etc/capstan"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k3s_embeds_runtime() {
        assert!(Distribution::K3s.embeds_container_runtime());
        assert!(!Distribution::Kubernetes.embeds_container_runtime());
    }

    #[test]
    fn test_container_manager_sockets() {
        assert_eq!(
            ContainerManager::Containerd.socket_path(),
            "/run/containerd/containerd.sock"
        );
        assert_eq!(ContainerManager::Docker.service(), "docker");
    }
}

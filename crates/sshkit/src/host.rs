//! Remote host identity and credentials.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Authentication material for an SSH connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Auth {
    /// Password authentication
    Password(String),
    /// Public-key authentication with a private key file
    PrivateKey(PathBuf),
}

/// An addressable remote target.
///
/// Hosts are created at inventory load and are immutable during a pipeline
/// run. Roles are free-form strings at this layer; the orchestration layer
/// defines the closed role set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Unique name within the cluster
    pub name: String,
    /// Internal IPv4/IPv6 address
    pub address: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection user
    pub user: String,
    /// Authentication material
    pub auth: Auth,
    /// Password injected on the first sudo prompt, when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sudo_password: Option<String>,
    /// Role set (e.g. "master", "worker", "etcd", "registry")
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// CPU architecture tag (e.g. "amd64", "arm64")
    pub arch: String,
}

fn default_port() -> u16 {
    22
}

impl Host {
    /// Create a host with defaults (port 22, amd64, no roles).
    pub fn new(name: impl Into<String>, address: impl Into<String>, user: impl Into<String>, auth: Auth) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: default_port(),
            user: user.into(),
            auth,
            sudo_password: None,
            roles: BTreeSet::new(),
            arch: "amd64".to_string(),
        }
    }

    /// Add a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Set the architecture tag.
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Set the sudo password.
    pub fn with_sudo_password(mut self, password: impl Into<String>) -> Self {
        self.sudo_password = Some(password.into());
        self
    }

    /// Set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Whether the host carries the given role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// The `user@address` SSH destination.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host::new("n1", "10.0.0.1", "ubuntu", Auth::PrivateKey("/keys/id_ed25519".into()))
            .with_role("master")
            .with_role("etcd")
    }

    #[test]
    fn test_defaults() {
        let h = host();
        assert_eq!(h.port, 22);
        assert_eq!(h.arch, "amd64");
        assert!(h.sudo_password.is_none());
    }

    #[test]
    fn test_roles() {
        let h = host();
        assert!(h.has_role("master"));
        assert!(h.has_role("etcd"));
        assert!(!h.has_role("worker"));
    }

    #[test]
    fn test_destination() {
        assert_eq!(host().destination(), "ubuntu@10.0.0.1");
    }
}

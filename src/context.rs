//! Typed view over the pipeline cache.
//!
//! Cross-module handoffs flow through a small set of well-known values.
//! `ProvisionContext` gives them explicit, typed accessors so dependent
//! modules cannot misspell a key; raw [`Cache`] access stays available as
//! the escape hatch for task-suite-local values.

use crate::error::Result;
use conveyor::Cache;
use serde::{Deserialize, Serialize};

const KEY_BINARIES_PREFIX: &str = "binaries-manifest";
const KEY_CLUSTER_STATUS: &str = "cluster-status";
const KEY_REGISTRY_CERTS: &str = "registry-certs";

/// One downloadable cluster binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryArtifact {
    /// Logical name ("kubelet", "k3s", "helm", "kubecni", ...)
    pub name: String,
    /// Version string
    pub version: String,
    /// Architecture tag
    pub arch: String,
    /// Download URL
    pub url: String,
    /// Where the binary (or archive content) lands on the host
    pub install_path: String,
    /// Whether the artifact is an archive to unpack rather than a single
    /// executable
    pub archive: bool,
}

/// The per-architecture set of binaries one install needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinariesManifest {
    pub artifacts: Vec<BinaryArtifact>,
}

impl BinariesManifest {
    /// Look up an artifact by logical name.
    pub fn get(&self, name: &str) -> Option<&BinaryArtifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }
}

/// First-control-plane snapshot of an existing cluster, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// Whether an agent service was found on any control-plane host
    pub cluster_exists: bool,
    /// Running version, when detected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Join token, when harvested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_token: Option<String>,
}

/// Typed accessors over one pipeline cache.
pub struct ProvisionContext<'a> {
    cache: &'a Cache,
}

impl<'a> ProvisionContext<'a> {
    pub fn new(cache: &'a Cache) -> Self {
        Self { cache }
    }

    /// The raw cache, for task-suite-local keys.
    pub fn cache(&self) -> &Cache {
        self.cache
    }

    /// Publish the binaries manifest for `arch`.
    pub fn set_binaries_manifest(&self, arch: &str, manifest: &BinariesManifest) -> Result<()> {
        self.cache
            .set(&format!("{KEY_BINARIES_PREFIX}-{arch}"), manifest)?;
        Ok(())
    }

    /// The binaries manifest for `arch`, failing if never published.
    pub fn binaries_manifest(&self, arch: &str) -> Result<BinariesManifest> {
        Ok(self
            .cache
            .require(&format!("{KEY_BINARIES_PREFIX}-{arch}"))?)
    }

    /// Whether a manifest for `arch` has been published.
    pub fn has_binaries_manifest(&self, arch: &str) -> bool {
        self.cache.contains(&format!("{KEY_BINARIES_PREFIX}-{arch}"))
    }

    /// Publish the cluster status snapshot.
    pub fn set_cluster_status(&self, status: &ClusterStatus) -> Result<()> {
        self.cache.set(KEY_CLUSTER_STATUS, status)?;
        Ok(())
    }

    /// The cluster status snapshot, if a status pass ran.
    pub fn cluster_status(&self) -> Result<Option<ClusterStatus>> {
        Ok(self.cache.get(KEY_CLUSTER_STATUS)?)
    }

    /// Publish registry CA certificates (PEM).
    pub fn set_registry_certs(&self, pem: &[String]) -> Result<()> {
        self.cache.set(KEY_REGISTRY_CERTS, pem)?;
        Ok(())
    }

    /// Registry CA certificates, if published.
    pub fn registry_certs(&self) -> Result<Option<Vec<String>>> {
        Ok(self.cache.get(KEY_REGISTRY_CERTS)?)
    }
}

//! Cluster-binary placement.
//!
//! The artifact source is a contract: it resolves which binaries a
//! declaration needs for one architecture and where they come from.
//! Signature verification and caching live behind that contract; the
//! service only fetches within a bounded wait and installs into place.

use crate::cluster::{ClusterDeclaration, Distribution};
use crate::context::{BinariesManifest, BinaryArtifact};
use crate::error::Result;
use sshkit::{RemoteRunner, RunOptions};
use std::path::Path;
use std::time::Duration;

const HELM_VERSION: &str = "v3.14.2";
const CNI_PLUGINS_VERSION: &str = "v1.4.0";

/// Resolves the downloadable artifacts for one declaration.
pub trait ArtifactSource: Send + Sync {
    /// The artifacts `decl` needs on an `arch` host, in install order.
    fn artifacts(&self, decl: &ClusterDeclaration, arch: &str) -> Vec<BinaryArtifact>;
}

/// Artifact source pointing at the upstream release endpoints.
pub struct DefaultArtifactSource;

impl DefaultArtifactSource {
    fn kubernetes_binary(name: &str, version: &str, arch: &str) -> BinaryArtifact {
        BinaryArtifact {
            name: name.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
            url: format!("https://dl.k8s.io/release/{version}/bin/linux/{arch}/{name}"),
            install_path: format!("/usr/local/bin/{name}"),
            archive: false,
        }
    }

    fn helm(arch: &str) -> BinaryArtifact {
        BinaryArtifact {
            name: "helm".to_string(),
            version: HELM_VERSION.to_string(),
            arch: arch.to_string(),
            url: format!("https://get.helm.sh/helm-{HELM_VERSION}-linux-{arch}.tar.gz"),
            install_path: "/usr/local/bin/helm".to_string(),
            archive: true,
        }
    }

    fn cni_plugins(arch: &str) -> BinaryArtifact {
        BinaryArtifact {
            name: "kubecni".to_string(),
            version: CNI_PLUGINS_VERSION.to_string(),
            arch: arch.to_string(),
            url: format!(
                "https://github.com/containernetworking/plugins/releases/download/{CNI_PLUGINS_VERSION}/cni-plugins-linux-{arch}-{CNI_PLUGINS_VERSION}.tgz"
            ),
            install_path: "/opt/cni/bin".to_string(),
            archive: true,
        }
    }

    fn k3s(version: &str, arch: &str) -> BinaryArtifact {
        // Upstream ships the amd64 binary unsuffixed.
        let file = match arch {
            "amd64" => "k3s".to_string(),
            other => format!("k3s-{other}"),
        };
        BinaryArtifact {
            name: "k3s".to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
            url: format!(
                "https://github.com/k3s-io/k3s/releases/download/{}/{file}",
                version.replace('+', "%2B")
            ),
            install_path: "/usr/local/bin/k3s".to_string(),
            archive: false,
        }
    }
}

impl ArtifactSource for DefaultArtifactSource {
    fn artifacts(&self, decl: &ClusterDeclaration, arch: &str) -> Vec<BinaryArtifact> {
        match decl.distribution {
            Distribution::Kubernetes => vec![
                Self::kubernetes_binary("kubeadm", &decl.version, arch),
                Self::kubernetes_binary("kubelet", &decl.version, arch),
                Self::kubernetes_binary("kubectl", &decl.version, arch),
                Self::helm(arch),
                Self::cni_plugins(arch),
            ],
            Distribution::K3s => vec![
                Self::k3s(&decl.version, arch),
                Self::helm(arch),
                Self::cni_plugins(arch),
            ],
        }
    }
}

/// Build the manifest for one architecture.
pub fn manifest_for(
    source: &dyn ArtifactSource,
    decl: &ClusterDeclaration,
    arch: &str,
) -> BinariesManifest {
    BinariesManifest {
        artifacts: source.artifacts(decl, arch),
    }
}

/// Binary-phase operations against one host.
pub struct BinaryService<'a> {
    runner: &'a dyn RemoteRunner,
    manifest: &'a BinariesManifest,
    tmp_dir: &'a str,
}

impl<'a> BinaryService<'a> {
    pub fn new(runner: &'a dyn RemoteRunner, manifest: &'a BinariesManifest, tmp_dir: &'a str) -> Self {
        Self {
            runner,
            manifest,
            tmp_dir,
        }
    }

    /// Download and install every artifact within `timeout` each.
    ///
    /// Artifacts whose install path already exists are skipped, so a rerun
    /// after partial failure only fetches what is missing.
    pub fn download(&self, timeout: Duration) -> Result<()> {
        for artifact in &self.manifest.artifacts {
            if self.runner.file_exist(Path::new(&artifact.install_path))?
                && self.is_populated(artifact)?
            {
                log::debug!("binary {} already in place, skipping", artifact.name);
                continue;
            }
            self.fetch(artifact, timeout)?;
            self.install(artifact)?;
        }
        Ok(())
    }

    /// An archive's install path may exist as an empty directory; probe the
    /// representative file before skipping.
    fn is_populated(&self, artifact: &BinaryArtifact) -> Result<bool> {
        if !artifact.archive || artifact.name != "kubecni" {
            return Ok(true);
        }
        Ok(self
            .runner
            .file_exist(Path::new("/opt/cni/bin/bridge"))?)
    }

    fn staging_path(&self, artifact: &BinaryArtifact) -> String {
        let file = artifact.url.rsplit('/').next().unwrap_or(&artifact.name);
        format!("{}/{}", self.tmp_dir, file)
    }

    fn fetch(&self, artifact: &BinaryArtifact, timeout: Duration) -> Result<()> {
        let staging = self.staging_path(artifact);
        log::info!("downloading {} {} for {}", artifact.name, artifact.version, artifact.arch);
        self.runner.sudo_cmd_with(
            &format!("curl -L -sS -o {staging} {}", artifact.url),
            &RunOptions {
                quiet: false,
                timeout: Some(timeout),
            },
        )?;
        Ok(())
    }

    fn install(&self, artifact: &BinaryArtifact) -> Result<()> {
        let staging = self.staging_path(artifact);
        let command = if artifact.archive {
            match artifact.name.as_str() {
                "helm" => format!(
                    "tar -xzf {staging} -C {tmp} && install -m 0755 {tmp}/linux-{arch}/helm {path}",
                    tmp = self.tmp_dir,
                    arch = artifact.arch,
                    path = artifact.install_path,
                ),
                _ => format!(
                    "mkdir -p {path} && tar -xzf {staging} -C {path}",
                    path = artifact.install_path,
                ),
            }
        } else {
            format!("install -m 0755 {staging} {}", artifact.install_path)
        };
        self.runner.sudo_cmd(&command, true)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshkit::mock::MockTransport;
    use sshkit::{Auth, CancelToken, ExecutorPool, Host};
    use std::sync::Arc;

    fn decl(distribution: Distribution, version: &str) -> ClusterDeclaration {
        ClusterDeclaration::new("test", distribution, version)
    }

    #[test]
    fn test_kubernetes_artifact_set() {
        let manifest = manifest_for(
            &DefaultArtifactSource,
            &decl(Distribution::Kubernetes, "v1.29.2"),
            "amd64",
        );
        let names: Vec<&str> = manifest.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["kubeadm", "kubelet", "kubectl", "helm", "kubecni"]);
        assert_eq!(
            manifest.get("kubelet").unwrap().url,
            "https://dl.k8s.io/release/v1.29.2/bin/linux/amd64/kubelet"
        );
    }

    #[test]
    fn test_k3s_artifact_set_omits_kube_binaries() {
        let manifest = manifest_for(
            &DefaultArtifactSource,
            &decl(Distribution::K3s, "v1.29.2+k3s1"),
            "arm64",
        );
        let names: Vec<&str> = manifest.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["k3s", "helm", "kubecni"]);
        let k3s = manifest.get("k3s").unwrap();
        assert!(k3s.url.ends_with("/k3s-arm64"));
        assert!(k3s.url.contains("v1.29.2%2Bk3s1"));
    }

    #[test]
    fn test_download_skips_present_binaries() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("test -e", 0, "", "");
        let host = Host::new("n1", "10.0.0.1", "root", Auth::PrivateKey("/k".into()));
        let pool = ExecutorPool::new(transport.clone());
        let runner = pool.runner(&host, &CancelToken::new());

        let manifest = manifest_for(
            &DefaultArtifactSource,
            &decl(Distribution::Kubernetes, "v1.29.2"),
            "amd64",
        );
        BinaryService::new(runner.as_ref(), &manifest, "/tmp/capstan")
            .download(Duration::from_secs(600))
            .unwrap();

        let commands = transport.commands();
        assert!(commands.iter().all(|c| !c.command.contains("curl")));
    }

    #[test]
    fn test_download_fetches_missing_binaries() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("test -e", 1, "", "");
        let host = Host::new("n1", "10.0.0.1", "root", Auth::PrivateKey("/k".into()));
        let pool = ExecutorPool::new(transport.clone());
        let runner = pool.runner(&host, &CancelToken::new());

        let manifest = manifest_for(
            &DefaultArtifactSource,
            &decl(Distribution::K3s, "v1.29.2+k3s1"),
            "amd64",
        );
        BinaryService::new(runner.as_ref(), &manifest, "/tmp/capstan")
            .download(Duration::from_secs(600))
            .unwrap();

        let commands: Vec<String> = transport.commands().into_iter().map(|r| r.command).collect();
        assert_eq!(commands.iter().filter(|c| c.contains("curl")).count(), 3);
        assert!(commands.iter().any(|c| c.contains("install -m 0755 /tmp/capstan/k3s /usr/local/bin/k3s")));
        assert!(commands.iter().any(|c| c.contains("tar -xzf /tmp/capstan/cni-plugins-linux-amd64-v1.4.0.tgz -C /opt/cni/bin")));
    }
}

//! Container-runtime detection and install.

use crate::cluster::{ClusterDeclaration, ContainerManager};
use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sshkit::{RemoteRunner, RunOptions};
use std::path::Path;
use std::time::Duration;

const CONTAINERD_VERSION: &str = "1.7.13";
const RUNC_VERSION: &str = "v1.1.12";

/// Minimal unit written when the static archive ships none.
const CONTAINERD_UNIT: &str = "\
[Unit]
Description=containerd container runtime
After=network.target

[Service]
ExecStart=/usr/local/bin/containerd
Restart=always
Delegate=yes
KillMode=process

[Install]
WantedBy=multi-user.target
";

/// Container-manager-phase operations against one host.
pub struct ContainerManagerService<'a> {
    runner: &'a dyn RemoteRunner,
    decl: &'a ClusterDeclaration,
}

impl<'a> ContainerManagerService<'a> {
    pub fn new(runner: &'a dyn RemoteRunner, decl: &'a ClusterDeclaration) -> Self {
        Self { runner, decl }
    }

    /// Detect an already-running container runtime by its socket.
    ///
    /// Returns the runtime's type so the caller can record it; install is
    /// skipped when anything is found.
    pub fn detect(&self) -> Result<Option<&'static str>> {
        for manager in [ContainerManager::Containerd, ContainerManager::Docker] {
            if self
                .runner
                .file_exist(Path::new(manager.socket_path()))?
            {
                return Ok(Some(manager.as_str()));
            }
        }
        Ok(None)
    }

    fn archive_url(&self, arch: &str) -> String {
        match self.decl.container_manager {
            ContainerManager::Containerd => format!(
                "https://github.com/containerd/containerd/releases/download/v{CONTAINERD_VERSION}/containerd-{CONTAINERD_VERSION}-linux-{arch}.tar.gz"
            ),
            ContainerManager::Docker => format!(
                "https://download.docker.com/linux/static/stable/{}/docker-25.0.3.tgz",
                match arch {
                    "arm64" => "aarch64",
                    _ => "x86_64",
                }
            ),
        }
    }

    fn staging_path(&self) -> String {
        format!("{}/container-runtime.tgz", self.decl.tmp_dir())
    }

    /// Fetch the declared runtime's archive within `timeout`.
    pub fn get(&self, arch: &str, timeout: Duration) -> Result<()> {
        self.runner.sudo_cmd_with(
            &format!(
                "curl -L -sS -o {} {}",
                self.staging_path(),
                self.archive_url(arch)
            ),
            &RunOptions {
                quiet: false,
                timeout: Some(timeout),
            },
        )?;
        Ok(())
    }

    /// Unpack the runtime, place runc, write the service unit, enable it.
    pub fn install(&self, arch: &str) -> Result<()> {
        let staging = self.staging_path();
        match self.decl.container_manager {
            ContainerManager::Containerd => {
                self.runner
                    .sudo_cmd(&format!("tar -xzf {staging} -C /usr/local"), true)?;
                self.runner.sudo_cmd(
                    &format!(
                        "curl -L -sS -o /usr/local/sbin/runc \
                         https://github.com/opencontainers/runc/releases/download/{RUNC_VERSION}/runc.{arch} \
                         && chmod +x /usr/local/sbin/runc"
                    ),
                    true,
                )?;
                let unit = BASE64.encode(CONTAINERD_UNIT);
                self.runner.sudo_cmd(
                    &format!("echo {unit} | base64 -d > /etc/systemd/system/containerd.service"),
                    true,
                )?;
                if let Some(mirror) = &self.decl.registry_mirror {
                    let hosts = BASE64.encode(format!(
                        "server = \"https://registry-1.docker.io\"\n\n[host.\"{mirror}\"]\n  capabilities = [\"pull\", \"resolve\"]\n"
                    ));
                    self.runner.sudo_cmd(
                        &format!(
                            "mkdir -p /etc/containerd/certs.d/docker.io && \
                             echo {hosts} | base64 -d > /etc/containerd/certs.d/docker.io/hosts.toml"
                        ),
                        true,
                    )?;
                }
            }
            ContainerManager::Docker => {
                self.runner.sudo_cmd(
                    &format!("tar -xzf {staging} --strip-components=1 -C /usr/local/bin"),
                    true,
                )?;
            }
        }
        self.runner.sudo_cmd(
            &format!(
                "systemctl daemon-reload && systemctl enable --now {}",
                self.decl.container_manager.service()
            ),
            false,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Distribution;
    use sshkit::mock::MockTransport;
    use sshkit::{Auth, CancelToken, ExecutorPool, Host};
    use std::sync::Arc;

    fn fixture() -> (Arc<MockTransport>, Arc<dyn RemoteRunner>, ClusterDeclaration) {
        let transport = Arc::new(MockTransport::new());
        let host = Host::new("n1", "10.0.0.1", "root", Auth::PrivateKey("/k".into()));
        let pool = ExecutorPool::new(transport.clone());
        let runner = pool.runner(&host, &CancelToken::new());
        let decl = ClusterDeclaration::new("test", Distribution::Kubernetes, "v1.29.2");
        (transport, runner, decl)
    }

    #[test]
    fn test_detect_containerd_socket() {
        let (transport, runner, decl) = fixture();
        transport.respond("test -e '/run/containerd/containerd.sock'", 0, "", "");
        transport.respond("test -e", 1, "", "");
        let svc = ContainerManagerService::new(runner.as_ref(), &decl);
        assert_eq!(svc.detect().unwrap(), Some("containerd"));
    }

    #[test]
    fn test_detect_nothing() {
        let (transport, runner, decl) = fixture();
        transport.respond("test -e", 1, "", "");
        let svc = ContainerManagerService::new(runner.as_ref(), &decl);
        assert_eq!(svc.detect().unwrap(), None);
    }

    #[test]
    fn test_install_writes_mirror_config_when_declared() {
        let (transport, runner, mut decl) = fixture();
        decl.registry_mirror = Some("https://mirror.internal:5000".into());
        let svc = ContainerManagerService::new(runner.as_ref(), &decl);
        svc.install("amd64").unwrap();

        let commands: Vec<String> = transport.commands().into_iter().map(|r| r.command).collect();
        assert!(
            commands
                .iter()
                .any(|c| c.contains("/etc/containerd/certs.d/docker.io/hosts.toml"))
        );
    }

    #[test]
    fn test_install_containerd_enables_service() {
        let (transport, runner, decl) = fixture();
        let svc = ContainerManagerService::new(runner.as_ref(), &decl);
        svc.get("amd64", Duration::from_secs(600)).unwrap();
        svc.install("amd64").unwrap();

        let commands: Vec<String> = transport.commands().into_iter().map(|r| r.command).collect();
        assert!(commands[0].contains("containerd-1.7.13-linux-amd64.tar.gz"));
        assert!(commands.iter().any(|c| c.contains("runc.amd64")));
        assert!(commands.iter().any(|c| c.contains("containerd.service")));
        assert!(
            commands
                .last()
                .unwrap()
                .contains("systemctl enable --now containerd")
        );
    }
}

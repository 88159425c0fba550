//! OS preparation and deletion-time cleanup.

use crate::cluster::ClusterDeclaration;
use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sshkit::{Host, RemoteRunner};

/// System users the cluster components run as.
const SYSTEM_USERS: [(&str, &str); 2] = [
    ("kube", "Kubernetes user"),
    ("etcd", "Etcd user"),
];

/// Directories created during bootstrap.
const WORK_DIRS: [&str; 4] = [
    "/usr/local/bin",
    "/etc/cni/net.d",
    "/opt/cni/bin",
    "/var/lib/calico",
];

/// Files and directories removed during deletion-time cleanup.
const CLEANUP_PATHS: [&str; 8] = [
    "/etc/kubernetes",
    "/etc/cni/net.d",
    "/var/lib/kubelet",
    "/var/lib/etcd",
    "/usr/local/bin/kubelet",
    "/usr/local/bin/kubeadm",
    "/usr/local/bin/kubectl",
    "/etc/capstan",
];

/// Bootstrap-phase operations against one host.
pub struct BootstrapService<'a> {
    runner: &'a dyn RemoteRunner,
    decl: &'a ClusterDeclaration,
    host: &'a Host,
}

impl<'a> BootstrapService<'a> {
    pub fn new(runner: &'a dyn RemoteRunner, decl: &'a ClusterDeclaration, host: &'a Host) -> Self {
        Self { runner, decl, host }
    }

    /// Create the system users the components run as. A user that already
    /// exists is left alone.
    pub fn add_users(&self) -> Result<()> {
        for (user, comment) in SYSTEM_USERS {
            self.runner.sudo_cmd(
                &format!(
                    "useradd -M -c '{comment}' -s /sbin/nologin {user} || id {user}"
                ),
                true,
            )?;
        }
        Ok(())
    }

    /// Set the hostname to the inventory name.
    pub fn set_hostname(&self) -> Result<()> {
        self.runner
            .sudo_cmd(&format!("hostnamectl set-hostname {}", self.host.name), false)?;
        Ok(())
    }

    /// Create the work directories and hand them to the kube user.
    pub fn create_directory(&self) -> Result<()> {
        for dir in WORK_DIRS {
            self.runner
                .sudo_cmd(&format!("mkdir -p {dir} && chown kube -R {dir}"), true)?;
        }
        self.runner
            .sudo_cmd(&format!("mkdir -p {}", self.decl.work_dir()), true)?;
        Ok(())
    }

    /// Reset the per-host scratch directory.
    pub fn reset_tmp_directory(&self) -> Result<()> {
        let tmp = self.decl.tmp_dir();
        self.runner
            .sudo_cmd(&format!("rm -rf {tmp} && mkdir -p {tmp} && chmod 0777 {tmp}"), true)?;
        Ok(())
    }

    /// Write the operator-supplied `/etc/hosts` entries, replacing any block
    /// this engine wrote before.
    pub fn update_etc_hosts(&self) -> Result<()> {
        if self.decl.etc_hosts.is_empty() {
            return Ok(());
        }
        let mut block = String::from("# capstan hosts BEGIN\n");
        for entry in &self.decl.etc_hosts {
            block.push_str(&format!("{}  {}\n", entry.address, entry.hostnames.join(" ")));
        }
        block.push_str("# capstan hosts END\n");
        let encoded = BASE64.encode(block);
        self.runner.sudo_cmd(
            &format!(
                "sed -i '/# capstan hosts BEGIN/,/# capstan hosts END/d' /etc/hosts && \
                 echo {encoded} | base64 -d >> /etc/hosts"
            ),
            true,
        )?;
        Ok(())
    }

    /// Upload and execute the rendered OS init script, when one is declared.
    pub fn exec_init_script(&self) -> Result<()> {
        let Some(script) = &self.decl.init_script else {
            return Ok(());
        };
        let path = format!("{}/init-os.sh", self.decl.tmp_dir());
        let encoded = BASE64.encode(script);
        self.runner.sudo_cmd(
            &format!("echo {encoded} | base64 -d > {path} && chmod +x {path} && {path}"),
            false,
        )?;
        Ok(())
    }

    /// The whole bootstrap sequence, in order.
    pub fn bootstrap(&self) -> Result<()> {
        self.add_users()?;
        self.set_hostname()?;
        self.create_directory()?;
        self.reset_tmp_directory()?;
        self.update_etc_hosts()?;
        self.exec_init_script()?;
        Ok(())
    }

    // Deletion-time cleanup, run in five sub-steps when the declarative
    // object acquires a deletion timestamp.

    /// Reset the cluster agent if its CLI is present.
    pub fn reset_cluster_agent(&self, cri_socket: &str) -> Result<()> {
        self.runner.sudo_cmd(
            &format!(
                "if command -v kubeadm >/dev/null 2>&1; then \
                 kubeadm reset -f --cri-socket {cri_socket}; fi"
            ),
            false,
        )?;
        Ok(())
    }

    /// Tear down CNI interfaces and flush the rules the cluster installed.
    pub fn reset_network(&self) -> Result<()> {
        self.runner.sudo_cmd(
            "ip link delete cni0 2>/dev/null; ip link delete flannel.1 2>/dev/null; \
             iptables -F && iptables -X && iptables -t nat -F && iptables -t nat -X; true",
            true,
        )?;
        Ok(())
    }

    /// Remove installed files and state directories.
    pub fn remove_files(&self) -> Result<()> {
        let mut paths: Vec<&str> = CLEANUP_PATHS.to_vec();
        paths.push(self.decl.tmp_dir());
        self.runner
            .sudo_cmd(&format!("rm -rf {}", paths.join(" ")), true)?;
        Ok(())
    }

    /// Reload the service manager after unit removal.
    pub fn daemon_reload(&self) -> Result<()> {
        self.runner
            .sudo_cmd("systemctl daemon-reload && systemctl reset-failed", true)?;
        Ok(())
    }

    /// Run the K3s-class uninstallers when present.
    pub fn uninstall_k3s(&self) -> Result<()> {
        self.runner.sudo_cmd(
            "if [ -x /usr/local/bin/k3s-uninstall.sh ]; then /usr/local/bin/k3s-uninstall.sh; fi; \
             if [ -x /usr/local/bin/k3s-agent-uninstall.sh ]; then /usr/local/bin/k3s-agent-uninstall.sh; fi",
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
    use sshkit::{Auth, CancelToken, ExecutorPool};
    use std::sync::Arc;

    fn fixture() -> (Arc<MockTransport>, Host, ClusterDeclaration) {
        let transport = Arc::new(MockTransport::new());
        let host = Host::new("n1", "10.0.0.1", "root", Auth::PrivateKey("/k".into()));
        let decl = ClusterDeclaration::new("test", Distribution::Kubernetes, "v1.29.2");
        (transport, host, decl)
    }

    #[test]
    fn test_bootstrap_runs_steps_in_order() {
        let (transport, host, mut decl) = fixture();
        decl.init_script = Some("#!/bin/sh\nsysctl -p\n".into());
        let pool = ExecutorPool::new(transport.clone());
        let runner = pool.runner(&host, &CancelToken::new());
        BootstrapService::new(runner.as_ref(), &decl, &host)
            .bootstrap()
            .unwrap();

        let commands: Vec<String> = transport
            .commands()
            .into_iter()
            .map(|r| r.command)
            .collect();
        let position = |needle: &str| {
            commands
                .iter()
                .position(|c| c.contains(needle))
                .unwrap_or_else(|| panic!("no command containing '{needle}'"))
        };

        assert!(position("useradd") < position("hostnamectl set-hostname n1"));
        assert!(position("hostnamectl") < position("mkdir -p /usr/local/bin"));
        assert!(position("rm -rf /tmp/capstan") < position("init-os.sh"));
    }

    #[test]
    fn test_init_script_skipped_when_absent() {
        let (transport, host, decl) = fixture();
        let pool = ExecutorPool::new(transport.clone());
        let runner = pool.runner(&host, &CancelToken::new());
        BootstrapService::new(runner.as_ref(), &decl, &host)
            .exec_init_script()
            .unwrap();
        assert!(transport.commands().is_empty());
    }

    #[test]
    fn test_cleanup_sequence() {
        let (transport, host, decl) = fixture();
        let pool = ExecutorPool::new(transport.clone());
        let runner = pool.runner(&host, &CancelToken::new());
        let svc = BootstrapService::new(runner.as_ref(), &decl, &host);

        svc.reset_cluster_agent("unix:///run/containerd/containerd.sock")
            .unwrap();
        svc.reset_network().unwrap();
        svc.remove_files().unwrap();
        svc.daemon_reload().unwrap();
        svc.uninstall_k3s().unwrap();

        let commands: Vec<String> = transport
            .commands()
            .into_iter()
            .map(|r| r.command)
            .collect();
        assert_eq!(commands.len(), 5);
        assert!(commands[0].contains("kubeadm reset"));
        assert!(commands[1].contains("iptables -F"));
        assert!(commands[2].contains("rm -rf /etc/kubernetes"));
        assert!(commands[3].contains("systemctl daemon-reload"));
        assert!(commands[4].contains("k3s-uninstall.sh"));
    }
}

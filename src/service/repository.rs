//! Package repository preparation.
//!
//! Probes the host's package manager, optionally stages and mounts an
//! offline package ISO, and installs the prerequisite OS packages. The ISO
//! mount is scoped: release is guaranteed on every exit path, including
//! panics, by a drop guard.

use crate::cluster::ClusterDeclaration;
use crate::error::{Error, Result};
use sshkit::{RemoteRunner, RunOptions};
use std::path::Path;
use std::time::Duration;

/// Where the staged ISO lands on the host.
const ISO_STAGING: &str = "/tmp/capstan/repo.iso";

/// Where the ISO is mounted.
const ISO_MOUNT_POINT: &str = "/mnt/capstan-repo";

/// Prerequisite packages installed on every host.
const BASE_PACKAGES: [&str; 6] = ["socat", "conntrack", "ipset", "ebtables", "chrony", "ipvsadm"];

/// Package managers the repository phase understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Yum,
    Dnf,
    Zypper,
}

impl PackageManager {
    /// The install command for a package list.
    fn install_command(&self, packages: &str) -> String {
        match self {
            PackageManager::Apt => {
                format!("apt-get update -qq && DEBIAN_FRONTEND=noninteractive apt-get install -y {packages}")
            }
            PackageManager::Yum => format!("yum install -y {packages}"),
            PackageManager::Dnf => format!("dnf install -y {packages}"),
            PackageManager::Zypper => format!("zypper --non-interactive install {packages}"),
        }
    }

    fn binary(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Yum => "yum",
            PackageManager::Dnf => "dnf",
            PackageManager::Zypper => "zypper",
        }
    }
}

/// Repository-phase operations against one host.
pub struct RepositoryService<'a> {
    runner: &'a dyn RemoteRunner,
    decl: &'a ClusterDeclaration,
}

impl<'a> RepositoryService<'a> {
    pub fn new(runner: &'a dyn RemoteRunner, decl: &'a ClusterDeclaration) -> Self {
        Self { runner, decl }
    }

    /// Probe which package manager the host offers.
    pub fn check(&self) -> Result<PackageManager> {
        for pm in [
            PackageManager::Apt,
            PackageManager::Yum,
            PackageManager::Dnf,
            PackageManager::Zypper,
        ] {
            let probe = format!("command -v {}", pm.binary());
            if self.runner.cmd(&probe, true).is_ok() {
                return Ok(pm);
            }
        }
        Err(Error::Unsupported(
            "no supported package manager found (tried apt-get, yum, dnf, zypper)".into(),
        ))
    }

    /// Stage the declared offline ISO onto the host.
    ///
    /// No-op when the declaration carries no ISO or the staged copy already
    /// exists.
    pub fn get(&self, _timeout: Duration) -> Result<()> {
        let Some(iso) = &self.decl.iso_path else {
            return Ok(());
        };
        if self.runner.file_exist(Path::new(ISO_STAGING))? {
            return Ok(());
        }
        self.runner.sudo_scp(iso, Path::new(ISO_STAGING))?;
        Ok(())
    }

    /// Mount the staged ISO.
    pub fn mount_iso(&self) -> Result<()> {
        self.runner.sudo_cmd(
            &format!("mkdir -p {ISO_MOUNT_POINT} && mount -o loop {ISO_STAGING} {ISO_MOUNT_POINT}"),
            false,
        )?;
        Ok(())
    }

    /// Unmount the ISO. Safe to call when nothing is mounted.
    pub fn umount_iso(&self) -> Result<()> {
        self.runner
            .sudo_cmd(&format!("umount {ISO_MOUNT_POINT} 2>/dev/null || true"), true)?;
        Ok(())
    }

    /// Install the prerequisite packages with the probed package manager.
    pub fn update_and_install(&self, pm: PackageManager) -> Result<()> {
        let packages = BASE_PACKAGES.join(" ");
        self.runner.sudo_cmd_with(
            &pm.install_command(&packages),
            &RunOptions::with_timeout(Duration::from_secs(600)),
        )?;
        Ok(())
    }

    /// Run `body` with the ISO mounted, guaranteeing the unmount afterwards.
    ///
    /// The unmount runs from a drop guard, so it happens on success, on
    /// error, and on unwind alike. Skips the mount entirely when no ISO is
    /// declared.
    pub fn with_mounted_iso<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        if self.decl.iso_path.is_none() {
            return body();
        }
        self.mount_iso()?;
        let _guard = MountGuard { service: self };
        body()
    }
}

struct MountGuard<'a, 'b> {
    service: &'a RepositoryService<'b>,
}

impl Drop for MountGuard<'_, '_> {
    fn drop(&mut self) {
        if let Err(e) = self.service.umount_iso() {
            log::warn!("failed to unmount repository ISO: {e}");
        }
    }
}

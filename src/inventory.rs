//! Host inventory and the runtime handle.
//!
//! The inventory is loaded once, is immutable during a pipeline run, and
//! implements [`conveyor::Runtime`] over a pooled transport so every task
//! reaches hosts through the same executor pool.

use crate::cluster::EtcHostsEntry;
use crate::error::{Error, Result};
use sshkit::{CancelToken, ExecutorPool, Host, RemoteRunner, Transport};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The closed role set hosts may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Worker,
    Etcd,
    Registry,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Worker => "worker",
            Role::Etcd => "etcd",
            Role::Registry => "registry",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The SSH-reachable host set for one cluster.
pub struct Inventory {
    hosts: Vec<Host>,
    pool: ExecutorPool,
}

impl Inventory {
    /// Build an inventory over the given transport.
    pub fn new(hosts: Vec<Host>, transport: Arc<dyn Transport>) -> Self {
        Self {
            hosts,
            pool: ExecutorPool::new(transport),
        }
    }

    /// Every host, in declaration order.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Look up a host by name.
    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// A pooled runner for `host`.
    pub fn runner(&self, host: &Host, token: &CancelToken) -> Arc<dyn RemoteRunner> {
        self.pool.runner(host, token)
    }

    /// Validate the merged hostname→address map.
    ///
    /// The inventory itself and any operator-supplied `/etc/hosts` entries
    /// must agree: giving one hostname two different addresses fails here,
    /// before any host is touched, instead of silently taking the last
    /// write.
    pub fn preflight(&self, extra: &[EtcHostsEntry]) -> Result<()> {
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        for host in &self.hosts {
            pairs.push((&host.name, &host.address));
        }
        for entry in extra {
            for hostname in &entry.hostnames {
                pairs.push((hostname, &entry.address));
            }
        }

        let mut seen: HashMap<&str, &str> = HashMap::new();
        let mut conflicts = Vec::new();
        for (hostname, address) in pairs {
            match seen.get(hostname) {
                Some(existing) if *existing != address => conflicts.push(format!(
                    "hostname '{hostname}' maps to both {existing} and {address}"
                )),
                Some(_) => {}
                None => {
                    seen.insert(hostname, address);
                }
            }
        }

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(Error::Preflight(conflicts.join("; ")))
        }
    }
}

impl conveyor::Runtime for Inventory {
    fn all_hosts(&self) -> Vec<Host> {
        self.hosts.clone()
    }

    fn runner_for(
        &self,
        host: &Host,
        token: &CancelToken,
    ) -> conveyor::Result<Arc<dyn RemoteRunner>> {
        Ok(self.pool.runner(host, token))
    }
}

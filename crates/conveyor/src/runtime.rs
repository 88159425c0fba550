//! The runtime handle: inventory plus role index.
//!
//! Read-only to modules and tasks. The orchestration layer implements this
//! over its inventory and executor pool; tests implement it over the mock
//! transport.

use crate::error::Result;
use sshkit::{CancelToken, Host, RemoteRunner};
use std::sync::Arc;

/// Inventory access and runner lookup for one cluster.
pub trait Runtime: Send + Sync {
    /// Every host in the inventory, in declaration order.
    fn all_hosts(&self) -> Vec<Host>;

    /// Hosts carrying `role`, in declaration order.
    fn hosts_by_role(&self, role: &str) -> Vec<Host> {
        self.all_hosts()
            .into_iter()
            .filter(|h| h.has_role(role))
            .collect()
    }

    /// A pooled runner for `host`, bound to `token`.
    fn runner_for(&self, host: &Host, token: &CancelToken) -> Result<Arc<dyn RemoteRunner>>;
}

//! Per-(host, user) runner pooling.

use crate::cancel::CancelToken;
use crate::executor::{RemoteRunner, SshExecutor};
use crate::host::Host;
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Hands out [`RemoteRunner`]s backed by one shared transport.
///
/// The pool keeps one serialization lock per (host, user), so every runner
/// it produces for the same host shares the one-outstanding-command
/// guarantee. Connection reuse itself lives in the transport (ControlMaster
/// multiplexing for the OpenSSH transport), so the pool is cheap to hold for
/// the life of an inventory.
pub struct ExecutorPool {
    transport: Arc<dyn Transport>,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl ExecutorPool {
    /// Create a pool over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get a runner for `host`, bound to `token` for cancellation.
    pub fn runner(&self, host: &Host, token: &CancelToken) -> Arc<dyn RemoteRunner> {
        let key = (host.name.clone(), host.user.clone());
        let lock = self
            .locks
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Arc::new(SshExecutor::new(
            host.clone(),
            self.transport.clone(),
            token.clone(),
            lock,
        ))
    }
}

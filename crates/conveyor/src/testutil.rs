//! In-crate test runtime over the mock transport.

#![allow(dead_code)]

use crate::error::Result;
use crate::runtime::Runtime;
use sshkit::mock::MockTransport;
use sshkit::{Auth, CancelToken, ExecutorPool, Host, RemoteRunner};
use std::sync::Arc;

/// A runtime over an in-memory host list and a scripted transport.
pub struct TestRuntime {
    hosts: Vec<Host>,
    transport: Arc<MockTransport>,
    pool: ExecutorPool,
}

impl TestRuntime {
    /// Build from (name, roles) pairs; addresses are synthesized.
    pub fn new(specs: &[(&str, &[&str])]) -> Self {
        let transport = Arc::new(MockTransport::new());
        let hosts = specs
            .iter()
            .enumerate()
            .map(|(i, (name, roles))| {
                let mut host = Host::new(
                    *name,
                    format!("10.0.0.{}", i + 1),
                    "root",
                    Auth::PrivateKey("/keys/id_ed25519".into()),
                );
                for role in *roles {
                    host = host.with_role(*role);
                }
                host
            })
            .collect();
        Self {
            hosts,
            pool: ExecutorPool::new(transport.clone()),
            transport,
        }
    }

    /// The scripted transport behind every runner.
    pub fn transport(&self) -> &Arc<MockTransport> {
        &self.transport
    }
}

impl Runtime for TestRuntime {
    fn all_hosts(&self) -> Vec<Host> {
        self.hosts.clone()
    }

    fn runner_for(&self, host: &Host, token: &CancelToken) -> Result<Arc<dyn RemoteRunner>> {
        Ok(self.pool.runner(host, token))
    }
}

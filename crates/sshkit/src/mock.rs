//! Scripted in-memory transport for tests.
//!
//! Like all of sshkit, the mock never opens a network connection: callers
//! script responses per command pattern and assert on the recorded
//! dispatches afterwards. Unmatched commands succeed with empty output, so
//! happy-path tests only script the interesting exchanges.

use crate::error::{Error, Result};
use crate::host::Host;
use crate::transport::{ExecOutput, Transport};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded command dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    /// Host name the command targeted
    pub host: String,
    /// The full command line
    pub command: String,
    /// Stdin fed to the command, if any
    pub stdin: Option<String>,
}

/// One recorded file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    /// Host name the upload targeted
    pub host: String,
    /// Local source path
    pub local: PathBuf,
    /// Remote destination path
    pub remote: PathBuf,
}

struct Rule {
    pattern: String,
    output: ExecOutput,
    /// `None` = always applies; `Some(n)` = consumed after n matches
    remaining: Option<u32>,
}

/// A [`Transport`] that replays scripted responses and records traffic.
#[derive(Default)]
pub struct MockTransport {
    rules: Mutex<Vec<Rule>>,
    execs: Mutex<Vec<ExecRecord>>,
    uploads: Mutex<Vec<UploadRecord>>,
    probe_failures: Mutex<u32>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a permanent response for commands containing `pattern`.
    pub fn respond(&self, pattern: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.push_rule(pattern, exit_code, stdout, stderr, None);
    }

    /// Script a response consumed after `times` matches.
    ///
    /// Useful for transient-then-success sequences: script the failure with
    /// `respond_times`, then the success with `respond`.
    pub fn respond_times(&self, pattern: &str, exit_code: i32, stdout: &str, stderr: &str, times: u32) {
        self.push_rule(pattern, exit_code, stdout, stderr, Some(times));
    }

    /// Make the next `times` probes fail as unreachable.
    pub fn fail_probes(&self, times: u32) {
        *self.probe_failures.lock().unwrap() = times;
    }

    fn push_rule(&self, pattern: &str, exit_code: i32, stdout: &str, stderr: &str, remaining: Option<u32>) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            output: ExecOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
            remaining,
        });
    }

    /// All recorded command dispatches, in order.
    pub fn commands(&self) -> Vec<ExecRecord> {
        self.execs.lock().unwrap().clone()
    }

    /// Recorded command dispatches for one host, in order.
    pub fn commands_for(&self, host: &str) -> Vec<ExecRecord> {
        self.commands()
            .into_iter()
            .filter(|r| r.host == host)
            .collect()
    }

    /// All recorded uploads, in order.
    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.uploads.lock().unwrap().clone()
    }

    /// Drop every recorded dispatch and upload.
    pub fn clear_recordings(&self) {
        self.execs.lock().unwrap().clear();
        self.uploads.lock().unwrap().clear();
    }

    fn response_for(&self, command: &str) -> ExecOutput {
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if !command.contains(&rule.pattern) {
                continue;
            }
            match rule.remaining {
                Some(0) => continue,
                Some(ref mut n) => {
                    *n -= 1;
                    return rule.output.clone();
                }
                None => return rule.output.clone(),
            }
        }
        ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

impl Transport for MockTransport {
    fn exec(
        &self,
        host: &Host,
        command: &str,
        stdin: Option<&str>,
        _timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        self.execs.lock().unwrap().push(ExecRecord {
            host: host.name.clone(),
            command: command.to_string(),
            stdin: stdin.map(str::to_string),
        });
        Ok(self.response_for(command))
    }

    fn upload(&self, host: &Host, local: &Path, remote: &Path) -> Result<()> {
        self.uploads.lock().unwrap().push(UploadRecord {
            host: host.name.clone(),
            local: local.to_path_buf(),
            remote: remote.to_path_buf(),
        });
        Ok(())
    }

    fn probe(&self, host: &Host) -> Result<()> {
        let mut failures = self.probe_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(Error::Unreachable {
                message: format!("no route to host {}", host.address),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Auth;

    fn host() -> Host {
        Host::new("n1", "10.0.0.1", "root", Auth::PrivateKey("/k".into()))
    }

    #[test]
    fn test_unmatched_command_succeeds() {
        let mock = MockTransport::new();
        let out = mock.exec(&host(), "whatever", None, None).unwrap();
        assert!(out.success());
        assert_eq!(mock.commands().len(), 1);
    }

    #[test]
    fn test_consumable_rule_expires() {
        let mock = MockTransport::new();
        mock.respond_times("apt-get", 100, "", "mirror unreachable", 1);
        mock.respond("apt-get", 0, "done", "");

        let first = mock.exec(&host(), "apt-get update", None, None).unwrap();
        assert_eq!(first.exit_code, 100);
        let second = mock.exec(&host(), "apt-get update", None, None).unwrap();
        assert_eq!(second.stdout, "done");
    }

    #[test]
    fn test_probe_failures_consumed() {
        let mock = MockTransport::new();
        mock.fail_probes(2);
        assert!(mock.probe(&host()).is_err());
        assert!(mock.probe(&host()).is_err());
        assert!(mock.probe(&host()).is_ok());
    }
}

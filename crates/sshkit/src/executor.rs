//! Command-execution facade over one remote host.
//!
//! `SshExecutor` wraps a [`Transport`] with the per-host execution contract:
//! one outstanding command at a time, sudo elevation with password injection,
//! up to three internal reattempts of transient network errors, and fail-fast
//! behaviour on cancellation. Non-zero exit codes are never retried here.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::transport::Transport;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Internal reattempts for transient transport failures.
const TRANSIENT_ATTEMPTS: u32 = 3;

/// Delay between internal reattempts.
const TRANSIENT_DELAY: Duration = Duration::from_secs(1);

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Suppress command/output logging
    pub quiet: bool,
    /// Bound the wall-clock wait for the command
    pub timeout: Option<Duration>,
}

impl RunOptions {
    /// Options with only the quiet flag set.
    pub fn quiet(quiet: bool) -> Self {
        Self {
            quiet,
            timeout: None,
        }
    }

    /// Options with a wall-clock timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            quiet: false,
            timeout: Some(timeout),
        }
    }
}

/// Uniform, synchronous command execution against one host.
///
/// Callers needing parallelism across hosts use separate runners; a single
/// host is served by at most one outstanding command at a time.
pub trait RemoteRunner: Send + Sync {
    /// The host this runner targets.
    fn host(&self) -> &Host;

    /// Verify the host is reachable at the SSH layer.
    fn ping(&self) -> Result<()>;

    /// Run a command as the connection user and capture stdout.
    fn cmd_with(&self, command: &str, opts: &RunOptions) -> Result<String>;

    /// Run a command with sudo elevation and capture stdout.
    ///
    /// When a sudo password is configured it is injected on the first
    /// prompt.
    fn sudo_cmd_with(&self, command: &str, opts: &RunOptions) -> Result<String>;

    /// Run a command as the connection user.
    fn cmd(&self, command: &str, quiet: bool) -> Result<String> {
        self.cmd_with(command, &RunOptions::quiet(quiet))
    }

    /// Run a command with sudo elevation.
    fn sudo_cmd(&self, command: &str, quiet: bool) -> Result<String> {
        self.sudo_cmd_with(command, &RunOptions::quiet(quiet))
    }

    /// Copy a local file to the host, creating remote parent directories.
    fn scp(&self, local: &Path, remote: &Path) -> Result<()>;

    /// Copy a local file to a privileged remote path.
    fn sudo_scp(&self, local: &Path, remote: &Path) -> Result<()>;

    /// Whether a path exists on the host.
    fn file_exist(&self, remote: &Path) -> Result<bool>;
}

/// The pooled SSH implementation of [`RemoteRunner`].
pub struct SshExecutor {
    host: Host,
    transport: Arc<dyn Transport>,
    token: CancelToken,
    // Shared per (host, user) across all executors from one pool, so the
    // one-outstanding-command guarantee holds even when two pipelines hold
    // runners for the same host.
    host_lock: Arc<Mutex<()>>,
}

impl SshExecutor {
    pub fn new(
        host: Host,
        transport: Arc<dyn Transport>,
        token: CancelToken,
        host_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            host,
            transport,
            token,
            host_lock,
        }
    }

    /// Quote `command` for safe embedding inside single quotes.
    fn escape_single_quotes(command: &str) -> String {
        command.replace('\'', r"'\''")
    }

    /// Build the elevated command line and the stdin to feed it.
    fn sudo_line(&self, command: &str) -> (String, Option<String>) {
        let escaped = Self::escape_single_quotes(command);
        match &self.host.sudo_password {
            Some(password) => (
                format!("sudo -S -p '' -E /bin/bash -c '{escaped}'"),
                Some(format!("{password}\n")),
            ),
            None => (format!("sudo -E /bin/bash -c '{escaped}'"), None),
        }
    }

    /// Dispatch one command with the transient-retry loop.
    fn dispatch(&self, command: &str, stdin: Option<&str>, opts: &RunOptions) -> Result<String> {
        self.token.check()?;
        let _guard = self.host_lock.lock().unwrap();

        let mut attempt = 1;
        loop {
            self.token.check()?;
            if !opts.quiet {
                log::debug!("[{}] exec: {}", self.host.name, command);
            }

            let result = self
                .transport
                .exec(&self.host, command, stdin, opts.timeout)
                .and_then(|output| {
                    if output.success() {
                        Ok(output.stdout)
                    } else {
                        Err(Error::from_ssh_output(output.exit_code, &output.stderr))
                    }
                });

            match result {
                Ok(stdout) => return Ok(stdout),
                Err(err) if err.is_transient() && attempt < TRANSIENT_ATTEMPTS => {
                    log::warn!(
                        "[{}] transient failure (attempt {attempt}/{TRANSIENT_ATTEMPTS}): {err}",
                        self.host.name
                    );
                    attempt += 1;
                    self.token.sleep(TRANSIENT_DELAY)?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl RemoteRunner for SshExecutor {
    fn host(&self) -> &Host {
        &self.host
    }

    fn ping(&self) -> Result<()> {
        self.token.check()?;
        let mut attempt = 1;
        loop {
            match self.transport.probe(&self.host) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < TRANSIENT_ATTEMPTS => {
                    attempt += 1;
                    self.token.sleep(TRANSIENT_DELAY)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn cmd_with(&self, command: &str, opts: &RunOptions) -> Result<String> {
        self.dispatch(command, None, opts)
    }

    fn sudo_cmd_with(&self, command: &str, opts: &RunOptions) -> Result<String> {
        let (line, stdin) = self.sudo_line(command);
        self.dispatch(&line, stdin.as_deref(), opts)
    }

    fn scp(&self, local: &Path, remote: &Path) -> Result<()> {
        self.token.check()?;
        if let Some(parent) = remote.parent() {
            self.dispatch(
                &format!("mkdir -p '{}'", parent.display()),
                None,
                &RunOptions::quiet(true),
            )?;
        }
        let _guard = self.host_lock.lock().unwrap();
        self.transport.upload(&self.host, local, remote)
    }

    fn sudo_scp(&self, local: &Path, remote: &Path) -> Result<()> {
        self.token.check()?;
        let file_name = remote
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let staging = format!("/tmp/.capstan-upload-{file_name}");

        {
            let _guard = self.host_lock.lock().unwrap();
            self.transport
                .upload(&self.host, local, Path::new(&staging))?;
        }

        let mut move_cmd = String::new();
        if let Some(parent) = remote.parent() {
            move_cmd.push_str(&format!("mkdir -p '{}' && ", parent.display()));
        }
        move_cmd.push_str(&format!("mv '{}' '{}'", staging, remote.display()));
        self.sudo_cmd_with(&move_cmd, &RunOptions::quiet(true))?;
        Ok(())
    }

    fn file_exist(&self, remote: &Path) -> Result<bool> {
        match self.dispatch(
            &format!("test -e '{}'", remote.display()),
            None,
            &RunOptions::quiet(true),
        ) {
            Ok(_) => Ok(true),
            Err(Error::CommandFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Auth;
    use crate::mock::MockTransport;

    fn host() -> Host {
        Host::new("n1", "10.0.0.1", "root", Auth::PrivateKey("/k".into()))
    }

    fn executor(transport: Arc<MockTransport>) -> SshExecutor {
        SshExecutor::new(
            host(),
            transport,
            CancelToken::new(),
            Arc::new(Mutex::new(())),
        )
    }

    #[test]
    fn test_cmd_returns_stdout() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("uname -m", 0, "x86_64\n", "");
        let exec = executor(transport);
        let out = exec.cmd_with("uname -m", &RunOptions::default()).unwrap();
        assert_eq!(out, "x86_64\n");
    }

    #[test]
    fn test_nonzero_exit_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("false", 1, "", "boom");
        let exec = executor(transport.clone());
        let err = exec.cmd_with("false", &RunOptions::default()).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { exit_code: 1, .. }));
        assert_eq!(transport.commands().len(), 1);
    }

    #[test]
    fn test_transient_failure_retried_then_succeeds() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_times("hostname", 255, "", "ssh: connection reset", 2);
        transport.respond("hostname", 0, "n1\n", "");
        let exec = executor(transport.clone());
        let out = exec.cmd_with("hostname", &RunOptions::default()).unwrap();
        assert_eq!(out, "n1\n");
        assert_eq!(transport.commands().len(), 3);
    }

    #[test]
    fn test_transient_failures_exhaust_attempts() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_times("hostname", 255, "", "ssh: connection timed out", 99);
        let exec = executor(transport.clone());
        let err = exec.cmd_with("hostname", &RunOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unreachable { .. }));
        assert_eq!(transport.commands().len(), TRANSIENT_ATTEMPTS as usize);
    }

    #[test]
    fn test_sudo_cmd_wraps_with_bash() {
        let transport = Arc::new(MockTransport::new());
        let exec = executor(transport.clone());
        exec.sudo_cmd_with("systemctl daemon-reload", &RunOptions::default())
            .unwrap();
        let commands = transport.commands();
        assert_eq!(
            commands[0].command,
            "sudo -E /bin/bash -c 'systemctl daemon-reload'"
        );
        assert!(commands[0].stdin.is_none());
    }

    #[test]
    fn test_sudo_password_injected_on_stdin() {
        let transport = Arc::new(MockTransport::new());
        let mut h = host();
        h.sudo_password = Some("hunter2".to_string());
        let exec = SshExecutor::new(
            h,
            transport.clone(),
            CancelToken::new(),
            Arc::new(Mutex::new(())),
        );
        exec.sudo_cmd_with("whoami", &RunOptions::default()).unwrap();
        let commands = transport.commands();
        assert!(commands[0].command.starts_with("sudo -S -p ''"));
        assert_eq!(commands[0].stdin.as_deref(), Some("hunter2\n"));
    }

    #[test]
    fn test_sudo_cmd_escapes_single_quotes() {
        let transport = Arc::new(MockTransport::new());
        let exec = executor(transport.clone());
        exec.sudo_cmd_with("echo 'hi'", &RunOptions::default())
            .unwrap();
        let commands = transport.commands();
        assert_eq!(
            commands[0].command,
            r"sudo -E /bin/bash -c 'echo '\''hi'\'''"
        );
    }

    #[test]
    fn test_file_exist_maps_exit_code() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("test -e '/etc/kubernetes'", 1, "", "");
        let exec = executor(transport);
        assert!(!exec.file_exist(Path::new("/etc/kubernetes")).unwrap());
        assert!(exec.file_exist(Path::new("/etc/hosts")).unwrap());
    }

    #[test]
    fn test_scp_creates_parent_directory() {
        let transport = Arc::new(MockTransport::new());
        let exec = executor(transport.clone());
        exec.scp(Path::new("/tmp/unit"), Path::new("/opt/capstan/unit"))
            .unwrap();
        let commands = transport.commands();
        assert_eq!(commands[0].command, "mkdir -p '/opt/capstan'");
        let uploads = transport.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].remote, Path::new("/opt/capstan/unit"));
    }

    #[test]
    fn test_sudo_scp_stages_then_moves() {
        let transport = Arc::new(MockTransport::new());
        let exec = executor(transport.clone());
        exec.sudo_scp(Path::new("/tmp/kubelet"), Path::new("/usr/local/bin/kubelet"))
            .unwrap();
        let uploads = transport.uploads();
        assert_eq!(uploads[0].remote, Path::new("/tmp/.capstan-upload-kubelet"));
        let commands = transport.commands();
        assert!(commands[0].command.contains("mkdir -p '/usr/local/bin'"));
        assert!(
            commands[0]
                .command
                .contains("mv '/tmp/.capstan-upload-kubelet' '/usr/local/bin/kubelet'")
        );
    }

    #[test]
    fn test_cancelled_token_fails_fast() {
        let transport = Arc::new(MockTransport::new());
        let token = CancelToken::new();
        token.cancel();
        let exec = SshExecutor::new(host(), transport.clone(), token, Arc::new(Mutex::new(())));
        let err = exec.cmd_with("uptime", &RunOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(transport.commands().is_empty());
    }
}

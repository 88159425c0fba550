//! Byte-moving transport seam.
//!
//! `Transport` is the boundary between the executor facade and the actual
//! SSH client. The production implementation shells out to the system
//! OpenSSH client with connection multiplexing, so repeated commands against
//! one host reuse a single live session. Tests substitute
//! [`mock::MockTransport`](crate::mock::MockTransport).

use crate::error::{Error, Result};
use crate::host::{Auth, Host};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Output of one remote command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Remote exit code
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Transport over which commands and files reach a host.
pub trait Transport: Send + Sync {
    /// Execute a shell command on the host, optionally feeding `stdin`.
    ///
    /// Returns the raw output regardless of exit code; classifying non-zero
    /// exits is the caller's concern. `timeout` bounds the wall-clock wait.
    fn exec(
        &self,
        host: &Host,
        command: &str,
        stdin: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput>;

    /// Copy a local file to a path on the host.
    fn upload(&self, host: &Host, local: &Path, remote: &Path) -> Result<()>;

    /// Verify the host answers at the SSH layer.
    fn probe(&self, host: &Host) -> Result<()>;
}

/// Transport backed by the system OpenSSH client.
///
/// Connections are pooled per (host, user) through ControlMaster
/// multiplexing: the first command opens a master session that later
/// commands (and scp transfers) reuse until `control_persist` expires.
pub struct OpenSshTransport {
    control_dir: PathBuf,
    control_persist: Duration,
    connect_timeout: Duration,
}

impl OpenSshTransport {
    /// Create a transport multiplexing connections under `control_dir`.
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Self {
            control_dir: control_dir.into(),
            control_persist: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Shared options for both `ssh` and `scp` invocations.
    fn common_args(&self, host: &Host) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}/%r@%h:%p", self.control_dir.display()),
            "-o".to_string(),
            format!("ControlPersist={}", self.control_persist.as_secs()),
        ];
        match &host.auth {
            Auth::PrivateKey(path) => {
                args.push("-i".to_string());
                args.push(path.display().to_string());
                args.push("-o".to_string());
                args.push("BatchMode=yes".to_string());
            }
            Auth::Password(_) => {
                // Password is supplied by sshpass; keep ssh itself from
                // falling back to an interactive prompt loop.
                args.push("-o".to_string());
                args.push("NumberOfPasswordPrompts=1".to_string());
            }
        }
        args
    }

    /// Build the argument vector for running `command` on `host`.
    ///
    /// The remote command is passed as a single trailing argument so the
    /// remote shell handles pipes and redirects.
    pub fn ssh_args(&self, host: &Host, command: &str) -> Vec<String> {
        let mut args = self.common_args(host);
        args.push("-p".to_string());
        args.push(host.port.to_string());
        args.push(host.destination());
        args.push(command.to_string());
        args
    }

    /// Build the argument vector for copying `local` to `remote` on `host`.
    pub fn scp_args(&self, host: &Host, local: &Path, remote: &Path) -> Vec<String> {
        let mut args = self.common_args(host);
        args.push("-P".to_string());
        args.push(host.port.to_string());
        args.push(local.display().to_string());
        args.push(format!("{}:{}", host.destination(), remote.display()));
        args
    }

    /// Resolve the (program, leading args) pair, wrapping with sshpass for
    /// password auth.
    fn program_for(&self, host: &Host, client: &str) -> (String, Vec<String>) {
        match &host.auth {
            Auth::Password(password) => (
                "sshpass".to_string(),
                vec!["-p".to_string(), password.clone(), client.to_string()],
            ),
            Auth::PrivateKey(_) => (client.to_string(), Vec::new()),
        }
    }

    fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input.as_bytes())?;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match child.try_wait()? {
                Some(_) => break,
                None => {
                    if let Some(deadline) = deadline
                        && Instant::now() >= deadline
                    {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::Io(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            format!("command did not finish within {timeout:?}"),
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }

        let output = child.wait_with_output()?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

impl Transport for OpenSshTransport {
    fn exec(
        &self,
        host: &Host,
        command: &str,
        stdin: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        let (program, mut args) = self.program_for(host, "ssh");
        args.extend(self.ssh_args(host, command));
        self.run(&program, &args, stdin, timeout)
    }

    fn upload(&self, host: &Host, local: &Path, remote: &Path) -> Result<()> {
        let (program, mut args) = self.program_for(host, "scp");
        args.extend(self.scp_args(host, local, remote));
        let output = self.run(&program, &args, None, None)?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::from_ssh_output(output.exit_code, &output.stderr))
        }
    }

    fn probe(&self, host: &Host) -> Result<()> {
        let output = self.exec(host, "true", None, Some(self.connect_timeout))?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::from_ssh_output(output.exit_code, &output.stderr))
        }
    }
}

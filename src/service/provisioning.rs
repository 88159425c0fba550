//! Bootstrap-payload provisioning.
//!
//! The declarative layer hands the engine an opaque blob plus a format tag
//! per node. The engine transforms the blob into a flat sequence of sudo
//! commands and runs them in order; nothing in the payload is interpreted
//! beyond that.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sshkit::RemoteRunner;

/// Recognized bootstrap payload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadFormat {
    /// Line-oriented: each non-comment, non-empty line is one sudo command
    PlainSequence,
    /// YAML document with `write_files` and `runcmd` lists
    CloudConfig,
}

impl PayloadFormat {
    /// Parse the format tag carried next to the blob.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "plain" | "plain-sequence" => Ok(PayloadFormat::PlainSequence),
            "cloud-config" | "cloud-init" => Ok(PayloadFormat::CloudConfig),
            other => Err(Error::Payload(format!("unknown payload format '{other}'"))),
        }
    }
}

/// Supplies the per-node bootstrap payload from the declarative layer.
pub trait BootstrapDataProvider: Send + Sync {
    /// The payload blob and its format for `machine`.
    fn bootstrap_data(&self, machine: &str) -> Result<(Vec<u8>, PayloadFormat)>;
}

/// One file the structured document asks to be written.
#[derive(Debug, Clone, Deserialize)]
struct WriteFile {
    path: String,
    content: String,
    #[serde(default)]
    permissions: Option<String>,
    #[serde(default)]
    owner: Option<String>,
}

/// `runcmd` entries appear as strings or argv lists.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RunCmd {
    Line(String),
    Argv(Vec<String>),
}

impl RunCmd {
    fn into_command(self) -> String {
        match self {
            RunCmd::Line(line) => line,
            RunCmd::Argv(argv) => argv.join(" "),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CloudConfig {
    #[serde(default)]
    write_files: Vec<WriteFile>,
    #[serde(default)]
    runcmd: Vec<RunCmd>,
}

/// Transform a payload into the sudo command sequence it denotes.
///
/// Plain sequence: one command per non-comment, non-empty line, in input
/// order. Cloud config: the `write_files` renders first in declaration
/// order, then the `runcmd` entries in declaration order.
pub fn payload_commands(data: &[u8], format: PayloadFormat) -> Result<Vec<String>> {
    match format {
        PayloadFormat::PlainSequence => {
            let text = std::str::from_utf8(data)
                .map_err(|e| Error::Payload(format!("payload is not UTF-8: {e}")))?;
            Ok(text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect())
        }
        PayloadFormat::CloudConfig => {
            let doc: CloudConfig = serde_yaml::from_slice(data)
                .map_err(|e| Error::Payload(format!("invalid cloud-config document: {e}")))?;
            let mut commands = Vec::new();
            for file in doc.write_files {
                commands.extend(write_file_commands(&file));
            }
            commands.extend(doc.runcmd.into_iter().map(RunCmd::into_command));
            Ok(commands)
        }
    }
}

/// Render one `write_files` entry as shell commands.
///
/// The content travels base64-encoded inside the command line, so arbitrary
/// file bodies survive shell quoting.
fn write_file_commands(file: &WriteFile) -> Vec<String> {
    let mut commands = Vec::new();
    if let Some(parent) = std::path::Path::new(&file.path).parent()
        && !parent.as_os_str().is_empty()
    {
        commands.push(format!("mkdir -p {}", parent.display()));
    }
    let encoded = BASE64.encode(&file.content);
    commands.push(format!("echo {encoded} | base64 -d > {}", file.path));
    if let Some(permissions) = &file.permissions {
        commands.push(format!("chmod {permissions} {}", file.path));
    }
    if let Some(owner) = &file.owner {
        commands.push(format!("chown {owner} {}", file.path));
    }
    commands
}

/// Provisioning-phase operations against one host.
pub struct ProvisioningService<'a> {
    runner: &'a dyn RemoteRunner,
}

impl<'a> ProvisioningService<'a> {
    pub fn new(runner: &'a dyn RemoteRunner) -> Self {
        Self { runner }
    }

    /// Render the payload and run the commands in order with sudo.
    pub fn provision(&self, data: &[u8], format: PayloadFormat) -> Result<()> {
        for command in payload_commands(data, format)? {
            self.runner.sudo_cmd(&command, false)?;
        }
        Ok(())
    }
}

//! Virtual switch command model and execution.
//!
//! Ports are managed with the Open vSwitch CLI tools: `ovs-docker` for
//! attaching and detaching container interfaces, `ovs-vsctl` for queries
//! and trunk configuration.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use wharf_common::{WharfError, WharfResult};

/// Tool that attaches and detaches container interfaces.
pub const OVS_DOCKER: &str = "ovs-docker";
/// Tool that queries and configures the switch database.
pub const OVS_VSCTL: &str = "ovs-vsctl";

/// A switch operation with structured arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchCommand {
    /// Create a port on `network` and plumb it into the guest's namespace as `iface`.
    AddPort {
        /// Bridge name.
        network: String,
        /// Interface name inside the guest.
        iface: String,
        /// Guest (container) id.
        guest: String,
        /// MAC address, which must be given together with the port.
        mac: String,
    },
    /// Remove the port backing `iface`.
    DelPort {
        /// Bridge name.
        network: String,
        /// Interface name inside the guest.
        iface: String,
        /// Guest (container) id.
        guest: String,
    },
    /// Look up the switch port name of a guest interface.
    FindPort {
        /// Guest (container) id.
        guest: String,
        /// Interface name inside the guest.
        iface: String,
    },
    /// Replace a port's trunk set.
    SetTrunks {
        /// Switch port name.
        port: String,
        /// VLAN ids.
        vlans: Vec<u16>,
    },
}

impl SwitchCommand {
    /// Program implementing the operation.
    #[must_use]
    pub const fn program(&self) -> &'static str {
        match self {
            Self::AddPort { .. } | Self::DelPort { .. } => OVS_DOCKER,
            Self::FindPort { .. } | Self::SetTrunks { .. } => OVS_VSCTL,
        }
    }

    /// Argument vector for [`Self::program`].
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::AddPort {
                network,
                iface,
                guest,
                mac,
            } => vec![
                "add-port".to_string(),
                network.clone(),
                iface.clone(),
                guest.clone(),
                format!("--macaddress={mac}"),
            ],
            Self::DelPort {
                network,
                iface,
                guest,
            } => vec![
                "del-port".to_string(),
                network.clone(),
                iface.clone(),
                guest.clone(),
            ],
            Self::FindPort { guest, iface } => vec![
                "--data=bare".to_string(),
                "--no-heading".to_string(),
                "--columns=name".to_string(),
                "find".to_string(),
                "interface".to_string(),
                format!("external_ids:container_id={guest}"),
                format!("external_ids:container_iface={iface}"),
            ],
            Self::SetTrunks { port, vlans } => {
                let trunks = vlans
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                vec![
                    "set".to_string(),
                    "port".to_string(),
                    port.clone(),
                    format!("trunks={trunks}"),
                ]
            }
        }
    }
}

impl fmt::Display for SwitchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program(), self.args().join(" "))
    }
}

/// Exit status and combined stdout/stderr of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited successfully.
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

impl CommandOutput {
    /// A successful result with the given output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// A failed result with the given output.
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Executes switch commands.
///
/// Only failures to run the command at all are errors; a non-zero exit is
/// reported through [`CommandOutput::success`] so callers can inspect the output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    async fn run(&self, command: &SwitchCommand) -> WharfResult<CommandOutput>;
}

/// Runs switch commands as subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl ProcessRunner {
    /// Create a runner that kills commands after `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &SwitchCommand) -> WharfResult<CommandOutput> {
        tracing::debug!(command = %command, "Running switch command");

        let child = tokio::process::Command::new(command.program())
            .args(command.args())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| WharfError::Timeout {
                operation: command.to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| WharfError::Command {
                message: format!("Failed to execute {}: {}", command.program(), e),
                command: command.to_string(),
                output: String::new(),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            output: combined,
        })
    }
}

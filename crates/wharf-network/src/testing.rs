//! In-memory switch for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use wharf_common::WharfResult;

use crate::command::{CommandOutput, CommandRunner, SwitchCommand};

/// A port attached to the fake switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakePort {
    /// Switch port name.
    pub name: String,
    /// Bridge the port is on.
    pub network: String,
    /// Interface name inside the guest.
    pub iface: String,
    /// Guest id.
    pub guest: String,
    /// MAC address.
    pub mac: String,
    /// Trunked VLANs.
    pub trunks: Vec<u16>,
}

#[derive(Debug, Default)]
struct Inner {
    ports: Vec<FakePort>,
    commands: Vec<SwitchCommand>,
    fail_next: Option<String>,
    next_port: usize,
}

/// A [`CommandRunner`] that models the switch database instead of running tools.
///
/// Replies mimic the real tools closely enough for the provisioner's output
/// checks, including the "failed to find any attached port" message.
#[derive(Debug, Default)]
pub struct FakeSwitch {
    inner: Mutex<Inner>,
}

impl FakeSwitch {
    /// Create an empty switch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current ports.
    #[must_use]
    pub fn ports(&self) -> Vec<FakePort> {
        self.inner.lock().ports.clone()
    }

    /// Every command received, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<SwitchCommand> {
        self.inner.lock().commands.clone()
    }

    /// Ports belonging to `guest`.
    #[must_use]
    pub fn ports_of(&self, guest: &str) -> Vec<FakePort> {
        self.inner
            .lock()
            .ports
            .iter()
            .filter(|port| port.guest == guest)
            .cloned()
            .collect()
    }

    /// Fail the next command with `output`, without touching state.
    pub fn fail_next(&self, output: &str) {
        self.inner.lock().fail_next = Some(output.to_string());
    }
}

#[async_trait]
impl CommandRunner for FakeSwitch {
    async fn run(&self, command: &SwitchCommand) -> WharfResult<CommandOutput> {
        let mut inner = self.inner.lock();
        inner.commands.push(command.clone());
        if let Some(output) = inner.fail_next.take() {
            return Ok(CommandOutput::failed(output));
        }

        let output = match command {
            SwitchCommand::AddPort {
                network,
                iface,
                guest,
                mac,
            } => {
                if inner
                    .ports
                    .iter()
                    .any(|p| &p.guest == guest && &p.iface == iface)
                {
                    CommandOutput::failed(format!(
                        "ovs-docker: Port already attached for CONTAINER={guest} and INTERFACE={iface}"
                    ))
                } else {
                    inner.next_port += 1;
                    let name = format!("{:013x}_l", inner.next_port);
                    inner.ports.push(FakePort {
                        name,
                        network: network.clone(),
                        iface: iface.clone(),
                        guest: guest.clone(),
                        mac: mac.clone(),
                        trunks: Vec::new(),
                    });
                    CommandOutput::ok("")
                }
            }
            SwitchCommand::DelPort {
                network,
                iface,
                guest,
            } => {
                let before = inner.ports.len();
                inner
                    .ports
                    .retain(|p| !(&p.network == network && &p.iface == iface && &p.guest == guest));
                if inner.ports.len() == before {
                    CommandOutput::failed(format!(
                        "ovs-docker: Failed to find any attached port for CONTAINER={guest} and INTERFACE={iface}"
                    ))
                } else {
                    CommandOutput::ok("")
                }
            }
            SwitchCommand::FindPort { guest, iface } => {
                let name = inner
                    .ports
                    .iter()
                    .find(|p| &p.guest == guest && &p.iface == iface)
                    .map(|p| format!("{}\n", p.name))
                    .unwrap_or_default();
                CommandOutput::ok(name)
            }
            SwitchCommand::SetTrunks { port, vlans } => {
                match inner.ports.iter_mut().find(|p| &p.name == port) {
                    Some(found) => {
                        found.trunks.clone_from(vlans);
                        CommandOutput::ok("")
                    }
                    None => CommandOutput::failed(format!(
                        "ovs-vsctl: no row \"{port}\" in table Port"
                    )),
                }
            }
        };
        drop(inner);
        Ok(output)
    }
}

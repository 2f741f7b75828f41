//! Per-guest switch port provisioning.

use std::sync::Arc;

use wharf_common::{GuestId, Nic, WharfError, WharfResult};

use crate::command::{CommandOutput, CommandRunner, SwitchCommand};

/// Output fragment `ovs-docker del-port` prints when the port is already gone.
const PORT_ALREADY_GONE: &str = "failed to find any attached port";

/// Keeps the virtual switch's guest ports consistent with NIC declarations.
#[derive(Clone)]
pub struct PortProvisioner {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for PortProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortProvisioner").finish_non_exhaustive()
    }
}

fn command_failed(message: String, command: &SwitchCommand, output: CommandOutput) -> WharfError {
    tracing::error!(command = %command, output = %output.output, "{}", message);
    WharfError::Command {
        message,
        command: command.to_string(),
        output: output.output,
    }
}

impl PortProvisioner {
    /// Create a provisioner that runs commands through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Attach `nic` to its network and return the switch port name.
    ///
    /// # Errors
    ///
    /// Fails if the port cannot be added or cannot be found afterwards.
    pub async fn attach_port(&self, guest: &GuestId, nic: &Nic) -> WharfResult<String> {
        tracing::debug!(guest = %guest, iface = %nic.name, network = %nic.network, "Attaching port");

        let command = SwitchCommand::AddPort {
            network: nic.network.clone(),
            iface: nic.name.clone(),
            guest: guest.to_string(),
            mac: nic.mac.clone(),
        };
        let output = self.runner.run(&command).await?;
        if !output.success {
            return Err(command_failed(
                format!("Failed to add interface {}", nic.name),
                &command,
                output,
            ));
        }

        self.find_port(guest, &nic.name).await
    }

    /// Resolve the switch port backing a guest interface.
    ///
    /// # Errors
    ///
    /// Returns [`WharfError::PortLookup`] if the query fails or matches nothing.
    pub async fn find_port(&self, guest: &GuestId, iface: &str) -> WharfResult<String> {
        let command = SwitchCommand::FindPort {
            guest: guest.to_string(),
            iface: iface.to_string(),
        };
        let output = self.runner.run(&command).await?;
        let lookup_failed = || WharfError::PortLookup {
            guest: guest.to_string(),
            iface: iface.to_string(),
        };
        if !output.success {
            tracing::error!(command = %command, output = %output.output, "Port lookup failed");
            return Err(lookup_failed());
        }

        output
            .output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(ToString::to_string)
            .ok_or_else(lookup_failed)
    }

    /// Restrict `port` to exactly `vlans`; an empty list leaves the port untagged.
    ///
    /// # Errors
    ///
    /// Fails if the switch rejects the trunk update.
    pub async fn tag_port(&self, port: &str, vlans: &[u16]) -> WharfResult<()> {
        if vlans.is_empty() {
            return Ok(());
        }
        tracing::debug!(port, ?vlans, "Tagging port");

        let command = SwitchCommand::SetTrunks {
            port: port.to_string(),
            vlans: vlans.to_vec(),
        };
        let output = self.runner.run(&command).await?;
        if !output.success {
            return Err(command_failed(
                format!("Failed to tag interface {port}"),
                &command,
                output,
            ));
        }
        Ok(())
    }

    /// Remove the port backing `nic`; a port that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Fails on any other switch error.
    pub async fn detach_port(&self, guest: &GuestId, nic: &Nic) -> WharfResult<()> {
        tracing::debug!(guest = %guest, iface = %nic.name, network = %nic.network, "Detaching port");

        let command = SwitchCommand::DelPort {
            network: nic.network.clone(),
            iface: nic.name.clone(),
            guest: guest.to_string(),
        };
        let output = self.runner.run(&command).await?;
        if output.success {
            return Ok(());
        }
        if output.output.to_lowercase().contains(PORT_ALREADY_GONE) {
            tracing::debug!(guest = %guest, iface = %nic.name, "Port already removed");
            return Ok(());
        }
        Err(command_failed(
            format!("Failed to remove interface {}", nic.name),
            &command,
            output,
        ))
    }

    /// Attach and tag every interface, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Propagates the first attach or tag failure.
    pub async fn add_interfaces(&self, guest: &GuestId, nics: &[Nic]) -> WharfResult<()> {
        for nic in nics {
            let port = self.attach_port(guest, nic).await?;
            self.tag_port(&port, &nic.vlans).await?;
        }
        Ok(())
    }

    /// Detach every interface, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Propagates the first detach failure.
    pub async fn remove_interfaces(&self, guest: &GuestId, nics: &[Nic]) -> WharfResult<()> {
        for nic in nics {
            self.detach_port(guest, nic).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSwitch;

    fn guest() -> GuestId {
        GuestId::new("g1").unwrap()
    }

    fn nic() -> Nic {
        Nic::new("eth0", "net0", "C0:B6:C5:EA:93:AC")
    }

    fn provisioner(switch: &Arc<FakeSwitch>) -> PortProvisioner {
        PortProvisioner::new(Arc::clone(switch) as Arc<dyn CommandRunner>)
    }

    #[tokio::test]
    async fn attach_adds_port_and_resolves_its_name() {
        let switch = Arc::new(FakeSwitch::new());
        let port = provisioner(&switch).attach_port(&guest(), &nic()).await.unwrap();

        let ports = switch.ports();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name, port);
        assert_eq!(ports[0].mac, "C0:B6:C5:EA:93:AC");
        assert!(matches!(
            switch.commands()[1],
            SwitchCommand::FindPort { ref guest, ref iface } if guest == "g1" && iface == "eth0"
        ));
    }

    #[tokio::test]
    async fn empty_lookup_is_an_error() {
        let switch = Arc::new(FakeSwitch::new());
        let err = provisioner(&switch).find_port(&guest(), "eth0").await.unwrap_err();
        assert!(matches!(err, WharfError::PortLookup { .. }));
    }

    #[tokio::test]
    async fn empty_vlan_list_issues_no_command() {
        let switch = Arc::new(FakeSwitch::new());
        provisioner(&switch).tag_port("p1_l", &[]).await.unwrap();
        assert!(switch.commands().is_empty());
    }

    #[tokio::test]
    async fn tagging_overwrites_trunks() {
        let switch = Arc::new(FakeSwitch::new());
        let ports = provisioner(&switch);
        let port = ports.attach_port(&guest(), &nic()).await.unwrap();
        ports.tag_port(&port, &[1, 2]).await.unwrap();
        ports.tag_port(&port, &[7]).await.unwrap();
        assert_eq!(switch.ports()[0].trunks, vec![7]);
    }

    #[tokio::test]
    async fn detach_twice_succeeds() {
        let switch = Arc::new(FakeSwitch::new());
        let ports = provisioner(&switch);
        ports.attach_port(&guest(), &nic()).await.unwrap();

        ports.detach_port(&guest(), &nic()).await.unwrap();
        ports.detach_port(&guest(), &nic()).await.unwrap();
        assert!(switch.ports().is_empty());
    }

    #[tokio::test]
    async fn detach_surfaces_other_failures() {
        let switch = Arc::new(FakeSwitch::new());
        switch.fail_next("ovs-docker: permission denied");
        let err = provisioner(&switch).detach_port(&guest(), &nic()).await.unwrap_err();
        assert!(matches!(err, WharfError::Command { ref message, .. } if message == "Failed to remove interface eth0"));
    }

    #[tokio::test]
    async fn add_interfaces_attaches_and_tags_each_nic() {
        let switch = Arc::new(FakeSwitch::new());
        let nics = vec![
            nic().with_vlans([10, 20]),
            Nic::new("eth1", "net1", "C0:B6:C5:EA:93:AD"),
        ];
        provisioner(&switch).add_interfaces(&guest(), &nics).await.unwrap();

        let ports = switch.ports();
        assert_eq!(ports.len(), 2);
        let tagged = ports.iter().find(|p| p.iface == "eth0").unwrap();
        assert_eq!(tagged.trunks, vec![10, 20]);
        let untagged = ports.iter().find(|p| p.iface == "eth1").unwrap();
        assert!(untagged.trunks.is_empty());
    }

    #[tokio::test]
    async fn add_interfaces_stops_at_first_failure() {
        let switch = Arc::new(FakeSwitch::new());
        switch.fail_next("ovs-docker: bridge net0 does not exist");
        let nics = vec![nic(), Nic::new("eth1", "net1", "C0:B6:C5:EA:93:AD")];
        let err = provisioner(&switch).add_interfaces(&guest(), &nics).await.unwrap_err();

        assert!(matches!(err, WharfError::Command { .. }));
        assert_eq!(switch.commands().len(), 1);
    }
}

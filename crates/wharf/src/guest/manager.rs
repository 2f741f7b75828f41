//! The guest state machine.

use std::sync::Arc;

use wharf_common::{Guest, GuestId, GuestState, Image, WharfError, WharfResult};
use wharf_network::PortProvisioner;
use wharf_runtime::{CommitRequest, ContainerDetails, ContainerRuntime, ContainerSpec};

use super::config::LifecycleConfig;

/// Drives guests through create, start, stop, pause and delete while keeping
/// their switch ports in step with the container's running state.
#[derive(Clone)]
pub struct GuestManager {
    runtime: Arc<dyn ContainerRuntime>,
    ports: PortProvisioner,
    config: LifecycleConfig,
}

impl std::fmt::Debug for GuestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GuestManager {
    /// Create a manager.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        ports: PortProvisioner,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            runtime,
            ports,
            config,
        }
    }

    /// Derived state of guest `id`; `absent` if the runtime has no such container.
    ///
    /// # Errors
    ///
    /// Propagates runtime failures other than a missing container.
    pub async fn state(&self, id: &GuestId) -> WharfResult<GuestState> {
        match self.runtime.inspect_container(id.as_str()).await {
            Ok(details) => Ok(details.state()),
            Err(WharfError::ContainerNotFound { .. }) => Ok(GuestState::Absent),
            Err(e) => Err(e),
        }
    }

    /// Re-derive the state and require it to be `expected`.
    async fn expect_state(&self, id: &GuestId, expected: GuestState) -> WharfResult<GuestState> {
        let actual = self.runtime.inspect_container(id.as_str()).await?.state();
        if actual == expected {
            Ok(actual)
        } else {
            tracing::error!(guest = %id, %expected, %actual, "Unexpected container state");
            Err(WharfError::UnexpectedState {
                id: id.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    /// Containers known to the runtime; stopped ones only when `all` is set.
    ///
    /// # Errors
    ///
    /// Propagates runtime failures.
    pub async fn list(&self, all: bool) -> WharfResult<Vec<ContainerDetails>> {
        let ids = self.runtime.list_containers(all).await?;
        let mut containers = Vec::with_capacity(ids.len());
        for id in ids {
            containers.push(self.runtime.inspect_container(&id).await?);
        }
        Ok(containers)
    }

    /// Inspect one container by id or name.
    ///
    /// # Errors
    ///
    /// Returns [`WharfError::ContainerNotFound`] for an unknown container.
    pub async fn get(&self, id: &str) -> WharfResult<ContainerDetails> {
        if id.is_empty() {
            return Err(WharfError::MissingGuestId);
        }
        self.runtime.inspect_container(id).await
    }

    /// Create the guest's container, networking disabled until start.
    ///
    /// # Errors
    ///
    /// Fails validation without any runtime call if the id is missing or no
    /// NIC is declared; otherwise propagates runtime failures.
    pub async fn create(&self, guest: Guest) -> WharfResult<Guest> {
        let id = guest.guest_id()?;
        let Some(primary) = guest.primary_nic() else {
            return Err(WharfError::MissingNics { id: id.to_string() });
        };

        let spec = ContainerSpec {
            name: id.to_string(),
            hostname: id.to_string(),
            image: guest.image.clone(),
            memory_bytes: guest.memory_bytes(),
            mac_address: Some(primary.mac.clone()).filter(|mac| !mac.is_empty()),
            open_stdin: self.config.open_stdin,
            network_mode: self.config.network_mode.clone(),
            devices: self.config.devices.clone(),
        };
        tracing::debug!(guest = %id, image = %spec.image, memory_bytes = spec.memory_bytes, "Creating container");

        let container = self.runtime.create_container(&spec).await?;
        let state = self.runtime.inspect_container(&container).await?.state();
        tracing::info!(guest = %id, container = %container, %state, "Created guest");
        Ok(guest.with_state(state))
    }

    /// Start the guest and attach its ports.
    ///
    /// Stale ports from an earlier run are removed first. A port failure
    /// after the container started is returned but leaves it running.
    ///
    /// # Errors
    ///
    /// Fails on validation, runtime and port errors, or if the guest is not
    /// running afterwards.
    pub async fn start(&self, guest: Guest) -> WharfResult<Guest> {
        let id = guest.guest_id()?;
        self.ports.remove_interfaces(&id, &guest.nics).await?;

        tracing::debug!(guest = %id, "Starting container");
        match self.runtime.start_container(id.as_str()).await {
            Ok(()) => {}
            Err(WharfError::ContainerAlreadyRunning { .. }) => {
                tracing::warn!(guest = %id, "Container already running");
            }
            Err(e) => return Err(e),
        }
        let state = self.expect_state(&id, GuestState::Running).await?;

        self.ports.add_interfaces(&id, &guest.nics).await?;
        tracing::info!(guest = %id, nics = guest.nics.len(), "Started guest");
        Ok(guest.with_state(state))
    }

    /// Stop the guest and remove its ports.
    ///
    /// # Errors
    ///
    /// Fails on validation, runtime and port errors, or if the guest is not
    /// stopped afterwards.
    pub async fn stop(&self, guest: Guest) -> WharfResult<Guest> {
        let id = guest.guest_id()?;

        tracing::debug!(guest = %id, grace = ?self.config.stop_grace, "Stopping container");
        match self
            .runtime
            .stop_container(id.as_str(), self.config.stop_grace)
            .await
        {
            Ok(()) => {}
            Err(WharfError::ContainerNotRunning { .. }) => {
                tracing::warn!(guest = %id, "Container not running");
            }
            Err(e) => return Err(e),
        }
        let state = self.expect_state(&id, GuestState::Stopped).await?;

        // The namespace is gone but the switch still tracks the ports.
        self.ports.remove_interfaces(&id, &guest.nics).await?;
        tracing::info!(guest = %id, "Stopped guest");
        Ok(guest.with_state(state))
    }

    /// Stop then start the guest.
    ///
    /// # Errors
    ///
    /// Returns the first failure of either half.
    pub async fn restart(&self, guest: Guest) -> WharfResult<Guest> {
        let stopped = self.stop(guest).await?;
        self.start(stopped).await
    }

    /// Same as [`Self::restart`].
    ///
    /// # Errors
    ///
    /// Returns the first failure of either half.
    pub async fn reboot(&self, guest: Guest) -> WharfResult<Guest> {
        self.restart(guest).await
    }

    /// Freeze the guest.
    ///
    /// # Errors
    ///
    /// Fails on validation and runtime errors, or if the guest is not paused afterwards.
    pub async fn pause(&self, guest: Guest) -> WharfResult<Guest> {
        let id = guest.guest_id()?;
        self.runtime.pause_container(id.as_str()).await?;
        let state = self.expect_state(&id, GuestState::Paused).await?;
        tracing::info!(guest = %id, "Paused guest");
        Ok(guest.with_state(state))
    }

    /// Thaw the guest.
    ///
    /// # Errors
    ///
    /// Fails on validation and runtime errors, or if the guest is not running afterwards.
    pub async fn unpause(&self, guest: Guest) -> WharfResult<Guest> {
        let id = guest.guest_id()?;
        self.runtime.unpause_container(id.as_str()).await?;
        let state = self.expect_state(&id, GuestState::Running).await?;
        tracing::info!(guest = %id, "Unpaused guest");
        Ok(guest.with_state(state))
    }

    /// Force-remove the guest's container, then any ports it left behind.
    ///
    /// # Errors
    ///
    /// Fails on validation, runtime and port errors.
    pub async fn delete(&self, guest: Guest) -> WharfResult<Guest> {
        let id = guest.guest_id()?;
        self.runtime.remove_container(id.as_str(), true).await?;
        self.ports.remove_interfaces(&id, &guest.nics).await?;
        tracing::info!(guest = %id, "Deleted guest");
        Ok(guest.with_state(GuestState::Deleted))
    }

    /// Commit a container to a new image.
    ///
    /// # Errors
    ///
    /// Fails if no container is named or the runtime commit fails.
    pub async fn save(&self, request: &CommitRequest) -> WharfResult<Image> {
        if request.container.is_empty() {
            return Err(WharfError::MissingGuestId);
        }
        let image_id = self.runtime.commit_container(request).await?;
        let size_bytes = self
            .runtime
            .inspect_image(&image_id)
            .await?
            .map_or(0, |image| image.size_bytes);
        tracing::info!(container = %request.container, image = %image_id, "Saved container");
        Ok(Image::from_bytes(image_id, size_bytes))
    }
}

#[cfg(test)]
mod tests {
    use wharf_common::Nic;
    use wharf_network::testing::FakeSwitch;
    use wharf_network::{CommandRunner, SwitchCommand};
    use wharf_runtime::testing::FakeRuntime;

    use super::*;

    struct Harness {
        runtime: Arc<FakeRuntime>,
        switch: Arc<FakeSwitch>,
        guests: GuestManager,
    }

    fn harness() -> Harness {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_image("imgA", 0);
        let switch = Arc::new(FakeSwitch::new());
        let guests = GuestManager::new(
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            PortProvisioner::new(Arc::clone(&switch) as Arc<dyn CommandRunner>),
            LifecycleConfig::default(),
        );
        Harness {
            runtime,
            switch,
            guests,
        }
    }

    fn guest() -> Guest {
        Guest::new("g1", "imgA")
            .with_memory(512)
            .with_nic(Nic::new("eth0", "net0", "C0:B6:C5:EA:93:AC").with_vlans([5]))
    }

    #[tokio::test]
    async fn missing_id_fails_before_runtime() {
        let h = harness();
        let err = h.guests.start(Guest::default()).await.unwrap_err();
        assert!(matches!(err, WharfError::MissingGuestId));
        assert!(h.runtime.calls().is_empty());
        assert!(h.switch.commands().is_empty());
    }

    #[tokio::test]
    async fn create_requires_a_nic() {
        let h = harness();
        let err = h.guests.create(Guest::new("g1", "imgA")).await.unwrap_err();
        assert!(matches!(err, WharfError::MissingNics { .. }));
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn create_builds_an_offline_container() {
        let h = harness();
        let created = h.guests.create(guest()).await.unwrap();
        assert_eq!(created.state, Some(GuestState::Stopped));

        let spec = h.runtime.spec("g1").unwrap();
        assert_eq!(spec.hostname, "g1");
        assert_eq!(spec.image, "imgA");
        assert_eq!(spec.memory_bytes, 512 * 1024 * 1024);
        assert_eq!(spec.mac_address.as_deref(), Some("C0:B6:C5:EA:93:AC"));
        assert_eq!(spec.network_mode, "none");
        assert!(spec.open_stdin);
        assert_eq!(spec.devices[0].path_in_container, "/dev/zfs");
        assert!(h.switch.commands().is_empty());
    }

    #[tokio::test]
    async fn start_clears_stale_ports_before_attaching() {
        let h = harness();
        h.guests.create(guest()).await.unwrap();
        h.guests.start(guest()).await.unwrap();

        let commands = h.switch.commands();
        assert!(matches!(commands[0], SwitchCommand::DelPort { .. }));
        assert!(matches!(commands[1], SwitchCommand::AddPort { .. }));
        assert!(matches!(commands[3], SwitchCommand::SetTrunks { ref vlans, .. } if vlans == &[5]));
    }

    #[tokio::test]
    async fn start_tolerates_already_running() {
        let h = harness();
        h.guests.create(guest()).await.unwrap();
        h.guests.start(guest()).await.unwrap();
        let again = h.guests.start(guest()).await.unwrap();
        assert_eq!(again.state, Some(GuestState::Running));
        assert_eq!(h.switch.ports_of("g1").len(), 1);
    }

    #[tokio::test]
    async fn start_of_unknown_guest_attaches_nothing() {
        let h = harness();
        let err = h.guests.start(guest()).await.unwrap_err();
        assert!(matches!(err, WharfError::ContainerNotFound { .. }));
        assert!(
            !h.switch
                .commands()
                .iter()
                .any(|c| matches!(c, SwitchCommand::AddPort { .. }))
        );
    }

    #[tokio::test]
    async fn stuck_container_fails_the_state_check() {
        let h = harness();
        h.guests.create(guest()).await.unwrap();
        h.runtime.make_stuck("g1");

        let err = h.guests.start(guest()).await.unwrap_err();
        assert!(matches!(
            err,
            WharfError::UnexpectedState { ref expected, ref actual, .. }
                if expected == "running" && actual == "stopped"
        ));
        assert!(h.switch.ports().is_empty());
    }

    #[tokio::test]
    async fn stop_tolerates_not_running() {
        let h = harness();
        h.guests.create(guest()).await.unwrap();
        let stopped = h.guests.stop(guest()).await.unwrap();
        assert_eq!(stopped.state, Some(GuestState::Stopped));
    }

    #[tokio::test]
    async fn pause_and_unpause() {
        let h = harness();
        h.guests.create(guest()).await.unwrap();
        h.guests.start(guest()).await.unwrap();

        let paused = h.guests.pause(guest()).await.unwrap();
        assert_eq!(paused.state, Some(GuestState::Paused));
        let resumed = h.guests.unpause(guest()).await.unwrap();
        assert_eq!(resumed.state, Some(GuestState::Running));
        assert_eq!(h.switch.ports_of("g1").len(), 1);
    }

    #[tokio::test]
    async fn restart_reattaches_ports() {
        let h = harness();
        h.guests.create(guest()).await.unwrap();
        h.guests.start(guest()).await.unwrap();
        let first = h.switch.ports_of("g1")[0].name.clone();

        let restarted = h.guests.restart(guest()).await.unwrap();
        assert_eq!(restarted.state, Some(GuestState::Running));
        let ports = h.switch.ports_of("g1");
        assert_eq!(ports.len(), 1);
        assert_ne!(ports[0].name, first);
    }

    #[tokio::test]
    async fn delete_reports_deleted_and_clears_ports() {
        let h = harness();
        h.guests.create(guest()).await.unwrap();
        h.guests.start(guest()).await.unwrap();

        let deleted = h.guests.delete(guest()).await.unwrap();
        assert_eq!(deleted.state, Some(GuestState::Deleted));
        assert!(h.switch.ports().is_empty());
        let id = GuestId::new("g1").unwrap();
        assert_eq!(h.guests.state(&id).await.unwrap(), GuestState::Absent);
    }

    #[tokio::test]
    async fn save_commits_to_an_image() {
        let h = harness();
        h.guests.create(guest()).await.unwrap();
        let request = CommitRequest {
            container: "g1".to_string(),
            repository: Some("snap".to_string()),
            ..CommitRequest::default()
        };
        let image = h.guests.save(&request).await.unwrap();
        assert!(image.id.starts_with("sha256:"));
        assert_eq!(image.kind, "container");

        let err = h.guests.save(&CommitRequest::default()).await.unwrap_err();
        assert!(matches!(err, WharfError::MissingGuestId));
    }

    #[tokio::test]
    async fn list_respects_all_flag() {
        let h = harness();
        h.guests.create(guest()).await.unwrap();
        assert!(h.guests.list(false).await.unwrap().is_empty());
        let all = h.guests.list(true).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "g1");
    }
}

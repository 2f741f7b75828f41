//! Lifecycle configuration.

use std::time::Duration;

use wharf_runtime::DeviceMapping;

/// Host storage device exposed inside every guest.
pub const ZFS_DEVICE: &str = "/dev/zfs";

/// Settings applied to every guest the lifecycle manager creates or stops.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Time a stopping container gets before it is killed.
    pub stop_grace: Duration,
    /// Host devices passed through to each container.
    pub devices: Vec<DeviceMapping>,
    /// Runtime network mode; ports are attached by the switch instead.
    pub network_mode: String,
    /// Keep stdin open so the guest's init does not see EOF.
    pub open_stdin: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(10),
            devices: vec![DeviceMapping {
                path_on_host: ZFS_DEVICE.to_string(),
                path_in_container: ZFS_DEVICE.to_string(),
                cgroup_permissions: "rwm".to_string(),
            }],
            network_mode: "none".to_string(),
            open_stdin: true,
        }
    }
}

impl LifecycleConfig {
    /// Set the stop grace period.
    #[must_use]
    pub const fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Replace the device passthrough list.
    #[must_use]
    pub fn with_devices(mut self, devices: Vec<DeviceMapping>) -> Self {
        self.devices = devices;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LifecycleConfig::default();
        assert_eq!(config.stop_grace, Duration::from_secs(10));
        assert_eq!(config.network_mode, "none");
        assert!(config.open_stdin);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].path_on_host, "/dev/zfs");
        assert_eq!(config.devices[0].cgroup_permissions, "rwm");
    }

    #[test]
    fn builder_pattern() {
        let config = LifecycleConfig::default()
            .with_stop_grace(Duration::from_secs(3))
            .with_devices(Vec::new());
        assert_eq!(config.stop_grace, Duration::from_secs(3));
        assert!(config.devices.is_empty());
    }
}

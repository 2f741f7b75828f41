//! Guest description exchanged with the orchestration layer.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::WharfResult;
use crate::id::GuestId;

/// A user-facing container instance.
///
/// Fields the sub-agent does not interpret are kept in `extra` and echoed
/// back untouched in responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guest {
    /// Caller-assigned guest id, also used as the container name.
    #[serde(default)]
    pub id: String,
    /// Guest type tag.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Image the guest runs.
    #[serde(default)]
    pub image: String,
    /// Memory limit in MiB, 0 for unlimited.
    #[serde(default)]
    pub memory: u64,
    /// Network interfaces, the first one is the primary interface.
    #[serde(default)]
    pub nics: Vec<Nic>,
    /// Derived lifecycle state, only set in responses.
    #[serde(
        default,
        deserialize_with = "lenient_state",
        skip_serializing_if = "Option::is_none"
    )]
    pub state: Option<GuestState>,
    /// Uninterpreted fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Guest {
    /// Create a guest with the given id and image.
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "container".to_string(),
            image: image.into(),
            ..Self::default()
        }
    }

    /// Add a network interface.
    #[must_use]
    pub fn with_nic(mut self, nic: Nic) -> Self {
        self.nics.push(nic);
        self
    }

    /// Set the memory limit in MiB.
    #[must_use]
    pub const fn with_memory(mut self, memory: u64) -> Self {
        self.memory = memory;
        self
    }

    /// Validated guest id.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the id is empty or malformed.
    pub fn guest_id(&self) -> WharfResult<GuestId> {
        GuestId::new(self.id.as_str())
    }

    /// The primary interface.
    #[must_use]
    pub fn primary_nic(&self) -> Option<&Nic> {
        self.nics.first()
    }

    /// Memory limit converted to bytes, saturating at `u64::MAX`.
    #[must_use]
    pub const fn memory_bytes(&self) -> u64 {
        self.memory.saturating_mul(1024 * 1024)
    }

    /// Return the guest annotated with `state`.
    #[must_use]
    pub fn with_state(mut self, state: GuestState) -> Self {
        self.state = Some(state);
        self
    }
}

/// A guest network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nic {
    /// Interface name inside the guest, unique per guest.
    pub name: String,
    /// Virtual switch (bridge) the interface attaches to.
    pub network: String,
    /// MAC address.
    #[serde(default)]
    pub mac: String,
    /// VLAN trunk set; empty carries every VLAN.
    #[serde(default)]
    pub vlans: Vec<u16>,
    /// Uninterpreted fields such as model, address or gateway.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Nic {
    /// Create an untagged interface.
    pub fn new(name: impl Into<String>, network: impl Into<String>, mac: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            network: network.into(),
            mac: mac.into(),
            ..Self::default()
        }
    }

    /// Restrict the interface to the given VLANs.
    #[must_use]
    pub fn with_vlans(mut self, vlans: impl IntoIterator<Item = u16>) -> Self {
        self.vlans = vlans.into_iter().collect();
        self
    }
}

/// Guest lifecycle state, always derived from the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestState {
    /// The runtime has no container for the guest.
    Absent,
    /// The container is running.
    Running,
    /// The container is frozen.
    Paused,
    /// The container exists but is not running; includes never-started containers.
    Stopped,
    /// The container was just removed.
    Deleted,
}

impl GuestState {
    /// Derive the state from runtime flags; paused dominates running.
    #[must_use]
    pub const fn from_flags(running: bool, paused: bool) -> Self {
        if paused {
            Self::Paused
        } else if running {
            Self::Running
        } else {
            Self::Stopped
        }
    }

    /// The lower-case wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for GuestState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "absent" => Ok(Self::Absent),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown guest state: {other}")),
        }
    }
}

// Requests may carry whatever state the orchestrator last recorded.
fn lenient_state<'de, D>(deserializer: D) -> Result<Option<GuestState>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

impl std::fmt::Display for GuestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//! # Wharf
//!
//! Wharf is a container sub-agent: it runs guests as Docker containers and
//! wires their interfaces into an Open vSwitch bridge.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wharf::guest::{GuestManager, LifecycleConfig};
//! use wharf_common::{Guest, Nic};
//! use wharf_network::{PortProvisioner, ProcessRunner};
//! use wharf_runtime::{DockerConfig, DockerRuntime};
//!
//! # async fn example() -> wharf_common::WharfResult<()> {
//! let runtime = Arc::new(DockerRuntime::connect(&DockerConfig::default()).await?);
//! let ports = PortProvisioner::new(Arc::new(ProcessRunner::default()));
//! let guests = GuestManager::new(runtime, ports, LifecycleConfig::default());
//!
//! let guest = Guest::new("g1", "imgA").with_nic(Nic::new("eth0", "net0", "C0:B6:C5:EA:93:AC"));
//! guests.create(guest.clone()).await?;
//! guests.start(guest).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod guest;

pub use guest::{GuestManager, LifecycleConfig};

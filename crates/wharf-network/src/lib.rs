//! # wharf-network
//!
//! Virtual switch port provisioning for Wharf guests.
//!
//! Guests are created with no runtime networking; each declared NIC becomes
//! a port on an Open vSwitch bridge, plumbed into the guest and optionally
//! trunked to a set of VLANs.

#![warn(missing_docs)]

pub mod command;
pub mod ports;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{CommandOutput, CommandRunner, ProcessRunner, SwitchCommand};
pub use ports::PortProvisioner;

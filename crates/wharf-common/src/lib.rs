//! # wharf-common
//!
//! Shared types for the Wharf container sub-agent.
//!
//! This crate provides the data model used across all Wharf crates:
//! - Guest and NIC descriptions exchanged with the orchestrator
//! - Derived guest lifecycle states
//! - Image records
//! - Guest id validation
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod guest;
pub mod id;
pub mod image;

pub use error::{WharfError, WharfResult};
pub use guest::{Guest, GuestState, Nic};
pub use id::GuestId;
pub use image::Image;

//! # wharf-runtime
//!
//! Container runtime adapter for Wharf.
//!
//! This crate provides:
//! - The [`ContainerRuntime`] contract the guest and image managers consume
//! - A Docker Engine implementation over `bollard`
//! - Runtime inspection types
//! - An in-memory fake behind the `testing` feature

#![warn(missing_docs)]

pub mod adapter;
pub mod docker;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{
    ArchiveStream, CommitRequest, ContainerRuntime, ContainerSpec, DeviceMapping, abortable_body,
};
pub use docker::{DockerConfig, DockerRuntime};
pub use state::{ContainerDetails, RuntimeImage};

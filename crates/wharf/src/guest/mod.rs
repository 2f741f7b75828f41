//! Guest lifecycle.
//!
//! Guest state is never stored: every operation acts on the runtime, then
//! re-derives the state from a fresh inspection and checks it against the
//! operation's post-condition.

mod config;
mod manager;

pub use config::{LifecycleConfig, ZFS_DEVICE};
pub use manager::GuestManager;

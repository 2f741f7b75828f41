//! Runtime inspection results.
//!
//! Nothing here is persisted; every value is produced by a fresh runtime query.

use serde::{Deserialize, Serialize};
use wharf_common::GuestState;

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDetails {
    /// Runtime-assigned container id.
    pub id: String,
    /// Container name without the leading slash.
    pub name: String,
    /// Image the container was created from.
    pub image: String,
    /// Running flag.
    pub running: bool,
    /// Paused flag.
    pub paused: bool,
    /// Memory limit in bytes, 0 for unlimited.
    pub memory_bytes: u64,
}

impl ContainerDetails {
    /// Derived guest state; the paused flag dominates the running flag.
    #[must_use]
    pub const fn state(&self) -> GuestState {
        GuestState::from_flags(self.running, self.paused)
    }
}

/// An image as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeImage {
    /// Content id.
    pub id: String,
    /// `repository:tag` references.
    pub repo_tags: Vec<String>,
    /// Size in bytes.
    pub size_bytes: u64,
}

impl RuntimeImage {
    /// Repository name of the first reference, with any tag stripped.
    #[must_use]
    pub fn repository(&self) -> Option<&str> {
        self.repo_tags.first().map(|reference| split_repository_tag(reference).0)
    }

    /// Whether any reference names `repository`, whatever its tag.
    #[must_use]
    pub fn has_repository(&self, repository: &str) -> bool {
        self.repo_tags
            .iter()
            .any(|reference| split_repository_tag(reference).0 == repository)
    }
}

/// Split `repository[:tag]` into its parts; a `:` inside a registry host port is not a tag.
#[must_use]
pub fn split_repository_tag(reference: &str) -> (&str, Option<&str>) {
    match reference.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => (repository, Some(tag)),
        _ => (reference, None),
    }
}

//! The narrow container runtime contract consumed by the guest and image managers.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::oneshot;
use futures::stream::BoxStream;
use futures::{StreamExt, future};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use wharf_common::WharfResult;

use crate::state::{ContainerDetails, RuntimeImage};

/// A streamed image archive.
///
/// An `Err` item ends the stream and must fail the load that consumes it.
pub type ArchiveStream = BoxStream<'static, io::Result<Bytes>>;

/// Split `archive` into plain body chunks and a receiver for its error.
///
/// After an `Err` item the body never ends. The consumer must watch the
/// receiver and drop its request, so the runtime sees a cut upload instead of
/// a short archive that happens to end on a block boundary.
pub fn abortable_body(
    archive: ArchiveStream,
) -> (BoxStream<'static, Bytes>, oneshot::Receiver<io::Error>) {
    let (tx, rx) = oneshot::channel();
    let abort = Arc::new(Mutex::new(Some(tx)));
    let body = archive
        .then(move |chunk| {
            let abort = Arc::clone(&abort);
            async move {
                match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        let tx = abort.lock().take();
                        if let Some(tx) = tx {
                            let _ = tx.send(err);
                        }
                        future::pending().await
                    }
                }
            }
        })
        .boxed();
    (body, rx)
}

/// Container runtime operations.
///
/// Implementations map the runtime's "already started" and "not running"
/// replies to `ContainerAlreadyRunning` and `ContainerNotRunning`, and missing
/// objects to `ContainerNotFound` / `ImageNotFound`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check the runtime is reachable.
    async fn ping(&self) -> WharfResult<()>;

    /// General system information.
    async fn info(&self) -> WharfResult<serde_json::Value>;

    /// Ids of containers; stopped ones are included when `all` is set.
    async fn list_containers(&self, all: bool) -> WharfResult<Vec<String>>;

    /// Inspect a container by id or name.
    async fn inspect_container(&self, id: &str) -> WharfResult<ContainerDetails>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: &ContainerSpec) -> WharfResult<String>;

    /// Start a container.
    async fn start_container(&self, id: &str) -> WharfResult<()>;

    /// Stop a container, killing it once `grace` elapses.
    async fn stop_container(&self, id: &str, grace: Duration) -> WharfResult<()>;

    /// Freeze a container.
    async fn pause_container(&self, id: &str) -> WharfResult<()>;

    /// Thaw a container.
    async fn unpause_container(&self, id: &str) -> WharfResult<()>;

    /// Remove a container.
    async fn remove_container(&self, id: &str, force: bool) -> WharfResult<()>;

    /// Commit a container to a new image and return the image id.
    async fn commit_container(&self, request: &CommitRequest) -> WharfResult<String>;

    /// All tagged images.
    async fn list_images(&self) -> WharfResult<Vec<RuntimeImage>>;

    /// Inspect an image by reference, `None` if the runtime does not have it.
    async fn inspect_image(&self, reference: &str) -> WharfResult<Option<RuntimeImage>>;

    /// Remove an image.
    async fn remove_image(&self, reference: &str) -> WharfResult<()>;

    /// Load a saved image archive (`docker save` format).
    async fn load_image(&self, archive: ArchiveStream) -> WharfResult<()>;
}

/// A host device exposed inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMapping {
    /// Device path on the host.
    pub path_on_host: String,
    /// Device path inside the container.
    pub path_in_container: String,
    /// Cgroup permissions, e.g. `rwm`.
    pub cgroup_permissions: String,
}

/// Parameters for creating a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Hostname inside the container.
    pub hostname: String,
    /// Image reference.
    pub image: String,
    /// Memory limit in bytes, 0 for unlimited.
    pub memory_bytes: u64,
    /// MAC address of the primary interface.
    pub mac_address: Option<String>,
    /// Keep stdin open.
    pub open_stdin: bool,
    /// Runtime network mode; `none` leaves attachment to the switch.
    pub network_mode: String,
    /// Host devices to pass through.
    pub devices: Vec<DeviceMapping>,
}

/// Options for committing a container to an image.
///
/// Also accepts the capitalized field names and the engine's `repo` and
/// `comment` query names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    /// Container id or name.
    #[serde(default, alias = "Container")]
    pub container: String,
    /// Repository for the new image.
    #[serde(
        default,
        alias = "Repository",
        alias = "repo",
        skip_serializing_if = "Option::is_none"
    )]
    pub repository: Option<String>,
    /// Tag for the new image.
    #[serde(default, alias = "Tag", skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Commit message.
    #[serde(
        default,
        alias = "Message",
        alias = "comment",
        skip_serializing_if = "Option::is_none"
    )]
    pub message: Option<String>,
    /// Author.
    #[serde(default, alias = "Author", skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Pause the container while committing.
    #[serde(default, alias = "Pause")]
    pub pause: bool,
}

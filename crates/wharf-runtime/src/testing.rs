//! In-memory runtime for tests.
//!
//! [`FakeRuntime`] keeps containers and images in a map and understands
//! just enough of the saved-image format to register loaded layers under the
//! names in their `repositories` entry, leaving untagged layers dangling.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::{self, Either};
use parking_lot::Mutex;
use wharf_common::{WharfError, WharfResult};

use crate::adapter::{
    ArchiveStream, CommitRequest, ContainerRuntime, ContainerSpec, abortable_body,
};
use crate::state::{ContainerDetails, RuntimeImage, split_repository_tag};

#[derive(Debug, Default)]
struct Inner {
    containers: BTreeMap<String, ContainerDetails>,
    specs: HashMap<String, ContainerSpec>,
    images: Vec<RuntimeImage>,
    stuck: HashSet<String>,
    calls: Vec<String>,
    loads: usize,
    load_error: Option<String>,
    last_archive: Vec<u8>,
    next_id: usize,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:012x}", self.next_id)
    }

    fn container(&mut self, id: &str) -> WharfResult<&mut ContainerDetails> {
        self.containers
            .values_mut()
            .find(|c| c.id == id || c.name == id)
            .ok_or_else(|| WharfError::ContainerNotFound { id: id.to_string() })
    }

    fn is_stuck(&self, id: &str) -> bool {
        self.stuck.contains(id)
    }

    fn find_image(&self, reference: &str) -> Option<&RuntimeImage> {
        let (repository, tag) = split_repository_tag(reference);
        let wanted = format!("{repository}:{}", tag.unwrap_or("latest"));
        self.images
            .iter()
            .find(|image| image.id == reference || image.repo_tags.contains(&wanted))
    }
}

/// A [`ContainerRuntime`] that lives entirely in memory.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

impl FakeRuntime {
    /// Create an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image tagged `repository:latest`.
    pub fn add_image(&self, repository: &str, size_bytes: u64) {
        let mut inner = self.inner.lock();
        let id = inner.next_id("sha256:");
        inner.images.push(RuntimeImage {
            id,
            repo_tags: vec![format!("{repository}:latest")],
            size_bytes,
        });
    }

    /// Make start/stop/pause/unpause succeed without changing the container's flags.
    pub fn make_stuck(&self, name: &str) {
        self.inner.lock().stuck.insert(name.to_string());
    }

    /// Make every later `load_image` hang up on its archive and fail with `message`.
    pub fn reject_loads(&self, message: &str) {
        self.inner.lock().load_error = Some(message.to_string());
    }

    /// Number of completed image loads.
    #[must_use]
    pub fn loads(&self) -> usize {
        self.inner.lock().loads
    }

    /// Bytes of the most recent archive handed to `load_image`.
    #[must_use]
    pub fn last_archive(&self) -> Vec<u8> {
        self.inner.lock().last_archive.clone()
    }

    /// Every call made so far, as `operation:target`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    /// The spec a container was created with.
    #[must_use]
    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.inner.lock().specs.get(name).cloned()
    }

    fn record(&self, operation: &str, target: &str) {
        self.inner.lock().calls.push(format!("{operation}:{target}"));
    }
}

type Repositories = BTreeMap<String, BTreeMap<String, String>>;

/// Layer ids and `repositories` names in a saved image.
///
/// Reads like the engine does: an archive that stops on an entry boundary
/// without its end-of-archive marker is simply finished.
fn saved_image(archive: &[u8]) -> WharfResult<(Vec<String>, Repositories)> {
    let mut layers = Vec::new();
    let mut repositories = Repositories::new();
    let mut tar = tar::Archive::new(archive);
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if path == "repositories" {
            let mut raw = String::new();
            entry.read_to_string(&mut raw)?;
            repositories = serde_json::from_str(&raw)?;
        } else if let Some(layer) = path.strip_suffix("/layer.tar") {
            layers.push(layer.to_string());
        }
    }
    Ok((layers, repositories))
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> WharfResult<()> {
        Ok(())
    }

    async fn info(&self) -> WharfResult<serde_json::Value> {
        let inner = self.inner.lock();
        Ok(serde_json::json!({
            "Driver": "memory",
            "Containers": inner.containers.len(),
            "Images": inner.images.len(),
        }))
    }

    async fn list_containers(&self, all: bool) -> WharfResult<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .containers
            .values()
            .filter(|c| all || c.running)
            .map(|c| c.id.clone())
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> WharfResult<ContainerDetails> {
        let mut inner = self.inner.lock();
        inner.container(id).map(|c| c.clone())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> WharfResult<String> {
        self.record("create", &spec.name);
        let mut inner = self.inner.lock();
        if inner.find_image(&spec.image).is_none() {
            return Err(WharfError::ImageNotFound {
                reference: spec.image.clone(),
            });
        }
        if inner.containers.contains_key(&spec.name) {
            return Err(WharfError::runtime(
                "create_container",
                format!("container name {} is already in use", spec.name),
            ));
        }
        let id = inner.next_id("");
        inner.containers.insert(
            spec.name.clone(),
            ContainerDetails {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                running: false,
                paused: false,
                memory_bytes: spec.memory_bytes,
            },
        );
        inner.specs.insert(spec.name.clone(), spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> WharfResult<()> {
        self.record("start", id);
        let mut inner = self.inner.lock();
        let stuck = inner.is_stuck(id);
        let container = inner.container(id)?;
        if container.running {
            return Err(WharfError::ContainerAlreadyRunning { id: id.to_string() });
        }
        if !stuck {
            container.running = true;
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> WharfResult<()> {
        self.record("stop", id);
        let mut inner = self.inner.lock();
        let stuck = inner.is_stuck(id);
        let container = inner.container(id)?;
        if !container.running {
            return Err(WharfError::ContainerNotRunning { id: id.to_string() });
        }
        if !stuck {
            container.running = false;
            container.paused = false;
        }
        Ok(())
    }

    async fn pause_container(&self, id: &str) -> WharfResult<()> {
        self.record("pause", id);
        let mut inner = self.inner.lock();
        let stuck = inner.is_stuck(id);
        let container = inner.container(id)?;
        if !container.running {
            return Err(WharfError::runtime(
                "pause_container",
                format!("container {id} is not running"),
            ));
        }
        if !stuck {
            container.paused = true;
        }
        Ok(())
    }

    async fn unpause_container(&self, id: &str) -> WharfResult<()> {
        self.record("unpause", id);
        let mut inner = self.inner.lock();
        let stuck = inner.is_stuck(id);
        let container = inner.container(id)?;
        if !container.paused {
            return Err(WharfError::runtime(
                "unpause_container",
                format!("container {id} is not paused"),
            ));
        }
        if !stuck {
            container.paused = false;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> WharfResult<()> {
        self.record("remove", id);
        let mut inner = self.inner.lock();
        let container = inner.container(id)?;
        if container.running && !force {
            return Err(WharfError::runtime(
                "remove_container",
                format!("container {id} is running"),
            ));
        }
        let name = container.name.clone();
        inner.containers.remove(&name);
        inner.specs.remove(&name);
        Ok(())
    }

    async fn commit_container(&self, request: &CommitRequest) -> WharfResult<String> {
        self.record("commit", &request.container);
        let mut inner = self.inner.lock();
        inner.container(&request.container)?;
        let id = inner.next_id("sha256:");
        let repo_tags = request
            .repository
            .iter()
            .map(|repo| format!("{repo}:{}", request.tag.as_deref().unwrap_or("latest")))
            .collect();
        inner.images.push(RuntimeImage {
            id: id.clone(),
            repo_tags,
            size_bytes: 0,
        });
        Ok(id)
    }

    async fn list_images(&self) -> WharfResult<Vec<RuntimeImage>> {
        Ok(self.inner.lock().images.clone())
    }

    async fn inspect_image(&self, reference: &str) -> WharfResult<Option<RuntimeImage>> {
        self.record("inspect_image", reference);
        Ok(self.inner.lock().find_image(reference).cloned())
    }

    async fn remove_image(&self, reference: &str) -> WharfResult<()> {
        self.record("remove_image", reference);
        let mut inner = self.inner.lock();
        let id = inner
            .find_image(reference)
            .map(|image| image.id.clone())
            .ok_or_else(|| WharfError::ImageNotFound {
                reference: reference.to_string(),
            })?;
        inner.images.retain(|image| image.id != id);
        Ok(())
    }

    async fn load_image(&self, archive: ArchiveStream) -> WharfResult<()> {
        self.record("load", "archive");
        let rejected = self.inner.lock().load_error.clone();
        if let Some(message) = rejected {
            drop(archive);
            return Err(WharfError::runtime("load_image", message));
        }

        let (mut body, mut abort) = abortable_body(archive);
        let mut bytes = Vec::new();
        loop {
            let chunk = match future::select(body.next(), &mut abort).await {
                Either::Left((chunk, _)) => chunk,
                // Cut upload: the engine sees an unexpected EOF and keeps nothing.
                Either::Right((Ok(err), _)) => return Err(WharfError::Io(err)),
                // The sender lives inside `body`.
                Either::Right((Err(_), _)) => None,
            };
            match chunk {
                Some(chunk) => bytes.extend_from_slice(&chunk),
                None => break,
            }
        }

        let (layers, repositories) = saved_image(&bytes)?;
        let mut tagged: BTreeMap<String, Vec<String>> =
            layers.into_iter().map(|layer| (layer, Vec::new())).collect();
        for (repository, tags) in repositories {
            for (tag, layer) in tags {
                tagged.entry(layer).or_default().push(format!("{repository}:{tag}"));
            }
        }

        let mut inner = self.inner.lock();
        let size_bytes = bytes.len() as u64;
        for (layer, repo_tags) in tagged {
            for image in &mut inner.images {
                image.repo_tags.retain(|reference| !repo_tags.contains(reference));
            }
            let id = format!("sha256:{layer}");
            match inner.images.iter().position(|image| image.id == id) {
                Some(index) => inner.images[index].repo_tags.extend(repo_tags),
                None => inner.images.push(RuntimeImage {
                    id,
                    repo_tags,
                    size_bytes,
                }),
            }
        }
        inner.loads += 1;
        inner.last_archive = bytes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            hostname: name.to_string(),
            image: "imgA".to_string(),
            memory_bytes: 0,
            mac_address: None,
            open_stdin: true,
            network_mode: "none".to_string(),
            devices: Vec::new(),
        }
    }

    #[tokio::test]
    async fn start_twice_reports_already_running() {
        let runtime = FakeRuntime::new();
        runtime.add_image("imgA", 0);
        runtime.create_container(&spec("g1")).await.unwrap();
        runtime.start_container("g1").await.unwrap();
        let err = runtime.start_container("g1").await.unwrap_err();
        assert!(matches!(err, WharfError::ContainerAlreadyRunning { .. }));
    }

    #[tokio::test]
    async fn create_requires_image() {
        let runtime = FakeRuntime::new();
        let err = runtime.create_container(&spec("g1")).await.unwrap_err();
        assert!(matches!(err, WharfError::ImageNotFound { .. }));
    }

    #[tokio::test]
    async fn image_lookup_defaults_to_latest() {
        let runtime = FakeRuntime::new();
        runtime.add_image("imgA", 3);
        assert!(runtime.inspect_image("imgA").await.unwrap().is_some());
        assert!(runtime.inspect_image("imgA:latest").await.unwrap().is_some());
        assert!(runtime.inspect_image("imgA:0.1").await.unwrap().is_none());
    }

    fn tar_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, body: &[u8]) {
        let mut header = tar::Header::new_ustar();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, path, body).unwrap();
    }

    fn chunks(data: Vec<u8>, tail: Option<std::io::Error>) -> ArchiveStream {
        let mut items: Vec<std::io::Result<bytes::Bytes>> = vec![Ok(data.into())];
        items.extend(tail.map(Err));
        futures::stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn load_tags_layers_from_repositories() {
        let runtime = FakeRuntime::new();
        let mut builder = tar::Builder::new(Vec::new());
        tar_file(&mut builder, "abcd/layer.tar", &[0u8; 100]);
        tar_file(&mut builder, "repositories", br#"{"myid":{"latest":"abcd"}}"#);
        let archive = builder.into_inner().unwrap();

        runtime.load_image(chunks(archive, None)).await.unwrap();
        let image = runtime.inspect_image("myid").await.unwrap().unwrap();
        assert_eq!(image.id, "sha256:abcd");
        assert_eq!(runtime.loads(), 1);
    }

    #[tokio::test]
    async fn short_archive_loads_dangling_layers() {
        let runtime = FakeRuntime::new();
        let mut builder = tar::Builder::new(Vec::new());
        tar_file(&mut builder, "abcd/layer.tar", &[0u8; 100]);
        // No end-of-archive marker.
        let archive = builder.get_ref().clone();

        runtime.load_image(chunks(archive, None)).await.unwrap();
        let images = runtime.list_images().await.unwrap();
        assert_eq!(images.len(), 1);
        assert!(images[0].repo_tags.is_empty());
    }

    #[tokio::test]
    async fn error_item_cuts_the_load() {
        let runtime = FakeRuntime::new();
        let mut builder = tar::Builder::new(Vec::new());
        tar_file(&mut builder, "abcd/layer.tar", &[0u8; 100]);
        let archive = builder.get_ref().clone();

        let err = runtime
            .load_image(chunks(archive, Some(std::io::Error::other("bad repositories"))))
            .await
            .unwrap_err();
        assert!(matches!(err, WharfError::Io(_)));
        assert!(runtime.list_images().await.unwrap().is_empty());
        assert_eq!(runtime.loads(), 0);
    }
}

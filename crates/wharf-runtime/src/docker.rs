//! Docker Engine adapter.

use std::path::PathBuf;
use std::pin::pin;
use std::time::Duration;

use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerConfig, ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CommitContainerOptionsBuilder, CreateContainerOptionsBuilder, ImportImageOptionsBuilder,
    InspectContainerOptions, ListContainersOptionsBuilder, ListImagesOptionsBuilder,
    RemoveContainerOptionsBuilder, RemoveImageOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::future::{self, Either};
use futures::TryStreamExt;
use wharf_common::{WharfError, WharfResult};

use crate::adapter::{
    ArchiveStream, CommitRequest, ContainerRuntime, ContainerSpec, abortable_body,
};
use crate::state::{ContainerDetails, RuntimeImage};

/// Docker connection options.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Engine endpoint: `unix://`, `tcp://` or `http://`.
    pub endpoint: String,
    /// Directory holding `ca.pem`, `cert.pem` and `key.pem` for TLS.
    pub tls_cert_path: Option<PathBuf>,
    /// Per-request timeout (seconds).
    pub timeout: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: "unix:///var/run/docker.sock".to_string(),
            tls_cert_path: None,
            timeout: 120,
        }
    }
}

impl DockerConfig {
    /// Set the engine endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Use TLS with the certificates in `path`.
    #[must_use]
    pub fn with_tls(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_cert_path = Some(path.into());
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the engine and make sure it answers.
    ///
    /// # Errors
    ///
    /// Returns [`WharfError::Config`] if the client cannot be built and a
    /// runtime error if the engine does not answer a ping.
    pub async fn connect(config: &DockerConfig) -> WharfResult<Self> {
        tracing::debug!(endpoint = %config.endpoint, tls = config.tls_cert_path.is_some(), "Connecting to docker");

        let docker = if config.endpoint.starts_with("unix://") {
            Docker::connect_with_unix(&config.endpoint, config.timeout, API_DEFAULT_VERSION)
        } else if let Some(certs) = &config.tls_cert_path {
            Docker::connect_with_ssl(
                &config.endpoint,
                &certs.join("key.pem"),
                &certs.join("cert.pem"),
                &certs.join("ca.pem"),
                config.timeout,
                API_DEFAULT_VERSION,
            )
        } else {
            Docker::connect_with_http(&config.endpoint, config.timeout, API_DEFAULT_VERSION)
        }
        .map_err(|e| WharfError::Config {
            message: format!("Failed to create docker client for {}: {}", config.endpoint, e),
        })?;

        let runtime = Self { docker };
        runtime.ping().await?;
        Ok(runtime)
    }
}

fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn container_error(operation: &str, id: &str, err: BollardError) -> WharfError {
    match status_code(&err) {
        Some(404) => WharfError::ContainerNotFound { id: id.to_string() },
        _ => WharfError::runtime(operation, err),
    }
}

fn image_error(operation: &str, reference: &str, err: BollardError) -> WharfError {
    match status_code(&err) {
        Some(404) => WharfError::ImageNotFound {
            reference: reference.to_string(),
        },
        _ => WharfError::runtime(operation, err),
    }
}

fn non_negative(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> WharfResult<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| WharfError::runtime("ping", e))?;
        Ok(())
    }

    async fn info(&self) -> WharfResult<serde_json::Value> {
        let info = self
            .docker
            .info()
            .await
            .map_err(|e| WharfError::runtime("info", e))?;
        Ok(serde_json::to_value(info)?)
    }

    async fn list_containers(&self, all: bool) -> WharfResult<Vec<String>> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptionsBuilder::new().all(all).build()))
            .await
            .map_err(|e| WharfError::runtime("list_containers", e))?;
        Ok(summaries.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect_container(&self, id: &str) -> WharfResult<ContainerDetails> {
        tracing::debug!(container = id, "Inspecting container");
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| container_error("inspect_container", id, e))?;

        let state = response.state.unwrap_or_default();
        Ok(ContainerDetails {
            id: response.id.unwrap_or_default(),
            name: response
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: response
                .config
                .and_then(|c| c.image)
                .or(response.image)
                .unwrap_or_default(),
            running: state.running.unwrap_or(false),
            paused: state.paused.unwrap_or(false),
            memory_bytes: non_negative(response.host_config.and_then(|h| h.memory)),
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> WharfResult<String> {
        tracing::debug!(container = %spec.name, image = %spec.image, "Creating container");
        let devices = spec
            .devices
            .iter()
            .map(|d| bollard::models::DeviceMapping {
                path_on_host: Some(d.path_on_host.clone()),
                path_in_container: Some(d.path_in_container.clone()),
                cgroup_permissions: Some(d.cgroup_permissions.clone()),
            })
            .collect();

        let body = ContainerCreateBody {
            hostname: Some(spec.hostname.clone()),
            image: Some(spec.image.clone()),
            open_stdin: Some(spec.open_stdin),
            mac_address: spec.mac_address.clone(),
            host_config: Some(HostConfig {
                network_mode: Some(spec.network_mode.clone()),
                memory: (spec.memory_bytes > 0)
                    .then(|| i64::try_from(spec.memory_bytes).unwrap_or(i64::MAX)),
                devices: Some(devices),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                body,
            )
            .await
            .map_err(|e| image_error("create_container", &spec.image, e))?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, warning = %warning, "Docker create warning");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> WharfResult<()> {
        tracing::debug!(container = id, "Starting container");
        match self
            .docker
            .start_container(id, None::<StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(304) => {
                Err(WharfError::ContainerAlreadyRunning { id: id.to_string() })
            }
            Err(e) => Err(container_error("start_container", id, e)),
        }
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> WharfResult<()> {
        tracing::debug!(container = id, grace_secs = grace.as_secs(), "Stopping container");
        let grace = i32::try_from(grace.as_secs()).unwrap_or(i32::MAX);
        match self
            .docker
            .stop_container(id, Some(StopContainerOptionsBuilder::new().t(grace).build()))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(304) => {
                Err(WharfError::ContainerNotRunning { id: id.to_string() })
            }
            Err(e) => Err(container_error("stop_container", id, e)),
        }
    }

    async fn pause_container(&self, id: &str) -> WharfResult<()> {
        self.docker
            .pause_container(id)
            .await
            .map_err(|e| container_error("pause_container", id, e))
    }

    async fn unpause_container(&self, id: &str) -> WharfResult<()> {
        self.docker
            .unpause_container(id)
            .await
            .map_err(|e| container_error("unpause_container", id, e))
    }

    async fn remove_container(&self, id: &str, force: bool) -> WharfResult<()> {
        tracing::debug!(container = id, force, "Removing container");
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptionsBuilder::new().force(force).build()),
            )
            .await
            .map_err(|e| container_error("remove_container", id, e))
    }

    async fn commit_container(&self, request: &CommitRequest) -> WharfResult<String> {
        tracing::debug!(container = %request.container, "Committing container");
        let mut options = CommitContainerOptionsBuilder::new()
            .container(&request.container)
            .pause(request.pause);
        if let Some(repository) = &request.repository {
            options = options.repo(repository);
        }
        if let Some(tag) = &request.tag {
            options = options.tag(tag);
        }
        if let Some(message) = &request.message {
            options = options.comment(message);
        }
        if let Some(author) = &request.author {
            options = options.author(author);
        }

        let response = self
            .docker
            .commit_container(options.build(), ContainerConfig::default())
            .await
            .map_err(|e| container_error("commit_container", &request.container, e))?;
        Ok(response.id)
    }

    async fn list_images(&self) -> WharfResult<Vec<RuntimeImage>> {
        let summaries = self
            .docker
            .list_images(Some(ListImagesOptionsBuilder::new().build()))
            .await
            .map_err(|e| WharfError::runtime("list_images", e))?;
        Ok(summaries
            .into_iter()
            .map(|s| RuntimeImage {
                id: s.id,
                repo_tags: s.repo_tags,
                size_bytes: non_negative(Some(s.size)),
            })
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> WharfResult<Option<RuntimeImage>> {
        tracing::debug!(image = reference, "Inspecting image");
        match self.docker.inspect_image(reference).await {
            Ok(image) => Ok(Some(RuntimeImage {
                id: image.id.unwrap_or_default(),
                repo_tags: image.repo_tags.unwrap_or_default(),
                size_bytes: non_negative(image.size),
            })),
            Err(e) if status_code(&e) == Some(404) => Ok(None),
            Err(e) => Err(WharfError::runtime("inspect_image", e)),
        }
    }

    async fn remove_image(&self, reference: &str) -> WharfResult<()> {
        tracing::debug!(image = reference, "Removing image");
        self.docker
            .remove_image(reference, Some(RemoveImageOptionsBuilder::new().build()), None)
            .await
            .map_err(|e| image_error("remove_image", reference, e))?;
        Ok(())
    }

    async fn load_image(&self, archive: ArchiveStream) -> WharfResult<()> {
        let (body, abort) = abortable_body(archive);
        let import = pin!(
            self.docker
                .import_image_stream(ImportImageOptionsBuilder::new().quiet(true).build(), body, None)
                .try_collect::<Vec<_>>()
        );

        let progress = match future::select(import, abort).await {
            Either::Left((progress, _)) => progress,
            // Dropping the request cuts the upload mid-body.
            Either::Right((Ok(err), _)) => {
                tracing::debug!(error = %err, "Aborting image load");
                return Err(WharfError::Io(err));
            }
            Either::Right((Err(_), import)) => import.await,
        };

        let progress = progress.map_err(|e| WharfError::runtime("load_image", e))?;
        if let Some(message) = progress.into_iter().find_map(|info| info.error) {
            return Err(WharfError::runtime("load_image", message));
        }
        Ok(())
    }
}

//! Routing of RPC methods to the guest and image managers.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use wharf::GuestManager;
use wharf_common::{Guest, WharfError};
use wharf_image::ImageManager;
use wharf_runtime::{CommitRequest, ContainerRuntime};

use super::types::{
    ContainerRequest, ContainerResponse, GuestRequest, GuestResponse, ImageRequest, ImageResponse,
    ListOptions, RpcRequest, RpcResponse,
};

/// Failures reported in the error envelope.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No such method.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// The parameters do not fit the method's request type.
    #[error("Invalid params for {method}: {message}")]
    InvalidParams {
        /// Method name.
        method: String,
        /// Decoder message.
        message: String,
    },

    /// The operation failed.
    #[error(transparent)]
    Wharf(#[from] WharfError),
}

type RpcResult = Result<Value, RpcError>;

/// Methods taking and returning a guest.
const LIFECYCLE_METHODS: [&str; 8] = [
    "CreateContainer",
    "StartContainer",
    "StopContainer",
    "RestartContainer",
    "RebootContainer",
    "PauseContainer",
    "UnpauseContainer",
    "DeleteContainer",
];

fn params<T: DeserializeOwned + Default>(method: &str, argument: Value) -> Result<T, RpcError> {
    if argument.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(argument).map_err(|e| RpcError::InvalidParams {
        method: method.to_string(),
        message: e.to_string(),
    })
}

fn reply<T: Serialize>(response: &T) -> RpcResult {
    serde_json::to_value(response).map_err(|e| RpcError::Wharf(e.into()))
}

/// Everything a request handler needs.
#[derive(Clone)]
pub struct Agent {
    runtime: Arc<dyn ContainerRuntime>,
    guests: GuestManager,
    images: ImageManager,
}

impl Agent {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, guests: GuestManager, images: ImageManager) -> Self {
        Self {
            runtime,
            guests,
            images,
        }
    }

    /// Run one request and wrap the outcome in a response envelope.
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let argument = request.argument();
        match self.call(&request.method, argument).await {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(error) => {
                tracing::warn!(method = %request.method, error = %error, "RPC call failed");
                RpcResponse::failure(request.id, error)
            }
        }
    }

    /// Dispatch `method`; any `Service.` prefix is ignored.
    pub async fn call(&self, method: &str, argument: Value) -> RpcResult {
        let name = method.rsplit_once('.').map_or(method, |(_, name)| name);
        tracing::debug!(method = name, "Dispatching RPC call");

        match name {
            "ListContainers" => {
                let request: ContainerRequest<ListOptions> = params(name, argument)?;
                let containers = self.guests.list(request.opts.all).await?;
                reply(&ContainerResponse { containers })
            }
            "GetContainer" => {
                let request: ContainerRequest<ListOptions> = params(name, argument)?;
                let container = self.guests.get(&request.id).await?;
                reply(&ContainerResponse {
                    containers: vec![container],
                })
            }
            "SaveContainer" => {
                let mut request: ContainerRequest<CommitRequest> = params(name, argument)?;
                if !request.id.is_empty() {
                    request.opts.container = request.id;
                }
                let image = self.guests.save(&request.opts).await?;
                reply(&ImageResponse {
                    images: vec![image],
                })
            }
            name if LIFECYCLE_METHODS.contains(&name) => {
                let request: GuestRequest = params(name, argument)?;
                let guest = self.lifecycle(name, request.into_guest()).await?;
                reply(&GuestResponse { guest })
            }
            "ListImages" => {
                let images = self.images.list().await?;
                reply(&ImageResponse { images })
            }
            "GetImage" => {
                let request: ImageRequest = params(name, argument)?;
                let image = self.images.get(&request.id).await?;
                reply(&ImageResponse {
                    images: vec![image],
                })
            }
            "LoadImage" => {
                let request: ImageRequest = params(name, argument)?;
                let image = self.images.import(&request.id).await?;
                reply(&ImageResponse {
                    images: vec![image],
                })
            }
            "DeleteImage" => {
                let request: ImageRequest = params(name, argument)?;
                let image = self.images.delete(&request.id).await?;
                reply(&ImageResponse {
                    images: vec![image],
                })
            }
            "GetInfo" => Ok(self.runtime.info().await?),
            _ => Err(RpcError::UnknownMethod(method.to_string())),
        }
    }

    async fn lifecycle(&self, name: &str, guest: Guest) -> Result<Guest, RpcError> {
        let guests = &self.guests;
        let guest = match name {
            "CreateContainer" => guests.create(guest).await?,
            "StartContainer" => guests.start(guest).await?,
            "StopContainer" => guests.stop(guest).await?,
            "RestartContainer" => guests.restart(guest).await?,
            "RebootContainer" => guests.reboot(guest).await?,
            "PauseContainer" => guests.pause(guest).await?,
            "UnpauseContainer" => guests.unpause(guest).await?,
            "DeleteContainer" => guests.delete(guest).await?,
            _ => return Err(RpcError::UnknownMethod(name.to_string())),
        };
        Ok(guest)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use serde_json::json;
    use wharf::LifecycleConfig;
    use wharf_common::WharfResult;
    use wharf_image::ImageSource;
    use wharf_network::testing::FakeSwitch;
    use wharf_network::{CommandRunner, PortProvisioner};
    use wharf_runtime::ArchiveStream;
    use wharf_runtime::testing::FakeRuntime;

    use super::*;

    /// Serves a one-file saved image for any id.
    struct StaticSource;

    #[async_trait]
    impl ImageSource for StaticSource {
        async fn fetch(&self, _id: &str) -> WharfResult<ArchiveStream> {
            let body = br#"{"busybox":{"latest":"abcd"}}"#;
            let mut builder = tar::Builder::new(Vec::new());
            let mut header = tar::Header::new_ustar();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            builder.append_data(&mut header, "repositories", &body[..])?;
            let archive = builder.into_inner()?;
            Ok(futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from(archive))]).boxed())
        }
    }

    fn agent() -> (Agent, Arc<FakeSwitch>) {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_image("imgA", 0);
        let switch = Arc::new(FakeSwitch::new());
        let runtime: Arc<dyn ContainerRuntime> = runtime;
        let guests = GuestManager::new(
            Arc::clone(&runtime),
            PortProvisioner::new(Arc::clone(&switch) as Arc<dyn CommandRunner>),
            LifecycleConfig::default(),
        );
        let images = ImageManager::new(Arc::clone(&runtime), Arc::new(StaticSource));
        (Agent::new(runtime, guests, images), switch)
    }

    fn guest() -> Value {
        json!({
            "guest": {
                "id": "g1",
                "type": "container",
                "image": "imgA",
                "memory": 256,
                "nics": [{"name": "eth0", "network": "net0", "mac": "C0:B6:C5:EA:93:AC", "vlans": [3]}]
            }
        })
    }

    async fn call(agent: &Agent, method: &str, params: Value) -> RpcResponse {
        let request: RpcRequest =
            serde_json::from_value(json!({"method": method, "params": [params], "id": 1})).unwrap();
        agent.handle(request).await
    }

    #[tokio::test]
    async fn guest_lifecycle_over_rpc() {
        let (agent, switch) = agent();

        let created = call(&agent, "MDocker.CreateContainer", guest()).await;
        assert_eq!(created.error, None);
        assert_eq!(created.result["guest"]["state"], "stopped");

        let started = call(&agent, "MDocker.StartContainer", guest()).await;
        assert_eq!(started.result["guest"]["state"], "running");
        assert_eq!(switch.ports_of("g1")[0].trunks, vec![3]);

        let listed = call(&agent, "MDocker.ListContainers", json!({})).await;
        assert_eq!(listed.result["containers"].as_array().unwrap().len(), 1);

        let paused = call(&agent, "MDocker.PauseContainer", guest()).await;
        assert_eq!(paused.result["guest"]["state"], "paused");
        let resumed = call(&agent, "MDocker.UnpauseContainer", guest()).await;
        assert_eq!(resumed.result["guest"]["state"], "running");
        let rebooted = call(&agent, "MDocker.RebootContainer", guest()).await;
        assert_eq!(rebooted.result["guest"]["state"], "running");
        let restarted = call(&agent, "MDocker.RestartContainer", guest()).await;
        assert_eq!(restarted.result["guest"]["state"], "running");

        let stopped = call(&agent, "MDocker.StopContainer", guest()).await;
        assert_eq!(stopped.result["guest"]["state"], "stopped");
        assert!(switch.ports().is_empty());

        let fetched = call(&agent, "MDocker.GetContainer", json!({"id": "g1"})).await;
        assert_eq!(fetched.result["containers"][0]["name"], "g1");

        let saved = call(&agent, "MDocker.SaveContainer", json!({"id": "g1", "opts": {"repository": "snap"}})).await;
        assert_eq!(saved.result["images"][0]["type"], "container");

        let deleted = call(&agent, "MDocker.DeleteContainer", guest()).await;
        assert_eq!(deleted.result["guest"]["state"], "deleted");

        let missing = call(&agent, "MDocker.GetContainer", json!({"id": "g1"})).await;
        assert_eq!(missing.result, Value::Null);
        assert_eq!(missing.error.as_deref(), Some("Container not found: g1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn images_over_rpc() {
        let (agent, _) = agent();

        let loaded = call(&agent, "LoadImage", json!({"id": "img9"})).await;
        assert_eq!(loaded.error, None);
        assert_eq!(loaded.result["images"][0]["id"], "img9");

        let listed = call(&agent, "ListImages", json!({})).await;
        assert_eq!(listed.result["images"].as_array().unwrap().len(), 2);

        let fetched = call(&agent, "GetImage", json!({"id": "img9"})).await;
        assert_eq!(fetched.result["images"][0]["id"], "img9");

        let deleted = call(&agent, "DeleteImage", json!({"id": "img9"})).await;
        assert_eq!(deleted.result["images"][0]["id"], "img9");
        let gone = call(&agent, "GetImage", json!({"id": "img9"})).await;
        assert_eq!(gone.error.as_deref(), Some("Image not found: img9"));
    }

    #[tokio::test]
    async fn info_passes_through() {
        let (agent, _) = agent();
        let info = call(&agent, "MDocker.GetInfo", json!({})).await;
        assert_eq!(info.result["Images"], 1);
    }

    #[tokio::test]
    async fn missing_guest_is_rejected() {
        let (agent, switch) = agent();
        let response = call(&agent, "MDocker.StartContainer", json!({})).await;
        assert_eq!(response.error.as_deref(), Some("Missing guest with id"));
        assert!(switch.commands().is_empty());
    }

    #[tokio::test]
    async fn bad_requests_get_error_envelopes() {
        let (agent, _) = agent();

        let unknown = call(&agent, "MDocker.Frobnicate", json!({})).await;
        insta::assert_snapshot!(
            serde_json::to_string(&unknown).unwrap(),
            @r#"{"result":null,"error":"Unknown method: MDocker.Frobnicate","id":1}"#
        );

        let malformed = call(&agent, "MDocker.CreateContainer", json!({"guest": 5})).await;
        assert!(malformed.error.unwrap().starts_with("Invalid params for CreateContainer"));
    }
}

//! Wire types of the RPC surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wharf_common::{Guest, Image};
use wharf_runtime::ContainerDetails;

/// A JSON-RPC 1.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// `Service.Method`.
    pub method: String,
    /// Positional parameters; only the first is used.
    #[serde(default)]
    pub params: Value,
    /// Caller correlation id, echoed back.
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    /// The single request argument, whether sent bare or wrapped in an array.
    pub fn argument(&self) -> Value {
        match &self.params {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        }
    }
}

/// A JSON-RPC 1.0 response; exactly one of `result` and `error` is non-null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    /// Method result.
    pub result: Value,
    /// Error message.
    pub error: Option<String>,
    /// Correlation id of the request.
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            result,
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: impl ToString) -> Self {
        Self {
            result: Value::Null,
            error: Some(error.to_string()),
            id,
        }
    }
}

/// Request naming a guest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuestRequest {
    /// The guest; a missing guest fails validation like an empty id.
    #[serde(default)]
    pub guest: Option<Guest>,
}

impl GuestRequest {
    pub fn into_guest(self) -> Guest {
        self.guest.unwrap_or_default()
    }
}

/// Response carrying a guest annotated with its state.
#[derive(Debug, Clone, Serialize)]
pub struct GuestResponse {
    /// The guest.
    pub guest: Guest,
}

/// Request naming a container, with per-method options.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerRequest<O = ListOptions> {
    /// Container id or name.
    #[serde(default)]
    pub id: String,
    /// Method options.
    #[serde(default)]
    pub opts: O,
}

/// Options of `ListContainers`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListOptions {
    /// Include stopped containers.
    #[serde(default, alias = "All")]
    pub all: bool,
}

/// Response carrying containers.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerResponse {
    /// Inspected containers.
    pub containers: Vec<ContainerDetails>,
}

/// Request naming an image.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageRequest {
    /// Image id.
    #[serde(default)]
    pub id: String,
}

/// Response carrying images.
#[derive(Debug, Clone, Serialize)]
pub struct ImageResponse {
    /// Image records.
    pub images: Vec<Image>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn argument_unwraps_params_array() {
        let request: RpcRequest = serde_json::from_value(json!({
            "method": "MDocker.GetImage",
            "params": [{"id": "imgA"}],
            "id": 7
        }))
        .unwrap();
        assert_eq!(request.argument(), json!({"id": "imgA"}));

        let bare: RpcRequest =
            serde_json::from_value(json!({"method": "GetInfo", "params": {"id": "x"}})).unwrap();
        assert_eq!(bare.argument(), json!({"id": "x"}));
        assert_eq!(bare.id, Value::Null);
    }

    #[test]
    fn envelope_wire_format() {
        let ok = serde_json::to_string(&RpcResponse::success(json!(1), json!({"images": []}))).unwrap();
        insta::assert_snapshot!(ok, @r#"{"result":{"images":[]},"error":null,"id":1}"#);

        let err = serde_json::to_string(&RpcResponse::failure(json!(2), "Missing guest with id")).unwrap();
        insta::assert_snapshot!(err, @r#"{"result":null,"error":"Missing guest with id","id":2}"#);
    }

    #[test]
    fn list_options_accept_either_case() {
        let lower: ContainerRequest = serde_json::from_value(json!({"opts": {"all": true}})).unwrap();
        let upper: ContainerRequest = serde_json::from_value(json!({"opts": {"All": true}})).unwrap();
        assert!(lower.opts.all && upper.opts.all);
    }
}

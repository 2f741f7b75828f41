use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use crate::rpc::{Agent, RpcRequest, RpcResponse};

/// Path the orchestrator posts RPC requests to.
pub const RPC_PATH: &str = "/_mistify_RPC_";

pub fn app(agent: Arc<Agent>) -> Router {
    Router::new()
        .route(RPC_PATH, post(rpc))
        .with_state(agent)
}

async fn rpc(State(agent): State<Arc<Agent>>, body: Bytes) -> Json<RpcResponse> {
    match serde_json::from_slice::<RpcRequest>(&body) {
        Ok(request) => Json(agent.handle(request).await),
        Err(e) => {
            tracing::warn!(error = %e, "Malformed RPC request");
            Json(RpcResponse::failure(Value::Null, format!("Malformed request: {e}")))
        }
    }
}

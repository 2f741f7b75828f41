//! JSON-RPC surface of the agent.

mod dispatch;
pub mod types;

pub use dispatch::Agent;
pub use types::{RpcRequest, RpcResponse};

//! HTTP transport.

pub mod server;

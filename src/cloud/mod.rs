//! Cloud API Module
//!
//! REST transport for the control-plane API.

pub mod auth;
pub mod client;
pub mod http;
pub mod rpc;

pub use client::{CloudClient, Endpoint};
pub use rpc::{Rpc, RpcMethod, RpcRequest};

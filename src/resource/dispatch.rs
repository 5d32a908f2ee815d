//! Request dispatch
//!
//! Maps a resource definition plus an abstract call onto the concrete REST
//! request. Nothing here performs I/O.

use super::registry::{ResourceDef, ScopeKind};
use crate::cloud::rpc::{RpcMethod, RpcRequest};
use serde_json::Value;

/// Page size for list calls
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

fn request(def: &ResourceDef, method: RpcMethod) -> RpcRequest {
    RpcRequest::new(def.service.as_str(), def.collection.as_str(), method)
}

/// Get one object by id
pub fn get(def: &ResourceDef, id: &str) -> RpcRequest {
    def.get_params
        .iter()
        .fold(request(def, RpcMethod::Get).with_id(id), |req, (k, v)| {
            req.with_query(k.as_str(), v.as_str())
        })
}

/// List objects of a kind inside one scope, optionally filtered by name
pub fn list(def: &ResourceDef, scope: Option<(ScopeKind, &str)>, name: Option<&str>) -> RpcRequest {
    let mut req = request(def, RpcMethod::List);
    if let Some((kind, id)) = scope {
        req = req.with_query(kind.param(), id);
    }
    if let Some(name) = name {
        req = req.with_query("filter", name_filter(name));
    }
    req.with_query("pageSize", DEFAULT_PAGE_SIZE.to_string())
}

/// `name="..."` filter expression, with quotes and backslashes escaped
pub fn name_filter(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("name=\"{}\"", escaped)
}

pub fn create(def: &ResourceDef, body: Value) -> RpcRequest {
    request(def, RpcMethod::Create).with_body(body)
}

pub fn update(def: &ResourceDef, id: &str, body: Value) -> RpcRequest {
    request(def, RpcMethod::Update).with_id(id).with_body(body)
}

pub fn delete(def: &ResourceDef, id: &str) -> RpcRequest {
    request(def, RpcMethod::Delete).with_id(id)
}

pub fn list_access_bindings(def: &ResourceDef, id: &str) -> RpcRequest {
    request(def, RpcMethod::ListAccessBindings)
        .with_id(id)
        .with_query("pageSize", DEFAULT_PAGE_SIZE.to_string())
}

pub fn update_access_bindings(def: &ResourceDef, id: &str, body: Value) -> RpcRequest {
    request(def, RpcMethod::UpdateAccessBindings)
        .with_id(id)
        .with_body(body)
}

pub fn set_access_bindings(def: &ResourceDef, id: &str, body: Value) -> RpcRequest {
    request(def, RpcMethod::SetAccessBindings)
        .with_id(id)
        .with_body(body)
}

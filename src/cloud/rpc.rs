//! RPC boundary
//!
//! The core never talks HTTP directly. It builds an [`RpcRequest`] and hands
//! it to an [`Rpc`] implementation: the REST client in production, an
//! in-memory stub in tests.

use crate::error::RpcError;
use async_trait::async_trait;
use serde_json::Value;

/// Service host of the operation API
pub const OPERATION_SERVICE: &str = "operation";

/// Control-plane call kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    Create,
    Get,
    Update,
    Delete,
    List,
    GetOperation,
    ListAccessBindings,
    UpdateAccessBindings,
    SetAccessBindings,
}

impl RpcMethod {
    pub fn http_method(&self) -> reqwest::Method {
        match self {
            RpcMethod::Create
            | RpcMethod::UpdateAccessBindings
            | RpcMethod::SetAccessBindings => reqwest::Method::POST,
            RpcMethod::Get
            | RpcMethod::List
            | RpcMethod::GetOperation
            | RpcMethod::ListAccessBindings => reqwest::Method::GET,
            RpcMethod::Update => reqwest::Method::PATCH,
            RpcMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// Custom-method suffix of the REST mapping (`/{id}:suffix`)
    fn verb(&self) -> Option<&'static str> {
        match self {
            RpcMethod::ListAccessBindings => Some("listAccessBindings"),
            RpcMethod::UpdateAccessBindings => Some("updateAccessBindings"),
            RpcMethod::SetAccessBindings => Some("setAccessBindings"),
            _ => None,
        }
    }
}

/// One control-plane call
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    /// Endpoint host prefix (`compute`, `operation`, ...)
    pub service: String,
    /// Collection path below the host (`compute/v1/instanceGroups`)
    pub collection: String,
    pub method: RpcMethod,
    /// Object id for per-object methods
    pub id: Option<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RpcRequest {
    pub fn new(service: impl Into<String>, collection: impl Into<String>, method: RpcMethod) -> Self {
        Self {
            service: service.into(),
            collection: collection.into(),
            method,
            id: None,
            query: Vec::new(),
            body: None,
        }
    }

    /// Status poll of a long-running operation
    pub fn get_operation(operation_id: &str) -> Self {
        Self::new(OPERATION_SERVICE, "operations", RpcMethod::GetOperation).with_id(operation_id)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Query value by key
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Path of the REST mapping, without host and query
    pub fn path(&self) -> String {
        let mut path = format!("/{}", self.collection.trim_matches('/'));
        if let Some(id) = &self.id {
            path.push('/');
            path.push_str(&urlencoding::encode(id));
        }
        if let Some(verb) = self.method.verb() {
            path.push(':');
            path.push_str(verb);
        }
        path
    }

    /// Short label for logs
    pub fn describe(&self) -> String {
        format!("{:?} {}", self.method, self.path())
    }
}

/// Opaque request/response transport
#[async_trait]
pub trait Rpc: Send + Sync {
    async fn invoke(&self, request: RpcRequest) -> Result<Value, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_paths() {
        let get = RpcRequest::new("compute", "compute/v1/instanceGroups", RpcMethod::Get).with_id("cl1abc");
        assert_eq!(get.path(), "/compute/v1/instanceGroups/cl1abc");
        assert_eq!(get.method.http_method(), reqwest::Method::GET);

        let bindings = RpcRequest::new("resource-manager", "resource-manager/v1/clouds", RpcMethod::UpdateAccessBindings)
            .with_id("b1g");
        assert_eq!(bindings.path(), "/resource-manager/v1/clouds/b1g:updateAccessBindings");
        assert_eq!(bindings.method.http_method(), reqwest::Method::POST);

        let op = RpcRequest::get_operation("op1");
        assert_eq!(op.service, OPERATION_SERVICE);
        assert_eq!(op.path(), "/operations/op1");

        let list = RpcRequest::new("iam", "iam/v1/serviceAccounts", RpcMethod::List);
        assert_eq!(list.path(), "/iam/v1/serviceAccounts");
    }

    #[test]
    fn test_update_is_patch() {
        assert_eq!(RpcMethod::Update.http_method(), reqwest::Method::PATCH);
        assert_eq!(RpcMethod::Delete.http_method(), reqwest::Method::DELETE);
    }
}

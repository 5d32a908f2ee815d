//! Provider context
//!
//! Everything a core call needs besides its inputs: the transport, default
//! scopes, timeouts and retry schedules. Built once from
//! [`ProviderConfig`](crate::config::ProviderConfig) and passed by reference.

use crate::cancel::{guard, CancellationToken, Deadline};
use crate::cloud::rpc::{Rpc, RpcRequest};
use crate::config::{ProviderConfig, TimeoutConfig, DEFAULT_MUTATE_TIMEOUT, DEFAULT_READ_TIMEOUT};
use crate::error::{ProviderError, Result};
use crate::iam::PolicyRetry;
use crate::operation::{Operation, OperationWaiter, PollPolicy};
use crate::resource::registry::ResourceDef;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle step a timeout applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

#[derive(Clone)]
pub struct ProviderContext {
    pub rpc: Arc<dyn Rpc>,
    pub cloud_id: Option<String>,
    pub folder_id: Option<String>,
    pub timeouts: TimeoutConfig,
    pub poll: PollPolicy,
    pub policy_retry: PolicyRetry,
}

impl ProviderContext {
    /// Context with default schedules and no default scopes
    pub fn new(rpc: Arc<dyn Rpc>) -> Self {
        Self {
            rpc,
            cloud_id: None,
            folder_id: None,
            timeouts: TimeoutConfig::default(),
            poll: PollPolicy::default(),
            policy_retry: PolicyRetry::default(),
        }
    }

    pub fn from_config(config: &ProviderConfig, rpc: Arc<dyn Rpc>) -> Self {
        Self {
            rpc,
            cloud_id: config.cloud_id.clone(),
            folder_id: config.folder_id.clone(),
            timeouts: config.timeouts.clone(),
            poll: config.poll_policy(),
            policy_retry: config.policy_retry(),
        }
    }

    pub fn with_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    pub fn with_cloud(mut self, cloud_id: impl Into<String>) -> Self {
        self.cloud_id = Some(cloud_id.into());
        self
    }

    /// Timeout for one step: config override, then the kind's table, then the default
    pub fn timeout(&self, action: Action, def: &ResourceDef) -> Duration {
        let (configured, table, fallback) = match action {
            Action::Create => (self.timeouts.create, def.create_timeout(), DEFAULT_MUTATE_TIMEOUT),
            Action::Read => (self.timeouts.read, def.read_timeout(), DEFAULT_READ_TIMEOUT),
            Action::Update => (self.timeouts.update, def.update_timeout(), DEFAULT_MUTATE_TIMEOUT),
            Action::Delete => (self.timeouts.delete, def.delete_timeout(), DEFAULT_MUTATE_TIMEOUT),
        };
        configured.map(Duration::from_secs).or(table).unwrap_or(fallback)
    }

    /// Dispatch one RPC under the caller's deadline and cancellation token
    pub async fn call(
        &self,
        action: &str,
        request: RpcRequest,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        tracing::debug!("{}: {}", action, request.describe());
        guard(self.rpc.invoke(request), deadline, cancel)
            .await
            .map_err(|i| i.into_error(action, None, deadline))?
            .map_err(|e| ProviderError::rpc(action, e))
    }

    /// Dispatch a mutating RPC and wait for the operation it starts
    pub async fn call_and_wait(
        &self,
        action: &str,
        request: RpcRequest,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Result<Operation> {
        let answer = self.call(action, request, deadline, cancel).await?;
        let operation = Operation::from_json(answer, action)?;
        tracing::info!("{}: started operation {}", action, operation.id);
        self.waiter().wait(operation, action, deadline, cancel).await
    }

    pub fn waiter(&self) -> OperationWaiter<'_> {
        OperationWaiter::new(self.rpc.as_ref(), self.poll)
    }
}

//! Operation Waiter
//!
//! Mutating calls return a long-running [`Operation`]. The waiter polls it
//! with exponential backoff until it is done, the deadline passes, or the
//! caller cancels. Polling runs inline on the caller's task, so dropping the
//! future stops it.

use crate::cancel::{guard, CancellationToken, Deadline};
use crate::cloud::rpc::{Rpc, RpcRequest};
use crate::error::{ProviderError, Result, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Failure recorded on a finished operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationError {
    pub code: i64,
    pub message: String,
    pub details: Vec<Value>,
}

/// Long-running operation handle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Operation {
    pub id: String,
    pub description: String,
    pub created_at: Option<String>,
    pub created_by: Option<String>,
    pub modified_at: Option<String>,
    pub done: bool,
    pub metadata: Option<Value>,
    pub response: Option<Value>,
    pub error: Option<OperationError>,
}

impl Operation {
    /// Parse a mutating call's answer
    pub fn from_json(value: Value, action: &str) -> Result<Self> {
        let operation: Operation = serde_json::from_value(value).map_err(|e| {
            ProviderError::mismatch(action, "operation object", e.to_string())
        })?;
        if operation.id.is_empty() && !operation.done {
            return Err(ProviderError::mismatch(
                action,
                "operation object",
                "pending operation without id",
            ));
        }
        Ok(operation)
    }

    /// Response payload; `Null` for operations that return nothing
    pub fn payload(&self) -> Value {
        self.response.clone().unwrap_or(Value::Null)
    }

    /// Id of the object the operation acted on
    ///
    /// The response id wins; `metadata_field` (for example
    /// `instanceGroupId`) is the fallback for operations whose response is
    /// empty or not yet available.
    pub fn object_id(&self, metadata_field: Option<&str>) -> Option<String> {
        let from_response = self
            .response
            .as_ref()
            .and_then(|r| r.get("id"))
            .and_then(|v| v.as_str());
        let from_metadata = metadata_field.and_then(|field| {
            self.metadata
                .as_ref()
                .and_then(|m| m.get(field))
                .and_then(|v| v.as_str())
        });
        from_response.or(from_metadata).map(|s| s.to_string())
    }

    /// Error for a finished, failed operation
    fn failure(&self) -> Option<ProviderError> {
        self.error.as_ref().map(|e| ProviderError::RemoteOperationFailed {
            operation_id: self.id.clone(),
            description: self.description.clone(),
            code: StatusCode::from_grpc(e.code),
            message: e.message.clone(),
        })
    }
}

/// Backoff schedule between status polls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 1.5,
            max_interval: Duration::from_secs(10),
        }
    }
}

impl PollPolicy {
    /// Interval after `current`; anything past the cap, or not representable, is the cap
    pub fn next_interval(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .map_or(self.max_interval, |next| next.min(self.max_interval))
    }
}

/// Drives operations to completion
pub struct OperationWaiter<'a> {
    rpc: &'a dyn Rpc,
    policy: PollPolicy,
}

impl<'a> OperationWaiter<'a> {
    pub fn new(rpc: &'a dyn Rpc, policy: PollPolicy) -> Self {
        Self { rpc, policy }
    }

    /// Wait until `operation` is done and return its final state
    ///
    /// A failed operation surfaces as [`ProviderError::RemoteOperationFailed`]
    /// with the remote code and message unchanged.
    pub async fn wait(
        &self,
        operation: Operation,
        action: &str,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Result<Operation> {
        let mut current = operation;
        let mut interval = self.policy.initial_interval;
        let mut polls: u32 = 0;

        while !current.done {
            let id = current.id.clone();

            guard(tokio::time::sleep(interval), deadline, cancel)
                .await
                .map_err(|i| i.into_error(action, Some(&id), deadline))?;

            polls += 1;
            let answer = guard(self.rpc.invoke(RpcRequest::get_operation(&id)), deadline, cancel)
                .await
                .map_err(|i| i.into_error(action, Some(&id), deadline))?;

            match answer {
                Ok(value) => {
                    current = Operation::from_json(value, action)?;
                    if current.id.is_empty() {
                        current.id = id;
                    }
                    tracing::debug!(
                        "Operation {} poll {}: done={}",
                        current.id,
                        polls,
                        current.done
                    );
                }
                Err(e) if e.code.is_transient() => {
                    tracing::warn!("Polling operation {} failed, retrying: {}", id, e);
                }
                Err(e) => return Err(ProviderError::rpc(format!("{} (operation {})", action, id), e)),
            }

            interval = self.policy.next_interval(interval);
        }

        if let Some(err) = current.failure() {
            return Err(err);
        }

        tracing::info!("Operation {} ({}) finished after {} polls", current.id, action, polls);
        Ok(current)
    }
}

//! Access-policy updates
//!
//! Every edit is a read-modify-write against the freshest policy. When the
//! write loses a race (`Aborted`, `FailedPrecondition`, HTTP 409) the whole
//! cycle starts over after a backoff, up to a bounded number of attempts.

use super::policy::{diff, AccessPolicy, Member, PolicyDelta};
use crate::cancel::{guard, CancellationToken, Deadline};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::resource::registry::ResourceDef;
use crate::resource::{dispatch, fetch_all};
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;

/// Retry schedule of the read-modify-write loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyRetry {
    pub max_attempts: u32,
    /// Multiplied by the attempt number
    pub backoff: Duration,
}

impl Default for PolicyRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(500),
        }
    }
}

/// How an edit treats the bindings it does not mention
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEdit {
    /// Authoritative for the whole policy
    Replace(AccessPolicy),
    /// Authoritative for one role
    SetBinding { role: String, members: BTreeSet<Member> },
    /// Additive, one member
    AddMember { role: String, member: Member },
    RemoveMember { role: String, member: Member },
    RemoveBinding { role: String },
}

impl PolicyEdit {
    /// Policy this edit wants, given what is there now
    pub fn desired(&self, current: &AccessPolicy) -> AccessPolicy {
        let mut next = current.clone();
        match self {
            PolicyEdit::Replace(policy) => return policy.clone(),
            PolicyEdit::SetBinding { role, members } => next.set_role(role, members.clone()),
            PolicyEdit::AddMember { role, member } => next.add(role, member.clone()),
            PolicyEdit::RemoveMember { role, member } => next.remove(role, member),
            PolicyEdit::RemoveBinding { role } => next.set_role(role, BTreeSet::new()),
        }
        next
    }
}

fn require_iam(def: &ResourceDef) -> Result<()> {
    if def.iam {
        Ok(())
    } else {
        Err(ProviderError::InvalidSchema {
            path: def.display_name.clone(),
            reason: "kind has no access bindings".into(),
        })
    }
}

/// Current access policy of one object
pub async fn read_policy(
    ctx: &ProviderContext,
    def: &ResourceDef,
    id: &str,
    deadline: &Deadline,
    cancel: &CancellationToken,
) -> Result<AccessPolicy> {
    require_iam(def)?;
    let action = format!("list access bindings of {} {}", def.display_name.to_lowercase(), id);
    let request = dispatch::list_access_bindings(def, id);
    let items = fetch_all(ctx, &action, request, "accessBindings", deadline, cancel).await?;
    AccessPolicy::from_access_bindings(&items)
}

/// Current policy and the delta `edit` would send
pub async fn plan(
    ctx: &ProviderContext,
    def: &ResourceDef,
    id: &str,
    edit: &PolicyEdit,
    deadline: &Deadline,
    cancel: &CancellationToken,
) -> Result<(AccessPolicy, PolicyDelta)> {
    let current = read_policy(ctx, def, id, deadline, cancel).await?;
    let delta = diff(&current, &edit.desired(&current));
    Ok((current, delta))
}

async fn write(
    ctx: &ProviderContext,
    def: &ResourceDef,
    id: &str,
    edit: &PolicyEdit,
    delta: &PolicyDelta,
    deadline: &Deadline,
    cancel: &CancellationToken,
) -> Result<()> {
    let request = match edit {
        PolicyEdit::Replace(policy) => {
            let bindings: Vec<_> = policy
                .bindings()
                .into_iter()
                .flat_map(|b| {
                    b.members.into_iter().map(move |m| {
                        json!({ "roleId": b.role, "subject": { "id": m.id, "type": m.kind } })
                    })
                })
                .collect();
            dispatch::set_access_bindings(def, id, json!({ "accessBindings": bindings }))
        }
        _ => dispatch::update_access_bindings(
            def,
            id,
            json!({ "accessBindingDeltas": delta.to_access_binding_deltas() }),
        ),
    };

    let action = format!("update access bindings of {} {}", def.display_name.to_lowercase(), id);
    ctx.call_and_wait(&action, request, deadline, cancel).await?;
    Ok(())
}

/// Apply `edit` and return the policy it produced
pub async fn read_modify_write(
    ctx: &ProviderContext,
    def: &ResourceDef,
    id: &str,
    edit: &PolicyEdit,
    deadline: &Deadline,
    cancel: &CancellationToken,
) -> Result<AccessPolicy> {
    let retry = ctx.policy_retry;

    for attempt in 1..=retry.max_attempts {
        let (current, delta) = plan(ctx, def, id, edit, deadline, cancel).await?;
        if delta.is_empty() {
            tracing::debug!("Access policy of {} already up to date", id);
            return Ok(current);
        }

        match write(ctx, def, id, edit, &delta, deadline, cancel).await {
            Ok(()) => {
                tracing::info!("Access policy of {} updated (attempt {})", id, attempt);
                return Ok(current.apply(&delta));
            }
            Err(e) if e.is_conflict() => {
                tracing::warn!(
                    "Access policy of {} changed concurrently (attempt {}/{}): {}",
                    id,
                    attempt,
                    retry.max_attempts,
                    e
                );
                if attempt < retry.max_attempts {
                    guard(tokio::time::sleep(retry.backoff * attempt), deadline, cancel)
                        .await
                        .map_err(|i| i.into_error("update access bindings", None, deadline))?;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(ProviderError::ConcurrentModification {
        resource: format!("{} {}", def.display_name.to_lowercase(), id),
        attempts: retry.max_attempts,
    })
}

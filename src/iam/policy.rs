//! Access policies and their differences
//!
//! A policy is a role-sorted list of bindings; each binding holds a
//! deduplicated member set. Normalizing on construction keeps the textual
//! form stable across read-modify-write cycles.

use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Subject of a binding, written `type:id` (`userAccount:aje...`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Member {
    pub kind: String,
    pub id: String,
}

impl Member {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    fn subject(&self) -> Value {
        json!({ "id": self.id, "type": self.kind })
    }
}

impl FromStr for Member {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((kind, id)) if !kind.is_empty() && !id.is_empty() && !id.contains(':') => {
                Ok(Member::new(kind, id))
            }
            _ => Err(ProviderError::InvalidMember { value: s.to_string() }),
        }
    }
}

impl TryFrom<String> for Member {
    type Error = ProviderError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Member> for String {
    fn from(m: Member) -> Self {
        m.to_string()
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One role and the members holding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    pub members: BTreeSet<Member>,
}

impl Binding {
    pub fn new(role: impl Into<String>, members: impl IntoIterator<Item = Member>) -> Self {
        Self {
            role: role.into(),
            members: members.into_iter().collect(),
        }
    }
}

/// Normalized access policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Binding>", into = "Vec<Binding>")]
pub struct AccessPolicy {
    roles: BTreeMap<String, BTreeSet<Member>>,
}

impl From<Vec<Binding>> for AccessPolicy {
    fn from(bindings: Vec<Binding>) -> Self {
        AccessPolicy::new(bindings)
    }
}

impl From<AccessPolicy> for Vec<Binding> {
    fn from(policy: AccessPolicy) -> Self {
        policy.bindings()
    }
}

impl AccessPolicy {
    /// Merge bindings of equal roles and drop empty ones
    pub fn new(bindings: impl IntoIterator<Item = Binding>) -> Self {
        let mut policy = AccessPolicy::default();
        for binding in bindings {
            for member in binding.members {
                policy.add(&binding.role, member);
            }
        }
        policy
    }

    /// Read `listAccessBindings` items: `{roleId, subject: {id, type}}`
    pub fn from_access_bindings(items: &[Value]) -> Result<Self> {
        let mut policy = AccessPolicy::default();
        for item in items {
            let role = item.get("roleId").and_then(|v| v.as_str());
            let subject = item.get("subject");
            let kind = subject.and_then(|s| s.get("type")).and_then(|v| v.as_str());
            let id = subject.and_then(|s| s.get("id")).and_then(|v| v.as_str());
            match (role, kind, id) {
                (Some(role), Some(kind), Some(id)) => policy.add(role, Member::new(kind, id)),
                _ => {
                    return Err(ProviderError::mismatch(
                        "accessBindings",
                        "{roleId, subject: {id, type}}",
                        item.to_string(),
                    ))
                }
            }
        }
        Ok(policy)
    }

    /// Bindings sorted by role
    pub fn bindings(&self) -> Vec<Binding> {
        self.roles
            .iter()
            .map(|(role, members)| Binding {
                role: role.clone(),
                members: members.clone(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn members(&self, role: &str) -> Option<&BTreeSet<Member>> {
        self.roles.get(role)
    }

    pub fn contains(&self, role: &str, member: &Member) -> bool {
        self.roles.get(role).is_some_and(|m| m.contains(member))
    }

    pub fn add(&mut self, role: &str, member: Member) {
        self.roles.entry(role.to_string()).or_default().insert(member);
    }

    pub fn remove(&mut self, role: &str, member: &Member) {
        if let Some(members) = self.roles.get_mut(role) {
            members.remove(member);
            if members.is_empty() {
                self.roles.remove(role);
            }
        }
    }

    /// Replace every member of `role`; an empty set drops the role
    pub fn set_role(&mut self, role: &str, members: BTreeSet<Member>) {
        if members.is_empty() {
            self.roles.remove(role);
        } else {
            self.roles.insert(role.to_string(), members);
        }
    }

    /// Policy with `delta` applied
    pub fn apply(&self, delta: &PolicyDelta) -> AccessPolicy {
        let mut next = self.clone();
        for binding in delta.to_remove.bindings() {
            for member in &binding.members {
                next.remove(&binding.role, member);
            }
        }
        for binding in delta.to_add.bindings() {
            for member in binding.members {
                next.add(&binding.role, member);
            }
        }
        next
    }
}

/// Bindings to add and remove to turn one policy into another
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyDelta {
    pub to_add: AccessPolicy,
    pub to_remove: AccessPolicy,
}

impl PolicyDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// `accessBindingDeltas` of an `updateAccessBindings` request
    pub fn to_access_binding_deltas(&self) -> Vec<Value> {
        let entries = |policy: &AccessPolicy, action: &str| -> Vec<Value> {
            policy
                .bindings()
                .into_iter()
                .flat_map(|b| {
                    let action = action.to_string();
                    b.members.into_iter().map(move |m| {
                        json!({
                            "action": action,
                            "accessBinding": { "roleId": b.role, "subject": m.subject() }
                        })
                    })
                })
                .collect()
        };

        let mut deltas = entries(&self.to_remove, "REMOVE");
        deltas.extend(entries(&self.to_add, "ADD"));
        deltas
    }
}

/// Per-role set difference between two policies
pub fn diff(current: &AccessPolicy, desired: &AccessPolicy) -> PolicyDelta {
    let mut delta = PolicyDelta::default();

    for (role, members) in &desired.roles {
        for member in members {
            if !current.contains(role, member) {
                delta.to_add.add(role, member.clone());
            }
        }
    }
    for (role, members) in &current.roles {
        for member in members {
            if !desired.contains(role, member) {
                delta.to_remove.add(role, member.clone());
            }
        }
    }

    delta
}

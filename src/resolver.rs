//! Identifier Resolver
//!
//! Turns a human name into an object id by listing the kind inside its
//! parent scope. Results are never cached: names can move between calls.

use crate::cancel::{CancellationToken, Deadline};
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::resource::registry::{ResourceDef, ScopeKind};
use crate::resource::{dispatch, fetch_all};
use serde_json::Value;

/// Reference to an object, by id or by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectRef {
    Id(String),
    Name(String),
}

impl ObjectRef {
    /// Accept exactly one of an id and a name
    pub fn from_pair(
        id_field: &str,
        id: Option<&str>,
        name_field: &str,
        name: Option<&str>,
    ) -> Result<Self> {
        match (id.filter(|s| !s.is_empty()), name.filter(|s| !s.is_empty())) {
            (Some(_), Some(_)) => Err(ProviderError::ConflictingFields {
                first: id_field.to_string(),
                second: name_field.to_string(),
            }),
            (Some(id), None) => Ok(ObjectRef::Id(id.to_string())),
            (None, Some(name)) => Ok(ObjectRef::Name(name.to_string())),
            (None, None) => Err(ProviderError::MissingField {
                path: format!("{} or {}", id_field, name_field),
            }),
        }
    }
}

/// Scope a kind is listed in: the explicit id, else the context default
///
/// Kinds without a parent (clouds) are listed unscoped.
pub fn scope_for(
    ctx: &ProviderContext,
    def: &ResourceDef,
    explicit: Option<&str>,
) -> Result<Option<(ScopeKind, String)>> {
    let Some(parent) = &def.parent else {
        return Ok(None);
    };

    let fallback = match parent.scope {
        ScopeKind::Folder => ctx.folder_id.as_deref(),
        ScopeKind::Cloud => ctx.cloud_id.as_deref(),
    };

    explicit
        .filter(|s| !s.is_empty())
        .or(fallback)
        .map(|id| Some((parent.scope, id.to_string())))
        .ok_or_else(|| ProviderError::MissingField {
            path: parent.field.clone(),
        })
}

/// Resolve `name` to the id of the single matching object
pub async fn resolve_name(
    ctx: &ProviderContext,
    def: &ResourceDef,
    name: &str,
    scope: Option<(ScopeKind, &str)>,
    deadline: &Deadline,
    cancel: &CancellationToken,
) -> Result<String> {
    let action = format!("resolve {} '{}'", def.display_name.to_lowercase(), name);
    let request = dispatch::list(def, scope, Some(name));
    let items = fetch_all(ctx, &action, request, &def.list_field, deadline, cancel).await?;

    // The filter is applied remotely too, but not every service honours it
    let matches: Vec<&Value> = items
        .iter()
        .filter(|item| item.get(&def.name_field).and_then(|v| v.as_str()) == Some(name))
        .collect();

    let scope_text = match scope {
        Some((kind, id)) => format!("{} {}", kind.name(), id),
        None => "all accessible clouds".to_string(),
    };

    match matches.as_slice() {
        [] => Err(ProviderError::NotFound {
            what: format!("{} named '{}' in {}", def.display_name, name, scope_text),
        }),
        [single] => {
            let id = single
                .get(&def.id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| ProviderError::mismatch(&action, "object with an id", "object without id"))?;
            tracing::debug!("{} -> {}", action, id);
            Ok(id.to_string())
        }
        many => Err(ProviderError::AmbiguousName {
            kind: def.display_name.clone(),
            name: name.to_string(),
            scope: scope_text,
            count: many.len(),
        }),
    }
}

/// Resolve a reference; ids pass through untouched
pub async fn resolve(
    ctx: &ProviderContext,
    def: &ResourceDef,
    reference: &ObjectRef,
    scope: Option<&str>,
    deadline: &Deadline,
    cancel: &CancellationToken,
) -> Result<String> {
    match reference {
        ObjectRef::Id(id) => Ok(id.clone()),
        ObjectRef::Name(name) => {
            let scope = scope_for(ctx, def, scope)?;
            let scope = scope.as_ref().map(|(kind, id)| (*kind, id.as_str()));
            resolve_name(ctx, def, name, scope, deadline, cancel).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::rpc::{Rpc, RpcRequest};
    use crate::error::RpcError;
    use crate::resource::registry::get_resource;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Listing {
        items: Value,
        requests: Mutex<Vec<RpcRequest>>,
    }

    #[async_trait]
    impl Rpc for Listing {
        async fn invoke(&self, request: RpcRequest) -> std::result::Result<Value, RpcError> {
            self.requests.lock().unwrap().push(request);
            Ok(json!({ "serviceAccounts": self.items.clone() }))
        }
    }

    fn ctx_with(items: Value) -> (ProviderContext, Arc<Listing>) {
        let rpc = Arc::new(Listing {
            items,
            requests: Mutex::new(Vec::new()),
        });
        (ProviderContext::new(rpc.clone()).with_folder("b1gdefault"), rpc)
    }

    async fn run(ctx: &ProviderContext, name: &str) -> Result<String> {
        let def = get_resource("yandex_iam_service_account").unwrap();
        resolve(
            ctx,
            def,
            &ObjectRef::Name(name.to_string()),
            None,
            &Deadline::after(Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn test_single_match_resolves() {
        let (ctx, rpc) = ctx_with(json!([
            {"id": "aje1", "name": "robot"},
            {"id": "aje2", "name": "robot-2"}
        ]));
        assert_eq!(run(&ctx, "robot").await.unwrap(), "aje1");

        let requests = rpc.requests.lock().unwrap();
        assert_eq!(requests[0].query_param("folderId"), Some("b1gdefault"));
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let (ctx, _) = ctx_with(json!([]));
        assert!(matches!(
            run(&ctx, "robot").await,
            Err(ProviderError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_two_matches_are_ambiguous() {
        let (ctx, _) = ctx_with(json!([
            {"id": "aje1", "name": "robot"},
            {"id": "aje2", "name": "robot"}
        ]));
        match run(&ctx, "robot").await {
            Err(ProviderError::AmbiguousName { count, .. }) => assert_eq!(count, 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_scope_is_reported() {
        let rpc = Arc::new(Listing {
            items: json!([]),
            requests: Mutex::new(Vec::new()),
        });
        let ctx = ProviderContext::new(rpc);
        assert!(matches!(
            run(&ctx, "robot").await,
            Err(ProviderError::MissingField { ref path }) if path == "folder_id"
        ));
    }

    #[test]
    fn test_from_pair() {
        assert_eq!(
            ObjectRef::from_pair("cloud_id", Some("b1g"), "name", None).unwrap(),
            ObjectRef::Id("b1g".into())
        );
        assert_eq!(
            ObjectRef::from_pair("cloud_id", None, "name", Some("main")).unwrap(),
            ObjectRef::Name("main".into())
        );
        assert!(matches!(
            ObjectRef::from_pair("cloud_id", Some("b1g"), "name", Some("main")),
            Err(ProviderError::ConflictingFields { .. })
        ));
        assert!(matches!(
            ObjectRef::from_pair("cloud_id", None, "name", None),
            Err(ProviderError::MissingField { .. })
        ));
    }
}

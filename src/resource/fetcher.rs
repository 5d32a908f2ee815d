//! Resource Fetcher
//!
//! Paginated list calls. Pages are fetched strictly one after another.

use crate::cancel::{CancellationToken, Deadline};
use crate::cloud::rpc::RpcRequest;
use crate::context::ProviderContext;
use crate::error::Result;
use serde_json::Value;
use std::collections::HashSet;

/// Result of one page
pub struct PaginatedResult {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

/// Fetch one page of `request`
pub async fn fetch_page(
    ctx: &ProviderContext,
    action: &str,
    request: &RpcRequest,
    list_field: &str,
    page_token: Option<&str>,
    deadline: &Deadline,
    cancel: &CancellationToken,
) -> Result<PaginatedResult> {
    let mut request = request.clone();
    if let Some(token) = page_token {
        request = request.with_query("pageToken", token);
    }

    let response = ctx.call(action, request, deadline, cancel).await?;

    let items = extract_items(&response, list_field);
    let next_token = response
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    Ok(PaginatedResult { items, next_token })
}

/// Fetch all pages (auto-paginate)
pub async fn fetch_all(
    ctx: &ProviderContext,
    action: &str,
    request: RpcRequest,
    list_field: &str,
    deadline: &Deadline,
    cancel: &CancellationToken,
) -> Result<Vec<Value>> {
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;
    let mut seen_tokens: HashSet<String> = HashSet::new();

    loop {
        let result = fetch_page(
            ctx,
            action,
            &request,
            list_field,
            page_token.as_deref(),
            deadline,
            cancel,
        )
        .await?;
        all_items.extend(result.items);

        match result.next_token {
            None => break,
            Some(next) if !seen_tokens.insert(next.clone()) => {
                tracing::warn!("{}: server repeated page token {}, stopping", action, next);
                break;
            }
            next => page_token = next,
        }
    }

    Ok(all_items)
}

/// Items of a list response; a missing field means an empty page
fn extract_items(response: &Value, list_field: &str) -> Vec<Value> {
    response
        .get(list_field)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

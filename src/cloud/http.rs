//! HTTP utilities for REST API calls

use crate::error::{ProviderError, RpcError, StatusCode};
use reqwest::{Client, Method};
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Header carrying a per-request id the API echoes in its logs
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Sanitize response body for logging
/// Truncates long responses and drops control characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| c.is_control(), "")
}

/// HTTP client wrapper for API calls
#[derive(Clone)]
pub struct CloudHttpClient {
    client: Client,
}

impl CloudHttpClient {
    /// Create a new HTTP client
    pub fn new(insecure: bool) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(concat!("yc-provider/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Send one request and decode the JSON answer
    ///
    /// Error bodies of the form `{"code": 5, "message": "..."}` keep their
    /// gRPC code; anything else is classified by HTTP status.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Value, RpcError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("{} {} (request id {})", method, url, request_id);

        let mut request = self
            .client
            .request(method, url)
            .header(REQUEST_ID_HEADER, &request_id);

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        let response_body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            tracing::debug!(
                "API error: {} - {} (request id {})",
                status,
                sanitize_for_log(&response_body),
                request_id
            );
            return Err(parse_error_body(status.as_u16(), &response_body));
        }

        // Handle empty response
        if response_body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_body).map_err(|e| {
            RpcError::new(
                StatusCode::Internal,
                format!("failed to parse response JSON: {}", e),
            )
        })
    }

    /// Make a GET request
    pub async fn get(&self, url: &str, token: &str) -> Result<Value, RpcError> {
        self.send(Method::GET, url, Some(token), None).await
    }

    /// Make a POST request; `token` is `None` only for the token exchange itself
    pub async fn post(&self, url: &str, token: Option<&str>, body: Option<&Value>) -> Result<Value, RpcError> {
        self.send(Method::POST, url, token, body).await
    }
}

fn transport_error(e: reqwest::Error) -> RpcError {
    let code = if e.is_timeout() {
        StatusCode::DeadlineExceeded
    } else if e.is_connect() || e.is_request() {
        StatusCode::Unavailable
    } else {
        StatusCode::Unknown
    };
    RpcError::new(code, format!("request failed: {}", e))
}

/// Classify an error response
pub fn parse_error_body(status: u16, body: &str) -> RpcError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(|c| c.as_i64())
        .map(StatusCode::from_grpc)
        .unwrap_or_else(|| StatusCode::from_http(status));
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("HTTP {}", status));
    RpcError::new(code, message)
}

/// Format an API error for display
/// Gives actionable hints for the common failure classes
pub fn format_api_error(error: &ProviderError) -> String {
    match error.status_code() {
        Some(StatusCode::PermissionDenied) => {
            format!("Permission denied. Check the account's roles. ({})", error)
        }
        Some(StatusCode::Unauthenticated) => {
            "Authentication failed. Check YC_TOKEN or the token in the config file.".to_string()
        }
        Some(StatusCode::ResourceExhausted) => {
            "Rate limit or quota exceeded. Please try again later.".to_string()
        }
        Some(StatusCode::Unavailable) => {
            "Service temporarily unavailable. Please try again.".to_string()
        }
        _ => {
            let text = error.to_string();
            let sanitized: String = text.chars().filter(|c| !c.is_control()).take(300).collect();
            if sanitized.len() < text.len() {
                format!("{}...", sanitized)
            } else {
                sanitized
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let long = "x".repeat(500);
        let out = sanitize_for_log(&long);
        assert!(out.starts_with(&"x".repeat(200)));
        assert!(out.contains("500 bytes total"));
        assert_eq!(sanitize_for_log("a\nb"), "ab");
    }

    #[test]
    fn test_error_body_keeps_grpc_code() {
        let err = parse_error_body(400, r#"{"code": 9, "message": "folder is being deleted"}"#);
        assert_eq!(err.code, StatusCode::FailedPrecondition);
        assert_eq!(err.message, "folder is being deleted");
    }

    #[test]
    fn test_error_body_falls_back_to_http_status() {
        let err = parse_error_body(404, "<html>not found</html>");
        assert_eq!(err.code, StatusCode::NotFound);
        assert_eq!(err.message, "HTTP 404");
    }

    #[test]
    fn test_format_api_error_hints() {
        let err = ProviderError::rpc(
            "get cloud",
            RpcError::new(StatusCode::Unauthenticated, "bad token"),
        );
        assert!(format_api_error(&err).contains("YC_TOKEN"));
    }
}

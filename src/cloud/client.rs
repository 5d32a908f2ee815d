//! Cloud Client
//!
//! Production [`Rpc`] implementation over the REST gateway, combining
//! authentication, endpoint URL building and the HTTP client.

use super::auth::{Credentials, TokenSource};
use super::http::CloudHttpClient;
use super::rpc::{Rpc, RpcRequest};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result, RpcError, StatusCode};
use async_trait::async_trait;
use serde_json::Value;

/// Where each service lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `{scheme}://{service}.{domain}`
    Domain { domain: String, plaintext: bool },
    /// Every service behind one base URL (local gateways, mock servers)
    Fixed(String),
}

impl Endpoint {
    pub fn domain(domain: impl Into<String>, plaintext: bool) -> Self {
        Endpoint::Domain {
            domain: domain.into(),
            plaintext,
        }
    }

    pub fn fixed(base_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| ProviderError::Config(format!("invalid base URL '{}': {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::Config(format!(
                "base URL '{}' must use http or https",
                base_url
            )));
        }
        Ok(Endpoint::Fixed(base_url.trim_end_matches('/').to_string()))
    }

    /// Base URL of one service, without a trailing slash
    pub fn service_url(&self, service: &str) -> String {
        match self {
            Endpoint::Domain { domain, plaintext } => {
                let scheme = if *plaintext { "http" } else { "https" };
                format!("{}://{}.{}", scheme, service, domain)
            }
            Endpoint::Fixed(base) => base.clone(),
        }
    }

    /// URL of the OAuth-to-IAM token exchange
    pub fn token_url(&self) -> String {
        format!("{}/iam/v1/tokens", self.service_url("iam"))
    }
}

/// Append query parameters, percent-encoding the values
fn add_query_params(url: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }

    let parts: Vec<String> = query
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect();

    format!("{}?{}", url, parts.join("&"))
}

/// Main API client
#[derive(Clone)]
pub struct CloudClient {
    pub credentials: Credentials,
    pub http: CloudHttpClient,
    pub endpoint: Endpoint,
}

impl CloudClient {
    /// Create a client from configuration; a token is mandatory
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let Some(token) = config.token.as_deref() else {
            return Err(ProviderError::Config(
                "no token configured: set YC_TOKEN or \"token\" in the config file".into(),
            ));
        };
        let endpoint = match &config.base_url {
            Some(base) => Endpoint::fixed(base)?,
            None => Endpoint::domain(config.endpoint.clone(), config.plaintext),
        };
        Self::with_endpoint(TokenSource::detect(token), endpoint, config.insecure)
    }

    pub fn with_endpoint(source: TokenSource, endpoint: Endpoint, insecure: bool) -> Result<Self> {
        let http = CloudHttpClient::new(insecure)?;
        let credentials = Credentials::new(source, http.clone(), endpoint.token_url());

        Ok(Self {
            credentials,
            http,
            endpoint,
        })
    }

    /// Full URL of a request, query included
    pub fn request_url(&self, request: &RpcRequest) -> String {
        let url = format!("{}{}", self.endpoint.service_url(&request.service), request.path());
        add_query_params(&url, &request.query)
    }
}

#[async_trait]
impl Rpc for CloudClient {
    async fn invoke(&self, request: RpcRequest) -> std::result::Result<Value, RpcError> {
        let token = self.credentials.get_token().await?;
        let url = self.request_url(&request);
        let method = request.method.http_method();

        let result = self
            .http
            .send(method.clone(), &url, Some(&token), request.body.as_ref())
            .await;

        match result {
            // A rejected token may have been revoked early; exchange once more
            Err(e) if e.code == StatusCode::Unauthenticated => {
                tracing::debug!("Token rejected for {}, refreshing", request.describe());
                self.credentials.invalidate().await;
                let token = self.credentials.get_token().await?;
                self.http
                    .send(method, &url, Some(&token), request.body.as_ref())
                    .await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::rpc::RpcMethod;

    #[test]
    fn test_service_urls() {
        let endpoint = Endpoint::domain("api.cloud.yandex.net:443", false);
        assert_eq!(
            endpoint.service_url("compute"),
            "https://compute.api.cloud.yandex.net:443"
        );
        assert_eq!(
            endpoint.token_url(),
            "https://iam.api.cloud.yandex.net:443/iam/v1/tokens"
        );

        let local = Endpoint::domain("localhost:8080", true);
        assert_eq!(local.service_url("operation"), "http://operation.localhost:8080");

        let fixed = Endpoint::fixed("http://127.0.0.1:9000/").unwrap();
        assert_eq!(fixed.service_url("compute"), "http://127.0.0.1:9000");
        assert!(Endpoint::fixed("grpc://127.0.0.1:9000").is_err());
        assert!(Endpoint::fixed("not a url").is_err());
    }

    #[test]
    fn test_request_url_encodes_query() {
        let client = CloudClient::with_endpoint(
            TokenSource::detect("t1.x"),
            Endpoint::fixed("http://127.0.0.1:9000").unwrap(),
            false,
        )
        .unwrap();
        let request = RpcRequest::new("iam", "iam/v1/serviceAccounts", RpcMethod::List)
            .with_query("folderId", "b1g")
            .with_query("filter", "name=\"robot\"");
        assert_eq!(
            client.request_url(&request),
            "http://127.0.0.1:9000/iam/v1/serviceAccounts?folderId=b1g&filter=name%3D%22robot%22"
        );
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let config = ProviderConfig::default();
        assert!(matches!(CloudClient::new(&config), Err(ProviderError::Config(_))));
    }
}

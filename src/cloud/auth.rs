//! Authentication
//!
//! API calls carry an IAM token. A configured IAM token (`t1.` prefix) is
//! used as-is; an OAuth token is exchanged for an IAM token at the IAM token
//! endpoint, and the result is cached until shortly before it expires.

use super::http::CloudHttpClient;
use crate::error::{RpcError, StatusCode};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER_SECS: i64 = 300;

/// Prefix of IAM tokens
const IAM_TOKEN_PREFIX: &str = "t1.";

/// Where the bearer token comes from
#[derive(Clone, PartialEq, Eq)]
pub enum TokenSource {
    Iam(String),
    OAuth(String),
}

impl TokenSource {
    /// Classify a configured token by its prefix
    pub fn detect(token: &str) -> Self {
        if token.starts_with(IAM_TOKEN_PREFIX) {
            TokenSource::Iam(token.to_string())
        } else {
            TokenSource::OAuth(token.to_string())
        }
    }
}

impl fmt::Debug for TokenSource {
    // Never print the secret itself
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Iam(_) => write!(f, "Iam(***)"),
            TokenSource::OAuth(_) => write!(f, "OAuth(***)"),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IamTokenResponse {
    iam_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Check if this cached token is still valid
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Credentials holder with token caching
#[derive(Clone)]
pub struct Credentials {
    source: TokenSource,
    http: CloudHttpClient,
    /// Full URL of the IAM token endpoint
    exchange_url: String,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl Credentials {
    pub fn new(source: TokenSource, http: CloudHttpClient, exchange_url: impl Into<String>) -> Self {
        Self {
            source,
            http,
            exchange_url: exchange_url.into(),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Get an IAM token for API calls
    pub async fn get_token(&self) -> Result<String, RpcError> {
        let oauth = match &self.source {
            TokenSource::Iam(token) => return Ok(token.clone()),
            TokenSource::OAuth(oauth) => oauth,
        };

        // Check cache first - but only return if token is still valid
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached IAM token expired, exchanging again");
            }
        }

        let body = serde_json::json!({ "yandexPassportOauthToken": oauth });
        let response = self.http.post(&self.exchange_url, None, Some(&body)).await?;
        let parsed: IamTokenResponse = serde_json::from_value(response).map_err(|e| {
            RpcError::new(
                StatusCode::Unauthenticated,
                format!("unexpected IAM token response: {}", e),
            )
        })?;

        let expires_at = parsed.expires_at - ChronoDuration::seconds(TOKEN_EXPIRY_BUFFER_SECS);
        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: parsed.iam_token.clone(),
                expires_at,
            });
        }

        tracing::debug!("New IAM token cached until {}", expires_at.to_rfc3339());

        Ok(parsed.iam_token)
    }

    /// Drop any cached token so the next call exchanges again
    pub async fn invalidate(&self) {
        let mut cache = self.token_cache.write().await;
        *cache = None;
    }
}

//! Configuration Management
//!
//! Settings come from `config.json` in the user config directory, then the
//! `YC_*` environment variables, then command-line flags (applied by the
//! binary). Nothing here is global: the result is turned into a
//! [`ProviderContext`](crate::context::ProviderContext) and passed around.

use crate::error::{ProviderError, Result};
use crate::iam::PolicyRetry;
use crate::operation::PollPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default API endpoint
pub const DEFAULT_ENDPOINT: &str = "api.cloud.yandex.net:443";

/// Fallback for create/update/delete when neither config nor table set one
pub const DEFAULT_MUTATE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Fallback for reads
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest accepted growth factor between operation polls
pub const MAX_POLL_MULTIPLIER: f64 = 10.0;

/// Per-action timeout overrides, in seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub create: Option<u64>,
    pub read: Option<u64>,
    pub update: Option<u64>,
    pub delete: Option<u64>,
}

/// Operation polling schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1000,
            multiplier: 1.5,
            max_interval_ms: 10_000,
        }
    }
}

/// Access-policy read-modify-write retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 500,
        }
    }
}

/// User configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// OAuth or IAM token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub cloud_id: Option<String>,
    pub folder_id: Option<String>,
    pub endpoint: String,
    /// Send every service to this URL instead of `{service}.{endpoint}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// Talk plain HTTP
    pub plaintext: bool,
    pub timeouts: TimeoutConfig,
    pub polling: PollingConfig,
    pub iam_retry: RetryConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            token: None,
            cloud_id: None,
            folder_id: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            base_url: None,
            insecure: false,
            plaintext: false,
            timeouts: TimeoutConfig::default(),
            polling: PollingConfig::default(),
            iam_retry: RetryConfig::default(),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

impl ProviderConfig {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("yc-provider").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_json(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring {:?}: {}", path, e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Cannot read {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| ProviderError::Config(format!("invalid config file: {}", e)))
    }

    /// Overlay the `YC_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Overlay variables from any lookup (the environment in production)
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(token) = non_empty("YC_TOKEN") {
            self.token = Some(token);
        }
        if let Some(cloud) = non_empty("YC_CLOUD_ID") {
            self.cloud_id = Some(cloud);
        }
        if let Some(folder) = non_empty("YC_FOLDER_ID") {
            self.folder_id = Some(folder);
        }
        if let Some(endpoint) = non_empty("YC_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(insecure) = non_empty("YC_INSECURE") {
            self.insecure = parse_bool(&insecure);
        }
        if let Some(plaintext) = non_empty("YC_PLAINTEXT") {
            self.plaintext = parse_bool(&plaintext);
        }
    }

    /// Reject settings no call could work with
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ProviderError::Config("endpoint must not be empty".into()));
        }
        if self.endpoint.contains("://") {
            return Err(ProviderError::Config(format!(
                "endpoint '{}' must be host[:port] without a scheme",
                self.endpoint
            )));
        }
        if self.polling.initial_interval_ms == 0 {
            return Err(ProviderError::Config("polling.initial_interval_ms must be positive".into()));
        }
        if !(1.0..=MAX_POLL_MULTIPLIER).contains(&self.polling.multiplier) {
            return Err(ProviderError::Config(format!(
                "polling.multiplier must be between 1 and {}, got {}",
                MAX_POLL_MULTIPLIER, self.polling.multiplier
            )));
        }
        if self.iam_retry.max_attempts == 0 {
            return Err(ProviderError::Config("iam_retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_millis(self.polling.initial_interval_ms),
            multiplier: self.polling.multiplier,
            max_interval: Duration::from_millis(self.polling.max_interval_ms),
        }
    }

    pub fn policy_retry(&self) -> PolicyRetry {
        PolicyRetry {
            max_attempts: self.iam_retry.max_attempts,
            backoff: Duration::from_millis(self.iam_retry.backoff_ms),
        }
    }
}

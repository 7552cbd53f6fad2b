//! Cloud provider configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Which cloud backup client implementation is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// OpenStack compute + block-storage REST API.
    #[default]
    OpenStack,
    /// In-process simulated provider (dry runs and tests).
    Fake,
}

/// Cloud backup client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CloudConfig {
    /// Client implementation.
    #[serde(default)]
    pub provider: CloudProvider,
    /// Compute API base URL (server listing).
    #[serde(default)]
    pub compute_endpoint: String,
    /// Block-storage API base URL (volumes, backups, quotas).
    #[serde(default)]
    pub volume_endpoint: String,
    /// Pre-issued API token sent as `X-Auth-Token`.
    #[serde(default)]
    pub auth_token: String,
    /// Projects whose servers are scanned for backup candidates.
    #[serde(default)]
    pub projects: Vec<String>,
    /// When set, only servers whose metadata under this key is `"true"`
    /// are backed up.
    #[serde(default)]
    pub backup_metadata_key: Option<String>,
    /// Pass `force` when creating backups of in-use volumes.
    #[serde(default = "default_true")]
    pub force_create: bool,
    /// Use the force-delete action instead of a plain delete.
    #[serde(default)]
    pub force_delete: bool,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1))]
    pub request_timeout_seconds: u64,
    /// Retry policy applied to every remote call.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,
}

impl CloudConfig {
    /// Per-request HTTP timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provider: CloudProvider::default(),
            compute_endpoint: String::new(),
            volume_endpoint: String::new(),
            auth_token: String::new(),
            projects: Vec::new(),
            backup_metadata_key: None,
            force_create: true,
            force_delete: false,
            request_timeout_seconds: default_request_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff settings for transient remote failures.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// First backoff sleep in milliseconds.
    #[serde(default = "default_initial_wait")]
    #[validate(range(min = 1))]
    pub initial_wait_millis: u64,
    /// Ceiling for a single backoff sleep in seconds.
    #[serde(default = "default_max_wait")]
    #[validate(range(min = 1))]
    pub max_wait_seconds: u64,
    /// Total wall-clock budget for one call including retries, in seconds.
    #[serde(default = "default_retry_timeout")]
    pub timeout_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_wait_millis: default_initial_wait(),
            max_wait_seconds: default_max_wait(),
            timeout_seconds: default_retry_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    60
}

fn default_initial_wait() -> u64 {
    500
}

fn default_max_wait() -> u64 {
    180
}

fn default_retry_timeout() -> u64 {
    300
}

//! Control plane connection settings

use serde::{Deserialize, Serialize};

/// Default control plane URL when `MLPILOT_API_URL` is unset
pub const DEFAULT_API_URL: &str = "http://localhost:8080/v1";
/// Default object storage URL when `MLPILOT_STORAGE_URL` is unset
pub const DEFAULT_STORAGE_URL: &str = "http://localhost:8080/storage";
/// Default region when `MLPILOT_REGION` is unset
pub const DEFAULT_REGION: &str = "us-west-2";

/// Platform connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Control plane base URL (training jobs, endpoints, session)
    pub api_url: String,
    /// Object storage base URL
    pub storage_url: String,
    /// Region the session targets
    pub region: String,
    /// Bearer token (optional for local or anonymous deployments)
    pub token: Option<String>,
    /// Bucket override; the platform's default bucket is used when unset
    pub bucket: Option<String>,
    /// Per-request timeout in seconds; the transport default applies when unset
    pub request_timeout_secs: Option<u64>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            api_url: std::env::var("MLPILOT_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            storage_url: std::env::var("MLPILOT_STORAGE_URL")
                .unwrap_or_else(|_| DEFAULT_STORAGE_URL.to_string()),
            region: std::env::var("MLPILOT_REGION")
                .unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            token: std::env::var("MLPILOT_TOKEN").ok().filter(|t| !t.is_empty()),
            bucket: std::env::var("MLPILOT_BUCKET").ok().filter(|b| !b.is_empty()),
            request_timeout_secs: std::env::var("MLPILOT_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

impl PlatformConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for explicit URLs, ignoring the environment
    pub fn new(api_url: &str, storage_url: &str, region: &str) -> Self {
        PlatformConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            storage_url: storage_url.trim_end_matches('/').to_string(),
            region: region.to_string(),
            token: None,
            bucket: None,
            request_timeout_secs: None,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Pin the bucket instead of asking the platform for its default
    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = Some(bucket.to_string());
        self
    }

    pub(crate) fn api(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), path)
    }

    pub(crate) fn object(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.storage_url.trim_end_matches('/'),
            bucket,
            key.trim_start_matches('/')
        )
    }

    pub(crate) fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/{}", self.storage_url.trim_end_matches('/'), bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_config_default() {
        let config = PlatformConfig::default();
        assert!(!config.api_url.is_empty());
        assert!(!config.storage_url.is_empty());
        assert!(!config.region.is_empty());
    }

    #[test]
    fn test_platform_config_new_trims_slashes() {
        let config = PlatformConfig::new(
            "https://api.example.com/v1/",
            "https://s3.example.com/",
            "eu-west-1",
        );
        assert_eq!(config.api_url, "https://api.example.com/v1");
        assert_eq!(config.storage_url, "https://s3.example.com");
        assert_eq!(config.region, "eu-west-1");
        assert!(config.token.is_none());
    }

    #[test]
    fn test_platform_config_with_token_and_bucket() {
        let config = PlatformConfig::new("http://a", "http://s", "r")
            .with_token("secret-token")
            .with_bucket("my-bucket");
        assert_eq!(config.token, Some("secret-token".to_string()));
        assert_eq!(config.bucket, Some("my-bucket".to_string()));
    }

    #[test]
    fn test_url_building() {
        let config = PlatformConfig::new("http://api/v1", "http://store", "r");
        assert_eq!(config.api("training-jobs/j1"), "http://api/v1/training-jobs/j1");
        assert_eq!(
            config.object("b", "/data/cifar10/x.bin"),
            "http://store/b/data/cifar10/x.bin"
        );
        assert_eq!(config.bucket_url("b"), "http://store/b");
    }
}

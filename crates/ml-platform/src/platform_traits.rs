//! Platform trait definitions for mlpilot
//!
//! These traits define the external collaborators of the workflow:
//! - `ObjectStore`: durable object storage (put/list by bucket and key)
//! - `TrainingPlatform`: session lookup, training jobs and hosted endpoints
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// Result type for platform operations
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// URI scheme used for object storage locations.
pub const STORAGE_SCHEME: &str = "s3";

/// Build a storage URI for `key` inside `bucket`.
pub fn storage_uri(bucket: &str, key: &str) -> String {
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        format!("{}://{}", STORAGE_SCHEME, bucket)
    } else {
        format!("{}://{}/{}", STORAGE_SCHEME, bucket, key)
    }
}

/// Split a storage URI into `(bucket, key)`. Returns `None` for other schemes.
pub fn parse_storage_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix(STORAGE_SCHEME)?.strip_prefix("://")?;
    let (bucket, key) = match rest.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (rest, ""),
    };
    if bucket.is_empty() {
        return None;
    }
    Some((bucket, key))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Session context reported by the platform for the current credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub region: String,
    pub default_bucket: String,
    pub execution_role: String,
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Durable object storage.
///
/// Guarantees:
/// - `put_object` overwrites any existing object at the same key.
/// - `list_objects` returns keys under `prefix` in lexicographic order.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` at `bucket/key`.
    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> PlatformResult<()>;

    /// List keys in `bucket` starting with `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> PlatformResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Training jobs
// ---------------------------------------------------------------------------

/// Framework container a job or endpoint runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkSpec {
    pub name: String,
    pub version: String,
}

impl Default for FrameworkSpec {
    fn default() -> Self {
        FrameworkSpec {
            name: "mxnet".to_string(),
            version: "1.4.1".to_string(),
        }
    }
}

/// Remote training job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingJobStatus {
    InProgress,
    Completed,
    Failed,
    Stopped,
}

impl TrainingJobStatus {
    /// Whether the job will not change status again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TrainingJobStatus::InProgress)
    }
}

impl std::fmt::Display for TrainingJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrainingJobStatus::InProgress => "InProgress",
            TrainingJobStatus::Completed => "Completed",
            TrainingJobStatus::Failed => "Failed",
            TrainingJobStatus::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// Body of a create-training-job call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTrainingJobRequest {
    pub job_name: String,
    pub role: String,
    pub framework: FrameworkSpec,
    /// Storage URI of the uploaded entry-point script
    pub entry_point_uri: String,
    pub instance_type: String,
    pub instance_count: u32,
    /// Hyperparameters as the platform expects them: string keys, string values
    pub hyperparameters: BTreeMap<String, String>,
    /// Channel name to data location, passed through unchanged
    pub input_channels: BTreeMap<String, String>,
    pub output_path: String,
}

/// Platform view of a training job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJobDescription {
    pub job_name: String,
    pub status: TrainingJobStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Storage URI of the trained model, set once the job completes
    #[serde(default)]
    pub model_artifact: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Hosted endpoint status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointStatus {
    Creating,
    InService,
    Failed,
    Deleting,
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndpointStatus::Creating => "Creating",
            EndpointStatus::InService => "InService",
            EndpointStatus::Failed => "Failed",
            EndpointStatus::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

/// Body of a create-endpoint call.
///
/// The platform resolves the serving container, role and inference code
/// from `training_job_name`; only the artifact and hardware are explicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEndpointRequest {
    pub endpoint_name: String,
    pub training_job_name: String,
    pub model_artifact: String,
    pub instance_type: String,
    pub instance_count: u32,
}

/// Platform view of an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescription {
    pub endpoint_name: String,
    pub status: EndpointStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub instance_type: String,
    pub instance_count: u32,
}

/// Managed training and hosting control plane.
#[async_trait]
pub trait TrainingPlatform: Send + Sync {
    /// Region, default bucket and execution role for the current credentials.
    async fn session_info(&self) -> PlatformResult<SessionInfo>;

    /// Submit a training job. Returns once the platform has accepted it.
    async fn create_training_job(&self, request: CreateTrainingJobRequest) -> PlatformResult<()>;

    /// Current status of a training job.
    async fn describe_training_job(&self, job_name: &str)
        -> PlatformResult<TrainingJobDescription>;

    /// Start provisioning an endpoint.
    async fn create_endpoint(&self, request: CreateEndpointRequest) -> PlatformResult<()>;

    /// Current status of an endpoint.
    async fn describe_endpoint(&self, endpoint_name: &str) -> PlatformResult<EndpointDescription>;

    /// Send one payload to an in-service endpoint and return its response.
    async fn invoke_endpoint(
        &self,
        endpoint_name: &str,
        payload: serde_json::Value,
    ) -> PlatformResult<serde_json::Value>;

    /// Delete an endpoint. `NotFound` if it does not exist.
    async fn delete_endpoint(&self, endpoint_name: &str) -> PlatformResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_uri_joins_bucket_and_key() {
        assert_eq!(storage_uri("b", "data/cifar10"), "s3://b/data/cifar10");
        assert_eq!(storage_uri("b", "/data"), "s3://b/data");
        assert_eq!(storage_uri("b", ""), "s3://b");
    }

    #[test]
    fn parse_storage_uri_splits_bucket() {
        assert_eq!(
            parse_storage_uri("s3://bucket/data/cifar10"),
            Some(("bucket", "data/cifar10"))
        );
        assert_eq!(parse_storage_uri("s3://bucket"), Some(("bucket", "")));
        assert_eq!(parse_storage_uri("https://bucket/x"), None);
        assert_eq!(parse_storage_uri("s3:///x"), None);
    }

    #[test]
    fn only_in_progress_is_non_terminal() {
        assert!(!TrainingJobStatus::InProgress.is_terminal());
        assert!(TrainingJobStatus::Completed.is_terminal());
        assert!(TrainingJobStatus::Failed.is_terminal());
        assert!(TrainingJobStatus::Stopped.is_terminal());
    }

    #[test]
    fn job_description_tolerates_missing_optionals() {
        let json = r#"{
            "job_name": "j",
            "status": "InProgress",
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let desc: TrainingJobDescription = serde_json::from_str(json).unwrap();
        assert_eq!(desc.status, TrainingJobStatus::InProgress);
        assert!(desc.model_artifact.is_none());
    }
}

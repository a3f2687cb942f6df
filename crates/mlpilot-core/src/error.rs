//! Workflow error taxonomy.

use ml_platform::PlatformError;

/// Errors produced by the workflow steps.
///
/// Platform failures pass through unchanged inside [`WorkflowError::Platform`];
/// the remaining variants are raised locally before or after a platform call.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("invalid job descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid dataset location: {0}")]
    InvalidLocation(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("invalid sample {name}: {reason}")]
    InvalidSample { name: String, reason: String },

    #[error("training job {job_name} ended {status}: {reason}")]
    TrainingFailed {
        job_name: String,
        status: String,
        reason: String,
    },

    #[error("endpoint {endpoint_name} failed: {reason}")]
    EndpointFailed {
        endpoint_name: String,
        reason: String,
    },

    #[error("timed out after {waited_secs}s waiting for {what} {name}")]
    WaitTimedOut {
        what: String,
        name: String,
        waited_secs: u64,
    },

    #[error("invalid prediction from {endpoint_name}: {reason}")]
    InvalidPrediction {
        endpoint_name: String,
        reason: String,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_passes_through() {
        let err: WorkflowError = PlatformError::not_found("endpoint", "ep").into();
        assert!(matches!(err, WorkflowError::Platform(PlatformError::NotFound { .. })));
        assert!(err.to_string().contains("endpoint not found: ep"));
    }

    #[test]
    fn test_training_failed_display() {
        let err = WorkflowError::TrainingFailed {
            job_name: "mxnet-training-1".to_string(),
            status: "Failed".to_string(),
            reason: "AlgorithmError".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("mxnet-training-1"));
        assert!(msg.contains("Failed"));
        assert!(msg.contains("AlgorithmError"));
    }
}

//! Error types for ml-platform

use thiserror::Error;

/// Errors returned by platform backends (HTTP control plane or fakes)
#[derive(Error, Debug)]
pub enum PlatformError {
    /// A named resource does not exist
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    /// A resource with the same name already exists
    #[error("{kind} already exists: {name}")]
    Conflict { kind: String, name: String },

    /// The resource exists but cannot serve the request in its current status
    #[error("{kind} {name} is {status}")]
    InvalidState {
        kind: String,
        name: String,
        status: String,
    },

    /// Credentials missing or rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Request rejected before reaching the platform
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Non-success response from the control plane
    #[error("platform returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PlatformError {
    pub fn not_found(kind: &str, name: &str) -> Self {
        PlatformError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn conflict(kind: &str, name: &str) -> Self {
        PlatformError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        PlatformError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_kind_and_resource() {
        let err = PlatformError::not_found("endpoint", "cifar10-ep");
        assert_eq!(err.to_string(), "endpoint not found: cifar10-ep");
    }

    #[test]
    fn api_error_carries_status() {
        let err = PlatformError::Api {
            status: 503,
            message: "throttled".to_string(),
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("throttled"));
    }
}

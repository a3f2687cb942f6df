//! HTTP control plane client
//!
//! Implements [`TrainingPlatform`] and [`ObjectStore`] over the platform's
//! REST API. Every call is a single request; nothing is retried here.

use std::time::Duration;

use async_trait::async_trait;
use ml_platform::{
    CreateEndpointRequest, CreateTrainingJobRequest, EndpointDescription, ObjectStore,
    PlatformError, PlatformResult, SessionInfo, TrainingJobDescription, TrainingPlatform,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::PlatformConfig;

const USER_AGENT: &str = concat!("mlpilot-platform-client/", env!("CARGO_PKG_VERSION"));

/// Client for the managed ML control plane and its object storage
#[derive(Debug, Clone)]
pub struct PlatformClient {
    config: PlatformConfig,
    http_client: reqwest::Client,
}

impl PlatformClient {
    /// Create a new platform client
    pub fn new(config: PlatformConfig) -> PlatformResult<Self> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http_client = builder.build().map_err(http_err)?;

        Ok(PlatformClient {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> PlatformResult<Self> {
        Self::new(PlatformConfig::from_env())
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        kind: &str,
        name: &str,
    ) -> PlatformResult<Response> {
        let response = self.authorize(request).send().await.map_err(http_err)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(status_error(status, message, kind, name))
    }
}

fn http_err(err: reqwest::Error) -> PlatformError {
    PlatformError::Http(err.to_string())
}

/// Map a non-success status to the platform error taxonomy.
pub(crate) fn status_error(
    status: StatusCode,
    message: String,
    kind: &str,
    name: &str,
) -> PlatformError {
    match status {
        StatusCode::NOT_FOUND => PlatformError::not_found(kind, name),
        StatusCode::CONFLICT => PlatformError::conflict(kind, name),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Unauthorized(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            PlatformError::InvalidRequest(message)
        }
        other => PlatformError::Api {
            status: other.as_u16(),
            message,
        },
    }
}

#[derive(Deserialize)]
struct ListObjectsResponse {
    keys: Vec<String>,
}

#[async_trait]
impl ObjectStore for PlatformClient {
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> PlatformResult<()> {
        let url = self.config.object(bucket, key);
        let request = self
            .http_client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        self.send(request, "bucket", bucket).await?;
        debug!("stored {}", url);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> PlatformResult<Vec<String>> {
        let request = self
            .http_client
            .get(self.config.bucket_url(bucket))
            .query(&[("prefix", prefix)]);
        let response = self.send(request, "bucket", bucket).await?;
        let body: ListObjectsResponse = response.json().await.map_err(http_err)?;
        let mut keys = body.keys;
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl TrainingPlatform for PlatformClient {
    async fn session_info(&self) -> PlatformResult<SessionInfo> {
        let request = self.http_client.get(self.config.api("session"));
        let response = self.send(request, "session", &self.config.region).await?;
        response.json().await.map_err(http_err)
    }

    #[instrument(skip(self, request), fields(job_name = %request.job_name))]
    async fn create_training_job(&self, request: CreateTrainingJobRequest) -> PlatformResult<()> {
        let name = request.job_name.clone();
        let http = self
            .http_client
            .post(self.config.api("training-jobs"))
            .json(&request);
        self.send(http, "training job", &name).await?;
        Ok(())
    }

    async fn describe_training_job(
        &self,
        job_name: &str,
    ) -> PlatformResult<TrainingJobDescription> {
        let request = self
            .http_client
            .get(self.config.api(&format!("training-jobs/{}", job_name)));
        let response = self.send(request, "training job", job_name).await?;
        response.json().await.map_err(http_err)
    }

    #[instrument(skip(self, request), fields(endpoint_name = %request.endpoint_name))]
    async fn create_endpoint(&self, request: CreateEndpointRequest) -> PlatformResult<()> {
        let name = request.endpoint_name.clone();
        let http = self
            .http_client
            .post(self.config.api("endpoints"))
            .json(&request);
        self.send(http, "endpoint", &name).await?;
        Ok(())
    }

    async fn describe_endpoint(&self, endpoint_name: &str) -> PlatformResult<EndpointDescription> {
        let request = self
            .http_client
            .get(self.config.api(&format!("endpoints/{}", endpoint_name)));
        let response = self.send(request, "endpoint", endpoint_name).await?;
        response.json().await.map_err(http_err)
    }

    async fn invoke_endpoint(
        &self,
        endpoint_name: &str,
        payload: serde_json::Value,
    ) -> PlatformResult<serde_json::Value> {
        let request = self
            .http_client
            .post(self.config.api(&format!("endpoints/{}/invocations", endpoint_name)))
            .json(&payload);
        let response = self.send(request, "endpoint", endpoint_name).await?;
        let body = response.bytes().await.map_err(http_err)?;
        Ok(serde_json::from_slice(&body)?)
    }

    #[instrument(skip(self))]
    async fn delete_endpoint(&self, endpoint_name: &str) -> PlatformResult<()> {
        let request = self
            .http_client
            .delete(self.config.api(&format!("endpoints/{}", endpoint_name)));
        self.send(request, "endpoint", endpoint_name).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_from_explicit_config() {
        let config = PlatformConfig::new("http://127.0.0.1:1/v1", "http://127.0.0.1:1/s", "r")
            .with_token("t");
        let client = PlatformClient::new(config).unwrap();
        assert_eq!(client.config().token.as_deref(), Some("t"));
    }

    #[test]
    fn test_status_mapping() {
        let err = status_error(StatusCode::NOT_FOUND, String::new(), "endpoint", "ep");
        assert!(matches!(err, PlatformError::NotFound { ref name, .. } if name == "ep"));

        let err = status_error(StatusCode::FORBIDDEN, "denied".to_string(), "endpoint", "ep");
        assert!(matches!(err, PlatformError::Unauthorized(ref m) if m == "denied"));

        let err = status_error(StatusCode::CONFLICT, String::new(), "training job", "j");
        assert!(matches!(err, PlatformError::Conflict { .. }));

        let err = status_error(StatusCode::BAD_REQUEST, "bad".to_string(), "training job", "j");
        assert!(matches!(err, PlatformError::InvalidRequest(_)));

        let err = status_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "throttled".to_string(),
            "endpoint",
            "ep",
        );
        assert!(matches!(err, PlatformError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_platform_is_http_error() {
        // Port 1 is reserved; the connection is refused, not hung.
        let config = PlatformConfig::new("http://127.0.0.1:1/v1", "http://127.0.0.1:1/s", "r");
        let client = PlatformClient::new(config).unwrap();

        let err = client.describe_endpoint("ep").await.unwrap_err();
        assert!(matches!(err, PlatformError::Http(_)));
    }
}

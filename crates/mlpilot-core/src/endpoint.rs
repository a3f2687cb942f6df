//! Hosted inference endpoints (workflow steps 6 to 8).

use std::sync::Arc;

use ml_platform::{
    CreateEndpointRequest, EndpointStatus, PlatformError, TrainingJobStatus, TrainingPlatform,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, WorkflowError};
use crate::job::{validate_resource_name, TrainingJob};
use crate::metrics::METRICS;
use crate::obs;
use crate::samples::{class_name, SampleImage, CLASS_NAMES};
use crate::wait::{poll_until, WaitPolicy};

/// Hardware for the inference endpoint. Independent of training hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    pub instance_type: String,
    pub instance_count: u32,
    /// Defaults to the training job name.
    pub endpoint_name: Option<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            instance_type: "ml.m4.xlarge".to_string(),
            instance_count: 1,
            endpoint_name: None,
        }
    }
}

/// One classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub sample: String,
    /// Value exactly as returned by the endpoint.
    pub raw: f64,
    pub class_index: u8,
    pub class_name: String,
    /// Ground truth, when the sample carried one.
    pub expected: Option<u8>,
}

impl Prediction {
    pub fn is_correct(&self) -> Option<bool> {
        self.expected.map(|e| e == self.class_index)
    }
}

/// Handle to a live endpoint.
///
/// The endpoint bills until deleted. [`Endpoint::delete`] consumes the
/// handle; dropping a handle that was never deleted logs a leak warning.
pub struct Endpoint {
    platform: Arc<dyn TrainingPlatform>,
    name: String,
    instance_type: String,
    instance_count: u32,
    live: bool,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("instance_type", &self.instance_type)
            .field("instance_count", &self.instance_count)
            .field("live", &self.live)
            .finish()
    }
}

/// Best-effort delete of an endpoint that never became usable.
async fn discard(platform: &dyn TrainingPlatform, name: &str) {
    if let Err(e) = platform.delete_endpoint(name).await {
        obs::emit_teardown_failed(name, &e);
    }
}

impl Endpoint {
    /// Create an endpoint serving `job`'s model artifact and wait until it
    /// is `InService`.
    ///
    /// If provisioning ends in `Failed`, the failed endpoint is deleted
    /// (best effort) and [`WorkflowError::EndpointFailed`] is returned.
    pub async fn deploy(
        platform: Arc<dyn TrainingPlatform>,
        job: &TrainingJob,
        config: &DeployConfig,
        policy: &WaitPolicy,
    ) -> Result<Self> {
        if job.description().status != TrainingJobStatus::Completed {
            return Err(WorkflowError::TrainingFailed {
                job_name: job.name().to_string(),
                status: job.description().status.to_string(),
                reason: "cannot deploy a job that has not completed".to_string(),
            });
        }
        if config.instance_type.trim().is_empty() {
            return Err(WorkflowError::Config(
                "deploy instance_type must not be empty".to_string(),
            ));
        }
        if config.instance_count == 0 {
            return Err(WorkflowError::Config(
                "deploy instance_count must be at least 1".to_string(),
            ));
        }

        let name = config
            .endpoint_name
            .clone()
            .unwrap_or_else(|| job.name().to_string());
        validate_resource_name(&name)?;

        platform
            .create_endpoint(CreateEndpointRequest {
                endpoint_name: name.clone(),
                training_job_name: job.name().to_string(),
                model_artifact: job.model_artifact().to_string(),
                instance_type: config.instance_type.clone(),
                instance_count: config.instance_count,
            })
            .await?;
        debug!("endpoint {} requested from {}", name, job.model_artifact());

        let check_platform = platform.as_ref();
        let check_name = name.as_str();
        let waited = poll_until(policy, "endpoint", &name, move || async move {
            let desc = check_platform.describe_endpoint(check_name).await?;
            let settled = matches!(desc.status, EndpointStatus::InService | EndpointStatus::Failed);
            Ok(settled.then_some(desc))
        })
        .await;

        // the endpoint exists from here on; every early return must remove it
        let description = match waited {
            Ok(description) => description,
            Err(e) => {
                warn!(endpoint_name = %name, error = %e, "endpoint never settled; deleting it");
                discard(platform.as_ref(), &name).await;
                return Err(e);
            }
        };

        if description.status == EndpointStatus::Failed {
            discard(platform.as_ref(), &name).await;
            return Err(WorkflowError::EndpointFailed {
                endpoint_name: name,
                reason: description
                    .failure_reason
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }

        METRICS.inc_endpoints_deployed();
        obs::emit_endpoint_deployed(
            &name,
            &description.instance_type,
            description.instance_count,
        );
        Ok(Endpoint {
            platform,
            name,
            instance_type: description.instance_type,
            instance_count: description.instance_count,
            live: true,
        })
    }

    /// Wrap an existing endpoint. It must be `InService`.
    pub async fn attach(platform: Arc<dyn TrainingPlatform>, name: &str) -> Result<Self> {
        let description = platform.describe_endpoint(name).await?;
        if description.status != EndpointStatus::InService {
            return Err(PlatformError::InvalidState {
                kind: "endpoint".to_string(),
                name: name.to_string(),
                status: description.status.to_string(),
            }
            .into());
        }
        Ok(Endpoint {
            platform,
            name: description.endpoint_name,
            instance_type: description.instance_type,
            instance_count: description.instance_count,
            live: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_type(&self) -> &str {
        &self.instance_type
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Classify one sample.
    pub async fn predict(&self, sample: &SampleImage) -> Result<Prediction> {
        let response = self
            .platform
            .invoke_endpoint(&self.name, sample.to_payload())
            .await?;
        let raw = scalar_response(&response).ok_or_else(|| WorkflowError::InvalidPrediction {
            endpoint_name: self.name.clone(),
            reason: format!("expected a number, got {}", response),
        })?;
        let class_index = class_index_of(raw).ok_or_else(|| WorkflowError::InvalidPrediction {
            endpoint_name: self.name.clone(),
            reason: format!("{} is not a class index in 0-{}", raw, CLASS_NAMES.len() - 1),
        })?;

        METRICS.inc_predictions();
        obs::emit_prediction(&self.name, sample.name(), class_index, raw);
        Ok(Prediction {
            sample: sample.name().to_string(),
            raw,
            class_index,
            class_name: class_name(class_index).unwrap_or_default().to_string(),
            expected: sample.label(),
        })
    }

    /// Classify samples in order. Stops at the first failure.
    pub async fn predict_all(&self, samples: &[SampleImage]) -> Result<Vec<Prediction>> {
        let mut predictions = Vec::with_capacity(samples.len());
        for sample in samples {
            predictions.push(self.predict(sample).await?);
        }
        Ok(predictions)
    }

    /// Delete the endpoint. The handle is consumed whether or not the call
    /// succeeds; a failure is logged and returned.
    pub async fn delete(mut self) -> Result<()> {
        self.live = false;
        match self.platform.delete_endpoint(&self.name).await {
            Ok(()) => {
                METRICS.inc_endpoints_deleted();
                obs::emit_endpoint_deleted(&self.name);
                Ok(())
            }
            Err(e) => {
                obs::emit_teardown_failed(&self.name, &e);
                Err(e.into())
            }
        }
    }

    /// Give up ownership without deleting. The endpoint keeps running.
    pub fn keep(mut self) -> String {
        self.live = false;
        warn!(endpoint_name = %self.name, "endpoint left running");
        std::mem::take(&mut self.name)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.live {
            obs::emit_endpoint_leaked(&self.name);
        }
    }
}

/// Accept a bare number or a one-element array of numbers.
fn scalar_response(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Array(items) if items.len() == 1 => scalar_response(&items[0]),
        _ => None,
    }
}

fn class_index_of(raw: f64) -> Option<u8> {
    if !raw.is_finite() {
        return None;
    }
    let rounded = raw.round();
    if rounded < 0.0 || rounded >= CLASS_NAMES.len() as f64 {
        return None;
    }
    Some(rounded as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_platform::fakes::MemoryPlatform;
    use serde_json::json;
    use tracing_test::traced_test;

    async fn live_endpoint(platform: &Arc<MemoryPlatform>) -> Endpoint {
        platform
            .create_endpoint(CreateEndpointRequest {
                endpoint_name: "ep".to_string(),
                training_job_name: "job".to_string(),
                model_artifact: "s3://b/job/output/model.tar.gz".to_string(),
                instance_type: "ml.m4.xlarge".to_string(),
                instance_count: 1,
            })
            .await
            .unwrap();
        // one Creating poll, then InService
        platform.describe_endpoint("ep").await.unwrap();
        platform.describe_endpoint("ep").await.unwrap();
        Endpoint::attach(platform.clone(), "ep").await.unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn dropping_live_handle_warns() {
        let platform = Arc::new(MemoryPlatform::new());
        drop(live_endpoint(&platform).await);
        assert!(logs_contain("endpoint.leaked"));
        assert_eq!(platform.live_endpoints(), vec!["ep".to_string()]);
    }

    #[tokio::test]
    #[traced_test]
    async fn deleted_handle_does_not_warn() {
        let platform = Arc::new(MemoryPlatform::new());
        live_endpoint(&platform).await.delete().await.unwrap();
        assert!(logs_contain("endpoint.deleted"));
        assert!(!logs_contain("endpoint.leaked"));
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_delete_is_logged_and_returned() {
        let platform = Arc::new(MemoryPlatform::new());
        let endpoint = live_endpoint(&platform).await;
        platform.delete_endpoint("ep").await.unwrap();

        let err = endpoint.delete().await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Platform(PlatformError::NotFound { .. })
        ));
        assert!(logs_contain("endpoint.teardown_failed"));
    }

    #[test]
    fn scalar_response_shapes() {
        assert_eq!(scalar_response(&json!(3.0)), Some(3.0));
        assert_eq!(scalar_response(&json!([7])), Some(7.0));
        assert_eq!(scalar_response(&json!([[2.0]])), Some(2.0));
        assert_eq!(scalar_response(&json!([1, 2])), None);
        assert_eq!(scalar_response(&json!("3")), None);
        assert_eq!(scalar_response(&json!({"class": 3})), None);
    }

    #[test]
    fn class_index_rounds_and_bounds() {
        assert_eq!(class_index_of(2.6), Some(3));
        assert_eq!(class_index_of(-0.4), Some(0));
        assert_eq!(class_index_of(9.49), Some(9));
        assert_eq!(class_index_of(9.5), None);
        assert_eq!(class_index_of(-0.6), None);
        assert_eq!(class_index_of(f64::NAN), None);
        assert_eq!(class_index_of(f64::INFINITY), None);
    }

    #[test]
    fn deploy_config_defaults_to_one_cpu_instance() {
        let config = DeployConfig::default();
        assert_eq!(config.instance_type, "ml.m4.xlarge");
        assert_eq!(config.instance_count, 1);
        assert!(config.endpoint_name.is_none());
    }

    #[test]
    fn prediction_correctness() {
        let p = Prediction {
            sample: "cat".to_string(),
            raw: 3.0,
            class_index: 3,
            class_name: "cat".to_string(),
            expected: Some(3),
        };
        assert_eq!(p.is_correct(), Some(true));
    }
}

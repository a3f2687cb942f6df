//! End-to-end workflow: session, dataset, upload, train, deploy, predict,
//! teardown.

use std::sync::Arc;

use ml_platform::{ObjectStore, TrainingPlatform};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::dataset::{upload_dataset, DatasetLocation};
use crate::endpoint::{Endpoint, Prediction};
use crate::error::{Result, WorkflowError};
use crate::job::TrainingJob;
use crate::metrics::METRICS;
use crate::obs::{self, WorkflowSpan};
use crate::samples::load_samples;
use crate::session::Session;

/// Outcome of a complete run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub run_id: String,
    pub session: Session,
    pub dataset_location: DatasetLocation,
    pub job_name: String,
    pub model_artifact: String,
    pub endpoint_name: String,
    pub predictions: Vec<Prediction>,
    /// False only when the endpoint was kept on request.
    pub endpoint_deleted: bool,
}

impl WorkflowReport {
    /// Class indices in sample order.
    pub fn class_indices(&self) -> Vec<u8> {
        self.predictions.iter().map(|p| p.class_index).collect()
    }

    /// Fraction of labeled samples classified correctly.
    pub fn accuracy(&self) -> Option<f64> {
        let graded: Vec<bool> = self
            .predictions
            .iter()
            .filter_map(Prediction::is_correct)
            .collect();
        if graded.is_empty() {
            return None;
        }
        let correct = graded.iter().filter(|c| **c).count();
        Some(correct as f64 / graded.len() as f64)
    }
}

/// Drives the workflow against one platform and object store.
pub struct Workflow {
    platform: Arc<dyn TrainingPlatform>,
    store: Arc<dyn ObjectStore>,
    config: WorkflowConfig,
    keep_endpoint: bool,
}

impl Workflow {
    pub fn new(
        platform: Arc<dyn TrainingPlatform>,
        store: Arc<dyn ObjectStore>,
        config: WorkflowConfig,
    ) -> Self {
        Workflow {
            platform,
            store,
            config,
            keep_endpoint: false,
        }
    }

    /// Leave the endpoint running after predictions instead of deleting it.
    pub fn keep_endpoint(mut self, keep: bool) -> Self {
        self.keep_endpoint = keep;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run every step in order. Any failure aborts the remaining steps.
    ///
    /// Once an endpoint exists it is deleted even if a prediction fails; the
    /// prediction error is returned after teardown. A teardown failure after
    /// a prediction failure is logged and the prediction error wins.
    pub async fn run(&self) -> Result<WorkflowReport> {
        let config = &self.config;
        let policy = config.wait.policy();
        let run_id = Uuid::new_v4().to_string();
        let _span = WorkflowSpan::enter(
            &run_id,
            config
                .training
                .base_job_name
                .as_deref()
                .unwrap_or(&config.training.framework.name),
        );

        obs::emit_step(1, "session");
        let session = Session::bootstrap(self.platform.as_ref(), &config.session).await?;

        // Samples are checked before anything billable starts.
        obs::emit_step(2, "dataset");
        let local_dir = config.dataset.local_dir();
        if !local_dir.is_dir() {
            return Err(WorkflowError::Dataset(format!(
                "dataset not found at {:?}; fetch it first",
                local_dir
            )));
        }
        let samples = load_samples(&config.dataset.samples_dir)?;

        obs::emit_step(3, "upload");
        let location = upload_dataset(
            self.store.as_ref(),
            &session.bucket,
            &local_dir,
            &config.dataset.name,
        )
        .await?;

        obs::emit_step(4, "descriptor");
        let descriptor = config.training.descriptor(&session.role)?;

        obs::emit_step(5, "train");
        let job = TrainingJob::submit(
            self.platform.as_ref(),
            self.store.as_ref(),
            &session,
            descriptor,
            &location,
            &policy,
        )
        .await?;

        obs::emit_step(6, "deploy");
        let endpoint =
            Endpoint::deploy(self.platform.clone(), &job, &config.deploy, &policy).await?;
        let endpoint_name = endpoint.name().to_string();

        obs::emit_step(7, "predict");
        let predictions = match endpoint.predict_all(&samples).await {
            Ok(predictions) => predictions,
            Err(predict_err) => {
                obs::emit_step(8, "teardown");
                // a teardown failure is already logged by `delete`
                let _ = endpoint.delete().await;
                return Err(predict_err);
            }
        };

        obs::emit_step(8, "teardown");
        let endpoint_deleted = if self.keep_endpoint {
            let name = endpoint.keep();
            info!(
                endpoint_name = %name,
                "keeping endpoint; delete it with `mlpilot delete-endpoint`"
            );
            false
        } else {
            endpoint.delete().await?;
            true
        };

        METRICS.flush();
        Ok(WorkflowReport {
            run_id,
            session,
            dataset_location: location,
            job_name: job.name().to_string(),
            model_artifact: job.model_artifact().to_string(),
            endpoint_name,
            predictions,
            endpoint_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(class_index: u8, expected: Option<u8>) -> Prediction {
        Prediction {
            sample: "s".to_string(),
            raw: class_index as f64,
            class_index,
            class_name: String::new(),
            expected,
        }
    }

    #[test]
    fn report_accuracy_ignores_unlabeled() {
        let report = WorkflowReport {
            run_id: "run-1".to_string(),
            session: Session {
                region: "r".to_string(),
                bucket: "b".to_string(),
                role: "role".to_string(),
            },
            dataset_location: "s3://b/data/cifar10".parse().unwrap(),
            job_name: "j".to_string(),
            model_artifact: "s3://b/j/output/model.tar.gz".to_string(),
            endpoint_name: "j".to_string(),
            predictions: vec![
                prediction(1, Some(1)),
                prediction(2, Some(3)),
                prediction(4, None),
            ],
            endpoint_deleted: true,
        };
        assert_eq!(report.class_indices(), vec![1, 2, 4]);
        assert_eq!(report.accuracy(), Some(0.5));
    }
}

//! Training job descriptors and submission (workflow steps 4 and 5).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ml_platform::{
    storage_uri, CreateTrainingJobRequest, FrameworkSpec, ObjectStore, TrainingJobDescription,
    TrainingJobStatus, TrainingPlatform,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::DatasetLocation;
use crate::error::{Result, WorkflowError};
use crate::metrics::METRICS;
use crate::obs;
use crate::session::Session;
use crate::wait::{poll_until, WaitPolicy};

/// Input channel name the dataset location is bound to.
pub const TRAINING_CHANNEL: &str = "training";

/// Platform limit on job and endpoint names.
pub const MAX_NAME_LEN: usize = 63;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";
const TIMESTAMP_LEN: usize = 23;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9](-*[a-zA-Z0-9])*$").expect("static regex"))
}

/// Check a job or endpoint name against the platform naming rule.
pub fn validate_resource_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN || !name_pattern().is_match(name) {
        return Err(WorkflowError::InvalidDescriptor(format!(
            "'{}' must be 1-{} alphanumeric characters or hyphens, starting and ending alphanumeric",
            name, MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// `<base>-<yyyy-mm-dd-HH-MM-SS-mmm>`, with `base` truncated so the whole
/// name fits the platform limit.
pub fn unique_job_name(base: &str, at: DateTime<Utc>) -> String {
    let max_base = MAX_NAME_LEN - TIMESTAMP_LEN - 1;
    let base: String = base.chars().take(max_base).collect();
    let base = base.trim_end_matches('-');
    format!("{}-{}", base, at.format(TIMESTAMP_FORMAT))
}

// ---------------------------------------------------------------------------
// Hyperparameters
// ---------------------------------------------------------------------------

/// Training hyperparameters with the fixed key set the entry point reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HyperParameters {
    pub batch_size: u32,
    pub epochs: u32,
    pub learning_rate: f64,
    pub momentum: f64,
}

impl Default for HyperParameters {
    fn default() -> Self {
        HyperParameters {
            batch_size: 128,
            epochs: 50,
            learning_rate: 0.1,
            momentum: 0.9,
        }
    }
}

impl HyperParameters {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(WorkflowError::InvalidDescriptor(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.epochs == 0 {
            return Err(WorkflowError::InvalidDescriptor(
                "epochs must be at least 1".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(WorkflowError::InvalidDescriptor(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(WorkflowError::InvalidDescriptor(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        Ok(())
    }

    /// String map sent to the platform, which passes it to the entry point.
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("batch_size".to_string(), self.batch_size.to_string());
        map.insert("epochs".to_string(), self.epochs.to_string());
        map.insert("learning_rate".to_string(), self.learning_rate.to_string());
        map.insert("momentum".to_string(), self.momentum.to_string());
        map
    }
}

// ---------------------------------------------------------------------------
// JobDescriptor
// ---------------------------------------------------------------------------

/// Immutable description of one training run. Built once, submitted once.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    entry_point: PathBuf,
    role: String,
    instance_type: String,
    instance_count: u32,
    hyperparameters: HyperParameters,
    framework: FrameworkSpec,
    base_job_name: String,
}

impl JobDescriptor {
    pub fn builder(
        entry_point: impl Into<PathBuf>,
        role: impl Into<String>,
    ) -> JobDescriptorBuilder {
        JobDescriptorBuilder {
            entry_point: entry_point.into(),
            role: role.into(),
            instance_type: "ml.p3.2xlarge".to_string(),
            instance_count: 1,
            hyperparameters: HyperParameters::default(),
            framework: FrameworkSpec::default(),
            base_job_name: None,
        }
    }

    pub fn entry_point(&self) -> &Path {
        &self.entry_point
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn instance_type(&self) -> &str {
        &self.instance_type
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn hyperparameters(&self) -> &HyperParameters {
        &self.hyperparameters
    }

    pub fn framework(&self) -> &FrameworkSpec {
        &self.framework
    }

    pub fn base_job_name(&self) -> &str {
        &self.base_job_name
    }
}

/// Builder for [`JobDescriptor`]; `build` validates every field.
#[derive(Debug, Clone)]
pub struct JobDescriptorBuilder {
    entry_point: PathBuf,
    role: String,
    instance_type: String,
    instance_count: u32,
    hyperparameters: HyperParameters,
    framework: FrameworkSpec,
    base_job_name: Option<String>,
}

impl JobDescriptorBuilder {
    pub fn instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = instance_type.into();
        self
    }

    pub fn instance_count(mut self, count: u32) -> Self {
        self.instance_count = count;
        self
    }

    pub fn hyperparameters(mut self, hyperparameters: HyperParameters) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }

    pub fn framework(mut self, framework: FrameworkSpec) -> Self {
        self.framework = framework;
        self
    }

    pub fn base_job_name(mut self, name: impl Into<String>) -> Self {
        self.base_job_name = Some(name.into());
        self
    }

    pub fn build(self) -> Result<JobDescriptor> {
        if self.entry_point.file_name().is_none() {
            return Err(WorkflowError::InvalidDescriptor(format!(
                "entry point {:?} has no file name",
                self.entry_point
            )));
        }
        if self.role.trim().is_empty() {
            return Err(WorkflowError::InvalidDescriptor(
                "role must not be empty".to_string(),
            ));
        }
        if self.instance_type.trim().is_empty() {
            return Err(WorkflowError::InvalidDescriptor(
                "instance_type must not be empty".to_string(),
            ));
        }
        if self.instance_count == 0 {
            return Err(WorkflowError::InvalidDescriptor(
                "instance_count must be at least 1".to_string(),
            ));
        }
        self.hyperparameters.validate()?;

        let base_job_name = self
            .base_job_name
            .unwrap_or_else(|| format!("{}-training", self.framework.name));
        validate_resource_name(&base_job_name)?;

        Ok(JobDescriptor {
            entry_point: self.entry_point,
            role: self.role,
            instance_type: self.instance_type,
            instance_count: self.instance_count,
            hyperparameters: self.hyperparameters,
            framework: self.framework,
            base_job_name,
        })
    }
}

// ---------------------------------------------------------------------------
// TrainingJob
// ---------------------------------------------------------------------------

/// A training job that reached a terminal status on the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingJob {
    description: TrainingJobDescription,
}

impl TrainingJob {
    /// Upload the entry point, submit the job and block until it finishes.
    ///
    /// The descriptor is consumed: a descriptor is submitted exactly once.
    /// `location` is passed to the platform verbatim as the `training`
    /// channel. A `Failed` or `Stopped` job is returned as
    /// [`WorkflowError::TrainingFailed`]; there is no resubmission.
    pub async fn submit(
        platform: &dyn TrainingPlatform,
        store: &dyn ObjectStore,
        session: &Session,
        descriptor: JobDescriptor,
        location: &DatasetLocation,
        policy: &WaitPolicy,
    ) -> Result<Self> {
        Self::submit_at(
            platform,
            store,
            session,
            descriptor,
            location,
            policy,
            Utc::now(),
        )
        .await
    }

    /// Same as [`TrainingJob::submit`] with a fixed clock for the job name.
    pub async fn submit_at(
        platform: &dyn TrainingPlatform,
        store: &dyn ObjectStore,
        session: &Session,
        descriptor: JobDescriptor,
        location: &DatasetLocation,
        policy: &WaitPolicy,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let job_name = unique_job_name(&descriptor.base_job_name, now);
        validate_resource_name(&job_name)?;

        let entry_point_uri = upload_entry_point(store, session, &job_name, &descriptor).await?;

        let mut input_channels = BTreeMap::new();
        input_channels.insert(TRAINING_CHANNEL.to_string(), location.as_str().to_string());

        let request = CreateTrainingJobRequest {
            job_name: job_name.clone(),
            role: descriptor.role.clone(),
            framework: descriptor.framework.clone(),
            entry_point_uri,
            instance_type: descriptor.instance_type.clone(),
            instance_count: descriptor.instance_count,
            hyperparameters: descriptor.hyperparameters.to_wire(),
            input_channels,
            output_path: storage_uri(&session.bucket, ""),
        };

        platform.create_training_job(request).await?;
        METRICS.inc_jobs_submitted();
        obs::emit_job_submitted(&job_name, &descriptor.instance_type, descriptor.instance_count);

        let description = Self::wait(platform, &job_name, policy).await?;
        Self::from_terminal(description)
    }

    /// Re-read an existing job. It must already be `Completed`.
    pub async fn attach(platform: &dyn TrainingPlatform, job_name: &str) -> Result<Self> {
        let description = platform.describe_training_job(job_name).await?;
        if description.status != TrainingJobStatus::Completed {
            return Err(WorkflowError::TrainingFailed {
                job_name: job_name.to_string(),
                status: description.status.to_string(),
                reason: description
                    .failure_reason
                    .unwrap_or_else(|| "job has not completed".to_string()),
            });
        }
        Self::from_terminal(description)
    }

    async fn wait(
        platform: &dyn TrainingPlatform,
        job_name: &str,
        policy: &WaitPolicy,
    ) -> Result<TrainingJobDescription> {
        let started = Instant::now();
        let description = poll_until(policy, "training job", job_name, move || async move {
            let desc = platform.describe_training_job(job_name).await?;
            obs::emit_job_status(job_name, &desc.status);
            Ok(desc.status.is_terminal().then_some(desc))
        })
        .await?;
        obs::emit_job_finished(
            job_name,
            &description.status,
            started.elapsed().as_millis() as u64,
        );
        Ok(description)
    }

    fn from_terminal(description: TrainingJobDescription) -> Result<Self> {
        match description.status {
            TrainingJobStatus::Completed if description.model_artifact.is_some() => {
                Ok(TrainingJob { description })
            }
            TrainingJobStatus::Completed => Err(WorkflowError::TrainingFailed {
                job_name: description.job_name,
                status: "Completed".to_string(),
                reason: "platform reported no model artifact".to_string(),
            }),
            status => Err(WorkflowError::TrainingFailed {
                job_name: description.job_name,
                status: status.to_string(),
                reason: description
                    .failure_reason
                    .unwrap_or_else(|| "no reason given".to_string()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.description.job_name
    }

    /// Storage URI of the trained model.
    pub fn model_artifact(&self) -> &str {
        self.description.model_artifact.as_deref().unwrap_or_default()
    }

    pub fn description(&self) -> &TrainingJobDescription {
        &self.description
    }
}

async fn upload_entry_point(
    store: &dyn ObjectStore,
    session: &Session,
    job_name: &str,
    descriptor: &JobDescriptor,
) -> Result<String> {
    let file_name = descriptor
        .entry_point
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| WorkflowError::InvalidDescriptor("entry point has no file name".into()))?;
    let source = tokio::fs::read(&descriptor.entry_point).await.map_err(|e| {
        WorkflowError::InvalidDescriptor(format!(
            "cannot read entry point {:?}: {}",
            descriptor.entry_point, e
        ))
    })?;

    let key = format!("{}/source/{}", job_name, file_name);
    store.put_object(&session.bucket, &key, source).await?;
    let uri = storage_uri(&session.bucket, &key);
    debug!("entry point uploaded to {}", uri);
    info!(job_name = %job_name, entry_point = %uri, "training source staged");
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_hyperparameters_match_reference_run() {
        let hp = HyperParameters::default();
        assert_eq!(hp.batch_size, 128);
        assert_eq!(hp.epochs, 50);
        assert_eq!(hp.learning_rate, 0.1);
        assert_eq!(hp.momentum, 0.9);
        hp.validate().unwrap();
    }

    #[test]
    fn hyperparameters_wire_format() {
        let wire = HyperParameters::default().to_wire();
        assert_eq!(wire.len(), 4);
        assert_eq!(wire["batch_size"], "128");
        assert_eq!(wire["epochs"], "50");
        assert_eq!(wire["learning_rate"], "0.1");
        assert_eq!(wire["momentum"], "0.9");
    }

    #[test]
    fn hyperparameter_validation() {
        let base = HyperParameters::default();
        assert!(HyperParameters { batch_size: 0, ..base }.validate().is_err());
        assert!(HyperParameters { epochs: 0, ..base }.validate().is_err());
        assert!(HyperParameters { learning_rate: 0.0, ..base }.validate().is_err());
        assert!(HyperParameters { learning_rate: f64::NAN, ..base }.validate().is_err());
        assert!(HyperParameters { momentum: 1.0, ..base }.validate().is_err());
        assert!(HyperParameters { momentum: 0.0, ..base }.validate().is_ok());
    }

    #[test]
    fn unknown_hyperparameter_keys_rejected() {
        let toml = "batch_size = 1\nepochs = 1\nlearning_rate = 0.1\nmomentum = 0.5\ndropout = 0.2\n";
        assert!(toml::from_str::<HyperParameters>(toml).is_err());
    }

    #[test]
    fn job_name_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            unique_job_name("mxnet-training", at),
            "mxnet-training-2024-01-02-03-04-05-000"
        );
    }

    #[test]
    fn long_base_names_are_truncated_to_limit() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let name = unique_job_name(&"a".repeat(100), at);
        assert_eq!(name.len(), MAX_NAME_LEN);
        validate_resource_name(&name).unwrap();

        let name = unique_job_name(&format!("{}-x", "b".repeat(38)), at);
        assert!(!name.contains("--"));
        validate_resource_name(&name).unwrap();
    }

    #[test]
    fn resource_name_rules() {
        assert!(validate_resource_name("cifar10-ep").is_ok());
        assert!(validate_resource_name("-leading").is_err());
        assert!(validate_resource_name("trailing-").is_err());
        assert!(validate_resource_name("under_score").is_err());
        assert!(validate_resource_name("").is_err());
        assert!(validate_resource_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn builder_validates_fields() {
        assert!(JobDescriptor::builder("cifar10.py", "role").build().is_ok());
        assert!(JobDescriptor::builder("cifar10.py", "").build().is_err());
        assert!(JobDescriptor::builder("cifar10.py", "role")
            .instance_count(0)
            .build()
            .is_err());
        assert!(JobDescriptor::builder("cifar10.py", "role")
            .instance_type(" ")
            .build()
            .is_err());
        assert!(JobDescriptor::builder("cifar10.py", "role")
            .base_job_name("bad_name")
            .build()
            .is_err());
    }

    #[test]
    fn builder_defaults() {
        let d = JobDescriptor::builder("src/cifar10.py", "role").build().unwrap();
        assert_eq!(d.instance_count(), 1);
        assert_eq!(d.base_job_name(), "mxnet-training");
        assert_eq!(d.framework().name, "mxnet");
        assert_eq!(d.entry_point(), Path::new("src/cifar10.py"));
    }
}

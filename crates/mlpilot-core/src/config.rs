//! Workflow configuration loaded from TOML.
//!
//! Every section is optional; missing values fall back to the defaults of
//! the CIFAR-10 reference run (two GPU training instances, one CPU
//! inference instance).
//!
//! ```toml
//! [dataset]
//! root = "data"
//!
//! [training]
//! entry_point = "cifar10.py"
//! instance_count = 2
//!
//! [training.hyperparameters]
//! epochs = 10
//!
//! [wait]
//! poll_interval_secs = 15
//! timeout_secs = 7200
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ml_platform::FrameworkSpec;
use serde::{Deserialize, Serialize};

use crate::endpoint::DeployConfig;
use crate::error::{Result, WorkflowError};
use crate::job::{HyperParameters, JobDescriptor};
use crate::session::SessionOverrides;
use crate::wait::WaitPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfig {
    pub session: SessionOverrides,
    pub dataset: DatasetConfig,
    pub training: TrainingConfig,
    pub deploy: DeployConfig,
    pub wait: WaitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    /// Local directory name and storage prefix, `data/<name>`.
    pub name: String,
    /// Download root; the dataset lives in `<root>/<name>`.
    pub root: PathBuf,
    /// Archive URL; the CIFAR-10 mirror when unset.
    pub url: Option<String>,
    /// Expected SHA-256 of the archive.
    pub sha256: Option<String>,
    /// Directory of `.bin` sample images used for inference.
    pub samples_dir: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            name: "cifar10".to_string(),
            root: PathBuf::from("data"),
            url: None,
            sha256: None,
            samples_dir: PathBuf::from("samples"),
        }
    }
}

impl DatasetConfig {
    pub fn local_dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub entry_point: PathBuf,
    pub instance_type: String,
    pub instance_count: u32,
    pub base_job_name: Option<String>,
    pub framework: FrameworkSpec,
    pub hyperparameters: HyperParameters,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            entry_point: PathBuf::from("cifar10.py"),
            instance_type: "ml.p3.2xlarge".to_string(),
            instance_count: 2,
            base_job_name: None,
            framework: FrameworkSpec::default(),
            hyperparameters: HyperParameters::default(),
        }
    }
}

impl TrainingConfig {
    /// Build a validated job descriptor for `role`.
    pub fn descriptor(&self, role: &str) -> Result<JobDescriptor> {
        let mut builder = JobDescriptor::builder(self.entry_point.clone(), role)
            .instance_type(self.instance_type.clone())
            .instance_count(self.instance_count)
            .framework(self.framework.clone())
            .hyperparameters(self.hyperparameters);
        if let Some(base) = &self.base_job_name {
            builder = builder.base_job_name(base.clone());
        }
        builder.build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaitConfig {
    pub poll_interval_secs: u64,
    pub timeout_secs: Option<u64>,
}

impl Default for WaitConfig {
    fn default() -> Self {
        let policy = WaitPolicy::default();
        WaitConfig {
            poll_interval_secs: policy.poll_interval.as_secs(),
            timeout_secs: policy.timeout.map(|t| t.as_secs()),
        }
    }
}

impl WaitConfig {
    pub fn policy(&self) -> WaitPolicy {
        let policy =
            WaitPolicy::default().with_poll_interval(Duration::from_secs(self.poll_interval_secs));
        match self.timeout_secs {
            Some(secs) => policy.with_timeout(Duration::from_secs(secs)),
            None => policy,
        }
    }
}

impl WorkflowConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| WorkflowError::Config(e.to_string()))
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::Config(format!("cannot read {:?}: {}", path, e)))?;
        toml::from_str(&contents)
            .map_err(|e| WorkflowError::Config(format!("{:?}: {}", path, e)))
    }

    /// Resolve relative paths against `base`, normally the config file's
    /// directory.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        for path in [
            &mut self.dataset.root,
            &mut self.dataset.samples_dir,
            &mut self.training.entry_point,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_reference_run() {
        let config = WorkflowConfig::from_toml_str("").unwrap();
        assert_eq!(config, WorkflowConfig::default());
        assert_eq!(config.training.instance_type, "ml.p3.2xlarge");
        assert_eq!(config.training.instance_count, 2);
        assert_eq!(config.training.hyperparameters, HyperParameters::default());
        assert_eq!(config.deploy.instance_type, "ml.m4.xlarge");
        assert_eq!(config.deploy.instance_count, 1);
        assert_eq!(config.wait.policy(), WaitPolicy::default());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = WorkflowConfig::from_toml_str(
            r#"
            [session]
            bucket = "my-bucket"

            [training]
            instance_count = 1

            [training.hyperparameters]
            epochs = 5

            [deploy]
            endpoint_name = "cifar-demo"

            [wait]
            poll_interval_secs = 5
            timeout_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.session.bucket.as_deref(), Some("my-bucket"));
        assert_eq!(config.training.instance_count, 1);
        assert_eq!(config.training.instance_type, "ml.p3.2xlarge");
        assert_eq!(config.training.hyperparameters.epochs, 5);
        assert_eq!(config.training.hyperparameters.batch_size, 128);
        assert_eq!(config.deploy.endpoint_name.as_deref(), Some("cifar-demo"));
        assert_eq!(config.deploy.instance_type, "ml.m4.xlarge");

        let policy = config.wait.policy();
        assert_eq!(policy.poll_interval, Duration::from_secs(5));
        assert_eq!(policy.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = WorkflowConfig::from_toml_str("[training]\ngpus = 4\n").unwrap_err();
        assert!(matches!(err, WorkflowError::Config(_)));
    }

    #[test]
    fn descriptor_uses_training_section() {
        let config = TrainingConfig {
            base_job_name: Some("cifar".to_string()),
            ..TrainingConfig::default()
        };
        let descriptor = config.descriptor("role").unwrap();
        assert_eq!(descriptor.instance_count(), 2);
        assert_eq!(descriptor.base_job_name(), "cifar");

        let zero = TrainingConfig {
            instance_count: 0,
            ..TrainingConfig::default()
        };
        assert!(zero.descriptor("role").is_err());
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let config = WorkflowConfig::default().resolve_paths(Path::new("/work"));
        assert_eq!(config.dataset.local_dir(), PathBuf::from("/work/data/cifar10"));
        assert_eq!(config.training.entry_point, PathBuf::from("/work/cifar10.py"));
    }
}

//! mlpilot core library
//!
//! Drives a managed training platform through the CIFAR-10 workflow:
//! session bootstrap, dataset upload, distributed training, endpoint
//! deployment, inference and teardown. Platform access goes through the
//! `ml_platform` traits so every step runs against the in-memory fakes in
//! tests.

pub mod config;
pub mod dataset;
pub mod endpoint;
pub mod error;
pub mod job;
pub mod metrics;
pub mod obs;
pub mod samples;
pub mod session;
pub mod telemetry;
pub mod wait;
pub mod workflow;

pub use config::{DatasetConfig, TrainingConfig, WaitConfig, WorkflowConfig};
pub use dataset::{upload_dataset, DatasetLocation, DATA_PREFIX};
pub use endpoint::{DeployConfig, Endpoint, Prediction};
pub use error::{Result, WorkflowError};
pub use job::{
    unique_job_name, validate_resource_name, HyperParameters, JobDescriptor,
    JobDescriptorBuilder, TrainingJob, TRAINING_CHANNEL,
};
pub use samples::{
    class_index, class_name, extract_from_batch, load_samples, seed_samples, write_samples,
    SampleImage, CLASS_NAMES, TEST_BATCH,
};
pub use session::{Session, SessionOverrides};
pub use wait::WaitPolicy;
pub use workflow::{Workflow, WorkflowReport};

pub use metrics::METRICS;
pub use obs::{
    emit_endpoint_deleted, emit_endpoint_deployed, emit_job_submitted, emit_prediction,
    emit_step, WorkflowSpan,
};
pub use telemetry::init_tracing;

/// mlpilot version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

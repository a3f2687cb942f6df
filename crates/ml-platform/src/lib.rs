//! ml-platform: external collaborators of the mlpilot workflow
//!
//! This crate describes the managed ML platform as traits, so the workflow
//! never depends on a concrete transport. The HTTP implementation lives in
//! `platform-client`; tests use the in-memory fakes in [`fakes`].
//!
//! ## Key Components
//!
//! - `ObjectStore`: durable storage the dataset and entry point are uploaded to
//! - `TrainingPlatform`: session lookup, training jobs, endpoints, invocations
//! - `PlatformError`: failure taxonomy shared by every backend

mod error;
pub mod fakes;
pub mod platform_traits;

pub use error::PlatformError;
pub use platform_traits::{
    parse_storage_uri, storage_uri, CreateEndpointRequest, CreateTrainingJobRequest,
    EndpointDescription, EndpointStatus, FrameworkSpec, ObjectStore, PlatformResult, SessionInfo,
    TrainingJobDescription, TrainingJobStatus, TrainingPlatform, STORAGE_SCHEME,
};

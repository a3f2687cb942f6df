//! Platform-Client: HTTP access to the managed ML platform
//!
//! This crate implements the `ml-platform` traits over HTTP with `reqwest`,
//! and downloads public datasets for the acquisition step.
//!
//! ## Key Components
//!
//! - `PlatformConfig`: endpoint URLs, region, token and bucket, read from env
//! - `PlatformClient`: `TrainingPlatform` + `ObjectStore` over the REST API
//! - `DatasetFetcher`: checksum-verified download and unpacking of dataset archives

pub mod client;
pub mod config;
pub mod dataset;

pub use client::PlatformClient;
pub use config::PlatformConfig;
pub use dataset::{sha256_file, DatasetFetcher, DatasetSource, FetchError};

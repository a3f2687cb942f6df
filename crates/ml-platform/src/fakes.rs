//! In-memory fakes for platform traits (testing only)
//!
//! Provides `MemoryObjectStore` and `MemoryPlatform` that satisfy the trait
//! contracts without any network access. `MemoryPlatform` advances training
//! jobs and endpoints by one step per describe call, so wait loops can be
//! exercised deterministically.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::PlatformError;
use crate::platform_traits::*;

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

/// In-memory object store backed by a `BTreeMap<(bucket, key), bytes>`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes stored at `bucket/key`, if any.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    /// Total number of stored objects across all buckets.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> PlatformResult<()> {
        if bucket.is_empty() || key.is_empty() {
            return Err(PlatformError::InvalidRequest(
                "bucket and key must not be empty".to_string(),
            ));
        }
        let mut objects = self.objects.lock().unwrap();
        objects.insert((bucket.to_string(), key.to_string()), data);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> PlatformResult<Vec<String>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryPlatform
// ---------------------------------------------------------------------------

/// How a fake training job ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Complete,
    Fail(String),
}

type Predictor = Box<dyn Fn(u64, &Value) -> PlatformResult<Value> + Send + Sync>;

#[derive(Debug)]
struct JobState {
    request: CreateTrainingJobRequest,
    description: TrainingJobDescription,
    polls_remaining: u32,
}

#[derive(Debug)]
struct EndpointState {
    description: EndpointDescription,
    polls_remaining: u32,
}

/// In-memory training platform.
///
/// Jobs stay `InProgress` for `polls` describe calls, then end according to
/// the configured `JobOutcome`. Endpoints stay `Creating` for the same number
/// of polls, then become `InService` (or `Failed` if configured).
pub struct MemoryPlatform {
    session: SessionInfo,
    polls: u32,
    job_outcome: JobOutcome,
    endpoint_failure: Option<String>,
    predictor: Predictor,
    jobs: Mutex<HashMap<String, JobState>>,
    endpoints: Mutex<HashMap<String, EndpointState>>,
    submissions: Mutex<Vec<CreateTrainingJobRequest>>,
    endpoint_requests: Mutex<Vec<CreateEndpointRequest>>,
    invocations: AtomicU64,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    /// A platform whose jobs succeed after one poll and whose endpoint
    /// answers invocation `n` with class `n % 10`.
    pub fn new() -> Self {
        MemoryPlatform {
            session: SessionInfo {
                region: "us-west-2".to_string(),
                default_bucket: "mlpilot-us-west-2-000000000000".to_string(),
                execution_role: "arn:aws:iam::000000000000:role/mlpilot-execution".to_string(),
            },
            polls: 1,
            job_outcome: JobOutcome::Complete,
            endpoint_failure: None,
            predictor: Box::new(|n, _| Ok(json!((n % 10) as f64))),
            jobs: Mutex::new(HashMap::new()),
            endpoints: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            endpoint_requests: Mutex::new(Vec::new()),
            invocations: AtomicU64::new(0),
        }
    }

    /// Number of `InProgress`/`Creating` polls before a terminal status.
    pub fn with_polls(mut self, polls: u32) -> Self {
        self.polls = polls;
        self
    }

    /// Make every training job fail with `reason`.
    pub fn with_training_failure(mut self, reason: &str) -> Self {
        self.job_outcome = JobOutcome::Fail(reason.to_string());
        self
    }

    /// Make every endpoint fail provisioning with `reason`.
    pub fn with_endpoint_failure(mut self, reason: &str) -> Self {
        self.endpoint_failure = Some(reason.to_string());
        self
    }

    /// Replace the endpoint's response function. Receives the zero-based
    /// invocation counter and the request payload.
    pub fn with_predictor<F>(mut self, predictor: F) -> Self
    where
        F: Fn(u64, &Value) -> PlatformResult<Value> + Send + Sync + 'static,
    {
        self.predictor = Box::new(predictor);
        self
    }

    pub fn with_session(mut self, session: SessionInfo) -> Self {
        self.session = session;
        self
    }

    /// Every training request received, in submission order.
    pub fn submitted_jobs(&self) -> Vec<CreateTrainingJobRequest> {
        self.submissions.lock().unwrap().clone()
    }

    /// Every endpoint request received, in order.
    pub fn endpoint_requests(&self) -> Vec<CreateEndpointRequest> {
        self.endpoint_requests.lock().unwrap().clone()
    }

    /// Names of endpoints that exist and have not been deleted.
    pub fn live_endpoints(&self) -> Vec<String> {
        let endpoints = self.endpoints.lock().unwrap();
        let mut names: Vec<String> = endpoints.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrainingPlatform for MemoryPlatform {
    async fn session_info(&self) -> PlatformResult<SessionInfo> {
        Ok(self.session.clone())
    }

    async fn create_training_job(&self, request: CreateTrainingJobRequest) -> PlatformResult<()> {
        if request.instance_count == 0 {
            return Err(PlatformError::InvalidRequest(
                "instance_count must be at least 1".to_string(),
            ));
        }
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&request.job_name) {
            return Err(PlatformError::conflict("training job", &request.job_name));
        }
        let description = TrainingJobDescription {
            job_name: request.job_name.clone(),
            status: TrainingJobStatus::InProgress,
            failure_reason: None,
            model_artifact: None,
            created_at: Utc::now(),
            ended_at: None,
        };
        self.submissions.lock().unwrap().push(request.clone());
        jobs.insert(
            request.job_name.clone(),
            JobState {
                request,
                description,
                polls_remaining: self.polls,
            },
        );
        Ok(())
    }

    async fn describe_training_job(
        &self,
        job_name: &str,
    ) -> PlatformResult<TrainingJobDescription> {
        let mut jobs = self.jobs.lock().unwrap();
        let state = jobs
            .get_mut(job_name)
            .ok_or_else(|| PlatformError::not_found("training job", job_name))?;

        if state.description.status == TrainingJobStatus::InProgress {
            if state.polls_remaining > 0 {
                state.polls_remaining -= 1;
            } else {
                match &self.job_outcome {
                    JobOutcome::Complete => {
                        state.description.status = TrainingJobStatus::Completed;
                        state.description.model_artifact = Some(format!(
                            "{}/{}/output/model.tar.gz",
                            state.request.output_path.trim_end_matches('/'),
                            job_name
                        ));
                    }
                    JobOutcome::Fail(reason) => {
                        state.description.status = TrainingJobStatus::Failed;
                        state.description.failure_reason = Some(reason.clone());
                    }
                }
                state.description.ended_at = Some(Utc::now());
            }
        }
        Ok(state.description.clone())
    }

    async fn create_endpoint(&self, request: CreateEndpointRequest) -> PlatformResult<()> {
        if request.instance_count == 0 {
            return Err(PlatformError::InvalidRequest(
                "instance_count must be at least 1".to_string(),
            ));
        }
        let mut endpoints = self.endpoints.lock().unwrap();
        if endpoints.contains_key(&request.endpoint_name) {
            return Err(PlatformError::conflict("endpoint", &request.endpoint_name));
        }
        self.endpoint_requests.lock().unwrap().push(request.clone());
        endpoints.insert(
            request.endpoint_name.clone(),
            EndpointState {
                description: EndpointDescription {
                    endpoint_name: request.endpoint_name,
                    status: EndpointStatus::Creating,
                    failure_reason: None,
                    instance_type: request.instance_type,
                    instance_count: request.instance_count,
                },
                polls_remaining: self.polls,
            },
        );
        Ok(())
    }

    async fn describe_endpoint(&self, endpoint_name: &str) -> PlatformResult<EndpointDescription> {
        let mut endpoints = self.endpoints.lock().unwrap();
        let state = endpoints
            .get_mut(endpoint_name)
            .ok_or_else(|| PlatformError::not_found("endpoint", endpoint_name))?;

        if state.description.status == EndpointStatus::Creating {
            if state.polls_remaining > 0 {
                state.polls_remaining -= 1;
            } else if let Some(reason) = &self.endpoint_failure {
                state.description.status = EndpointStatus::Failed;
                state.description.failure_reason = Some(reason.clone());
            } else {
                state.description.status = EndpointStatus::InService;
            }
        }
        Ok(state.description.clone())
    }

    async fn invoke_endpoint(
        &self,
        endpoint_name: &str,
        payload: Value,
    ) -> PlatformResult<Value> {
        {
            let endpoints = self.endpoints.lock().unwrap();
            let state = endpoints
                .get(endpoint_name)
                .ok_or_else(|| PlatformError::not_found("endpoint", endpoint_name))?;
            if state.description.status != EndpointStatus::InService {
                return Err(PlatformError::InvalidState {
                    kind: "endpoint".to_string(),
                    name: endpoint_name.to_string(),
                    status: state.description.status.to_string(),
                });
            }
        }
        let n = self.invocations.fetch_add(1, Ordering::SeqCst);
        (self.predictor)(n, &payload)
    }

    async fn delete_endpoint(&self, endpoint_name: &str) -> PlatformResult<()> {
        let mut endpoints = self.endpoints.lock().unwrap();
        endpoints
            .remove(endpoint_name)
            .map(|_| ())
            .ok_or_else(|| PlatformError::not_found("endpoint", endpoint_name))
    }
}

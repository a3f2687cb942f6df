//! Process-wide counters for workflow activity.
//!
//! Incremented at the call site; [`Metrics::flush`] reports them as one
//! `info!` event, normally at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    objects_uploaded: AtomicU64,
    jobs_submitted: AtomicU64,
    endpoints_deployed: AtomicU64,
    predictions: AtomicU64,
    endpoints_deleted: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            objects_uploaded: AtomicU64::new(0),
            jobs_submitted: AtomicU64::new(0),
            endpoints_deployed: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            endpoints_deleted: AtomicU64::new(0),
        }
    }

    pub fn add_objects_uploaded(&self, n: u64) {
        self.objects_uploaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_jobs_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_endpoints_deployed(&self) {
        self.endpoints_deployed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_predictions(&self) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_endpoints_deleted(&self) {
        self.endpoints_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Endpoints deployed by this process and not yet deleted.
    pub fn endpoints_outstanding(&self) -> u64 {
        self.endpoints_deployed().saturating_sub(self.endpoints_deleted())
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            objects_uploaded = self.objects_uploaded(),
            jobs_submitted = self.jobs_submitted(),
            endpoints_deployed = self.endpoints_deployed(),
            predictions = self.predictions(),
            endpoints_deleted = self.endpoints_deleted(),
        );
    }

    pub fn objects_uploaded(&self) -> u64 {
        self.objects_uploaded.load(Ordering::Relaxed)
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.jobs_submitted.load(Ordering::Relaxed)
    }

    pub fn endpoints_deployed(&self) -> u64 {
        self.endpoints_deployed.load(Ordering::Relaxed)
    }

    pub fn predictions(&self) -> u64 {
        self.predictions.load(Ordering::Relaxed)
    }

    pub fn endpoints_deleted(&self) -> u64 {
        self.endpoints_deleted.load(Ordering::Relaxed)
    }
}

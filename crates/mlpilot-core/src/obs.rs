//! Structured observability hooks for the workflow lifecycle.
//!
//! Each step emits one `info!` event with a stable `event` field so log
//! pipelines can follow a run. The only non-info events are the leak and
//! teardown warnings, since both mean billable infrastructure may still be
//! running.

use tracing::{error, info, warn};

/// RAII guard that enters a workflow-scoped tracing span.
pub struct WorkflowSpan {
    _span: tracing::span::EnteredSpan,
}

impl WorkflowSpan {
    /// Create and enter a span tagged with the run id and workflow name.
    pub fn enter(run_id: &str, workflow: &str) -> Self {
        let span = tracing::info_span!(
            "mlpilot.workflow",
            run_id = %run_id,
            workflow = %workflow
        );
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a numbered workflow step started.
pub fn emit_step(step: u8, name: &str) {
    info!(event = "workflow.step", step = step, name = %name);
}

pub fn emit_dataset_uploaded(location: &str, objects: usize, bytes: u64) {
    info!(
        event = "dataset.uploaded",
        location = %location,
        objects = objects,
        bytes = bytes,
    );
}

pub fn emit_job_submitted(job_name: &str, instance_type: &str, instance_count: u32) {
    info!(
        event = "job.submitted",
        job_name = %job_name,
        instance_type = %instance_type,
        instance_count = instance_count,
    );
}

pub fn emit_job_status(job_name: &str, status: &dyn std::fmt::Display) {
    info!(event = "job.status", job_name = %job_name, status = %status);
}

pub fn emit_job_finished(job_name: &str, status: &dyn std::fmt::Display, duration_ms: u64) {
    info!(
        event = "job.finished",
        job_name = %job_name,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_endpoint_deployed(endpoint_name: &str, instance_type: &str, instance_count: u32) {
    info!(
        event = "endpoint.deployed",
        endpoint_name = %endpoint_name,
        instance_type = %instance_type,
        instance_count = instance_count,
    );
}

pub fn emit_prediction(endpoint_name: &str, sample: &str, class_index: u8, raw: f64) {
    info!(
        event = "endpoint.predicted",
        endpoint_name = %endpoint_name,
        sample = %sample,
        class_index = class_index,
        raw = raw,
    );
}

pub fn emit_endpoint_deleted(endpoint_name: &str) {
    info!(event = "endpoint.deleted", endpoint_name = %endpoint_name);
}

/// Emit event: an endpoint handle went away while the endpoint was still live.
pub fn emit_endpoint_leaked(endpoint_name: &str) {
    warn!(
        event = "endpoint.leaked",
        endpoint_name = %endpoint_name,
        "endpoint is still running and billing; delete it explicitly",
    );
}

/// Emit event: the teardown call itself failed.
pub fn emit_teardown_failed(endpoint_name: &str, error: &dyn std::fmt::Display) {
    error!(
        event = "endpoint.teardown_failed",
        endpoint_name = %endpoint_name,
        error = %error,
        "endpoint may still be running and billing",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_span_create() {
        let _span = WorkflowSpan::enter("run-1", "mxnet-training");
        emit_step(1, "session");
    }
}

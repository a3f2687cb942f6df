//! Session and execution-role bootstrap (workflow step 1).

use ml_platform::TrainingPlatform;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, WorkflowError};

/// Explicit values that take precedence over what the platform reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOverrides {
    pub bucket: Option<String>,
    pub role: Option<String>,
}

/// Resolved session context, created once and reused by every later step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub region: String,
    pub bucket: String,
    pub role: String,
}

impl Session {
    /// Resolve region, bucket and role.
    ///
    /// The platform is queried once; overrides replace the reported bucket
    /// and role. An empty bucket or role after resolution is an error.
    pub async fn bootstrap(
        platform: &dyn TrainingPlatform,
        overrides: &SessionOverrides,
    ) -> Result<Self> {
        let info = platform.session_info().await?;

        let bucket = overrides
            .bucket
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or(info.default_bucket);
        let role = overrides
            .role
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or(info.execution_role);

        if bucket.is_empty() {
            return Err(WorkflowError::Config(
                "no bucket configured and the platform reported none".to_string(),
            ));
        }
        if role.is_empty() {
            return Err(WorkflowError::Config(
                "no execution role configured and the platform reported none".to_string(),
            ));
        }

        info!(region = %info.region, bucket = %bucket, role = %role, "session ready");
        Ok(Session {
            region: info.region,
            bucket,
            role,
        })
    }
}

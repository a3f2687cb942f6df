//! Polling policy for blocking on remote jobs and endpoints.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{Result, WorkflowError};

/// How long and how often to poll a remote resource.
///
/// `timeout: None` waits until the platform reports a terminal status,
/// leaving time limits to the platform itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy {
            poll_interval: Duration::from_secs(30),
            timeout: None,
        }
    }
}

impl WaitPolicy {
    /// Poll without sleeping. Used against in-memory platforms.
    pub fn immediate() -> Self {
        WaitPolicy {
            poll_interval: Duration::ZERO,
            timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Call `check` until it yields `Some`, sleeping `poll_interval` between
/// calls. Errors from `check` end the wait immediately.
pub(crate) async fn poll_until<T, F, Fut>(
    policy: &WaitPolicy,
    what: &str,
    name: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    loop {
        if let Some(done) = check().await? {
            return Ok(done);
        }
        if let Some(timeout) = policy.timeout {
            if started.elapsed() + policy.poll_interval > timeout {
                return Err(WorkflowError::WaitTimedOut {
                    what: what.to_string(),
                    name: name.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
        }
        tokio::time::sleep(policy.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn returns_first_ready_value() {
        let calls = Cell::new(0);
        let policy = WaitPolicy::default().with_poll_interval(Duration::from_secs(5));
        let out = poll_until(&policy, "job", "j", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Ok(if n == 3 { Some(n) } else { None }) }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let policy = WaitPolicy::default()
            .with_poll_interval(Duration::from_secs(10))
            .with_timeout(Duration::from_secs(25));
        let err = poll_until::<(), _, _>(&policy, "endpoint", "ep", || async { Ok(None) })
            .await
            .unwrap_err();
        match err {
            WorkflowError::WaitTimedOut {
                what,
                name,
                waited_secs,
            } => {
                assert_eq!(what, "endpoint");
                assert_eq!(name, "ep");
                assert_eq!(waited_secs, 20);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn check_error_stops_wait() {
        let err = poll_until::<(), _, _>(&WaitPolicy::immediate(), "job", "j", || async {
            Err(WorkflowError::Config("boom".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Config(_)));
    }
}

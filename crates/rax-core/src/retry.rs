//! Retry handling for conflict responses.
//!
//! Teardown operations race provider-side cleanup: the cloud answers 409
//! while an earlier asynchronous operation on the same resource is still in
//! flight. [`retry_on_conflict`] keeps re-issuing the operation on that
//! signal, pacing attempts and bounding the total wait by wall clock. Every
//! other error propagates immediately.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Pacing and wall-clock bound for conflict retries.
#[derive(Debug, Clone, Copy)]
pub struct ConflictRetryPolicy {
    /// Delay between attempts
    pub interval: Duration,
    /// Total wall-clock budget across all attempts
    pub max_elapsed: Duration,
}

impl Default for ConflictRetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(3600),
        }
    }
}

/// Run `operation` until it yields a non-conflict outcome or the policy's
/// wall-clock budget is spent, sleeping `interval` between attempts.
///
/// When the budget runs out, the final conflict error is returned as is.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: ConflictRetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + policy.max_elapsed;
    loop {
        match operation().await {
            Err(err) if err.is_conflict() => {
                if Instant::now() + policy.interval >= deadline {
                    tracing::warn!(%err, "conflict retry budget exhausted");
                    return Err(err);
                }
                tracing::debug!(
                    interval_secs = policy.interval.as_secs(),
                    "conflict, waiting before retry"
                );
                sleep(policy.interval).await;
            }
            outcome => return outcome,
        }
    }
}

//! Bounded retry with a fixed backoff.

use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::error::StatsError;

/// Retry policy for flaky RPC calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// Sleeps `policy.backoff` between attempts. The last error is kept as the
/// source of the returned `RetriesExhausted`.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < policy.attempts {
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {:#}",
                        operation, attempt, policy.attempts, policy.backoff, e
                    );
                    tokio::time::sleep(policy.backoff).await;
                }
                last_error = Some(e);
            },
        }
    }

    let source = last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts made"));
    Err(anyhow::Error::new(StatsError::RetriesExhausted {
        operation: operation.to_string(),
        attempts: policy.attempts,
    })
    .context(format!("{:#}", source)))
}

//! Bounded exponential backoff around provider calls

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use std::future::Future;
use std::time::Duration;

use crate::{DeltaError, DeltaResult};

/// How hard to retry a failing provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for transient failures, including the first
    pub max_attempts: u32,
    /// Total attempts while the provider keeps rate limiting
    pub max_rate_limited_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_rate_limited_attempts: 10,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            max_rate_limited_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            randomization_factor: 0.2,
            multiplier: 2.0,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Run `call` until it succeeds, fails permanently or exhausts the policy.
///
/// Rate-limit responses wait for the provider's `Retry-After` hint when
/// present and otherwise for the next backoff interval. The last error is
/// returned once attempts run out.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> DeltaResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DeltaResult<T>>,
{
    let mut backoff = policy.backoff();
    let mut transient_attempts = 0u32;
    let mut rate_limited_attempts = 0u32;

    loop {
        let error = match call().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let wait = match &error {
            DeltaError::RateLimited { retry_after } => {
                rate_limited_attempts += 1;
                if rate_limited_attempts >= policy.max_rate_limited_attempts {
                    return Err(error);
                }
                match retry_after {
                    Some(hint) => *hint,
                    None => backoff.next_backoff().unwrap_or(policy.max_interval),
                }
            }
            DeltaError::Transient { .. } => {
                transient_attempts += 1;
                if transient_attempts >= policy.max_attempts {
                    return Err(error);
                }
                backoff.next_backoff().unwrap_or(policy.max_interval)
            }
            _ => return Err(error),
        };

        tracing::warn!(
            operation,
            attempt = transient_attempts + rate_limited_attempts,
            wait_ms = wait.as_millis() as u64,
            error = %error,
            "Provider call failed, retrying"
        );
        tokio::time::sleep(wait).await;
    }
}

//! Bounded retry-on-conflict loop
//!
//! Each attempt re-fetches the object and rebuilds its patch, so a retry
//! always works against the latest server state.

use crate::error::ClusterError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Attempt bound and backoff curve for conflict retries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Growth factor applied per subsequent attempt
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            multiplier: 1.0,
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            ..Self::default()
        }
    }

    /// Same bound without any delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()).max(0.0))
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError {
    /// Every attempt hit a conflict
    Exhausted { attempts: u32, last: ClusterError },
    /// A non-conflict error ended the loop
    Failed { attempts: u32, error: ClusterError },
    /// Shutdown was requested between attempts
    Cancelled,
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the bound is hit
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_conflict() => {
                return Err(RetryError::Failed {
                    attempts: attempt,
                    error,
                })
            }
            Err(last) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last,
                })
            }
            Err(conflict) => {
                let delay = policy.backoff_after(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %conflict,
                    "Write conflict, retrying with latest object"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                }
            }
        }

        attempt += 1;
    }
}

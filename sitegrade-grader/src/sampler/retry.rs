//! Upstream Retry Logic
//!
//! Bounded exponential backoff for transient raster service failures.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful (or a non-retryable error), return it
//! 3. If `Upstream` error and retries remain: log WARN, back off, retry
//! 4. If retries are exhausted: log and return the last error
//!
//! **Backoff Strategy:** `initial_backoff · multiplier^(attempt-1)`,
//! 250 ms then 750 ms with the defaults.

use crate::types::{GradingError, GradingResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry settings for upstream failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Growth factor between retries
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 250,
            backoff_multiplier: 3,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = u64::from(self.backoff_multiplier.max(1)).saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

/// Retry an upstream call with exponential backoff
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "point read")
/// * `layer_id` - Layer being read, for logging
/// * `policy` - Retry limits and backoff
/// * `operation` - Async closure performing one attempt
pub async fn retry_upstream<F, Fut, T>(
    operation_name: &str,
    layer_id: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> GradingResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = GradingResult<T>>,
{
    let mut retry = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if retry > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        layer_id,
                        retries = retry,
                        "Upstream call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && retry < policy.max_retries => {
                retry += 1;
                let backoff = policy.backoff(retry);
                tracing::warn!(
                    operation = operation_name,
                    layer_id,
                    retry,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Upstream failure, will retry after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                if err.is_retryable() && retry > 0 {
                    tracing::warn!(
                        operation = operation_name,
                        layer_id,
                        attempts = retry + 1,
                        error = %err,
                        "Upstream call failed: retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}

/// Convenience for callers that only need the error kind
pub fn upstream(message: impl Into<String>) -> GradingError {
    GradingError::Upstream(message.into())
}

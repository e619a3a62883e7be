//! The one retry policy applied to every hosting call.
//!
//! Transient errors are retried with capped exponential backoff; permanent
//! errors return immediately on the first attempt.

use std::future::Future;
use std::time::Duration;

use fleet_core::config::RetryConfig;
use tracing::{debug, warn};

use crate::error::HostingError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            multiplier: config.multiplier,
        }
    }

    /// A policy that retries up to `max_attempts` times without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let delay = self.initial_backoff.as_secs_f64() * factor;
        let capped = delay.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, HostingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HostingError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt - 1);
                    debug!(op = op_name, attempt, ?delay, error = %e, "transient hosting error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(op = op_name, attempts = attempt, error = %e, "hosting call failed after retries");
                    } else {
                        debug!(op = op_name, error = %e, "permanent hosting error, not retrying");
                    }
                    return Err(e);
                }
            }
        }
    }
}

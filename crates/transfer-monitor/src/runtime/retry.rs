use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Backoff schedule shared by RPC calls and price lookups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(Error::ConfigInvalid(
                "retry_policy.max_attempts must be >= 1".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::ConfigInvalid(
                "retry_policy.multiplier must be >= 1".to_string(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(Error::ConfigInvalid(
                "retry_policy requires initial_backoff_ms <= max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(64) as i32;
        let ms = self.initial_backoff_ms as f64 * self.multiplier.powi(exp);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }

    fn to_backoff(&self) -> ExponentialBackoff {
        let randomization = if self.jitter { 0.5 } else { 0.0 };
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.max_backoff_ms))
            .with_multiplier(self.multiplier)
            .with_randomization_factor(randomization)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.to_backoff();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => {
                if attempt > 1 {
                    debug!(what, attempt, "succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or(Duration::from_millis(policy.max_backoff_ms));
                warn!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    ?delay,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

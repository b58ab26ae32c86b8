//! Bounded retries with exponential backoff and jitter.

use crate::{Error, Result};
use rand::Rng;
use std::{future::Future, time::Duration};
use tracing::{debug, error, warn};

/// Immutable retry policy shared by every reconciliation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt
    pub min_interval: Duration,
    /// Ceiling for any single delay
    pub max_interval: Duration,
    /// Randomization factor in [0, 1]: a delay `d` becomes uniform in `d*(1-j)..=d*(1+j)`
    pub jitter: f64,
    /// Total number of attempts, including the first one
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            jitter: 0.5,
            max_retries: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config("max retries must be at least 1".to_string()));
        }
        if self.min_interval > self.max_interval {
            return Err(Error::Config(format!(
                "min interval {:?} is above max interval {:?}",
                self.min_interval, self.max_interval
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::Config(format!("jitter {} is outside [0, 1]", self.jitter)));
        }
        Ok(())
    }

    /// Un-jittered delay after the given failed attempt (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.min_interval.saturating_mul(1u32 << exp);
        delay.min(self.max_interval)
    }

    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        Duration::from_secs_f64(base.as_secs_f64() * factor).min(self.max_interval)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error or
/// `policy.max_retries` attempts were made. The last error is returned.
pub async fn retry<F, Fut, T>(policy: &BackoffPolicy, name: &str, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max = policy.max_retries.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = %name, attempt, "succeeded after retries");
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                warn!(operation = %name, attempt, error = %e, "non-retryable failure");
                return Err(e);
            }
            Err(e) if attempt >= max => {
                error!(operation = %name, attempt, error = %e, "giving up after max retries");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(
                    operation = %name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

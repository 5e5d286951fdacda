//! Exponential backoff for transient provider failures

use crate::error::Result;
use core_runtime::config::RetrySettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            retries: settings.retries,
            min_delay: Duration::from_millis(settings.min_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            factor: settings.factor,
            jitter: settings.jitter,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            retries: 0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
            jitter: false,
        }
    }

    /// Delay before retrying after the 0-based `attempt`.
    ///
    /// `min(min_delay × factor^attempt, max_delay)`, scaled by
    /// `jitter_factor` and capped again.
    pub fn delay_for(&self, attempt: u32, jitter_factor: f64) -> Duration {
        let max = self.max_delay.as_secs_f64();
        let base = (self.min_delay.as_secs_f64() * self.factor.powi(attempt as i32)).min(max);
        let scaled = (base * jitter_factor).min(max);
        Duration::from_secs_f64(scaled.max(0.0))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter_factor = if self.jitter {
            rand::thread_rng().gen_range(1.0..2.0)
        } else {
            1.0
        };
        self.delay_for(attempt, jitter_factor)
    }

    /// Runs `operation` until it succeeds, fails permanently or the retry
    /// budget is spent. The closure receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, provider: &str, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(provider, operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < self.retries => {
                    let mut delay = self.backoff(attempt);
                    if let Some(hint) = err.retry_after() {
                        delay = delay.max(hint);
                    }
                    warn!(
                        provider,
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(provider, operation, attempt, error = %err, "Retries exhausted");
                    } else {
                        debug!(provider, operation, attempt, error = %err, "Permanent failure");
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Free-function form of [`RetryPolicy::run`] for call sites without
/// provider context.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, f: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    policy.run("-", "operation", f).await
}

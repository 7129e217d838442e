//! Bounded-retry fetch-and-sanitize primitive shared by the scrape and HTTP adapters.

use std::future::Future;
use std::time::Duration;

use ratewatch_types::FetchError;
use ratewatch_util::sanitize_numeric;
use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Attempt bound and fixed inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.attempts,
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Policy without delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }
}

/// Run `attempt` until it yields text that sanitizes to a number.
///
/// Each call of `attempt` performs one full navigate/request and extraction
/// and returns the raw text. Retryable failures are retried up to the policy
/// bound; parse failures and stale dates are returned immediately.
pub async fn fetch_with_retry<F, Fut>(policy: &RetryPolicy, source: &str, mut attempt: F) -> Result<Decimal, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt_number = 1;
    loop {
        let outcome = match attempt(attempt_number).await {
            Ok(raw) => sanitize_numeric(&raw),
            Err(error) => Err(error),
        };
        match outcome {
            Ok(value) => {
                debug!(source, attempt = attempt_number, %value, "Fetched value");
                return Ok(value);
            }
            Err(error) if error.is_retryable() && attempt_number < max_attempts => {
                warn!(source, attempt = attempt_number, max_attempts, error = %error, "Fetch attempt failed; retrying");
                sleep(policy.delay).await;
                attempt_number += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

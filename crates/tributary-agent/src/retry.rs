//! Retry with bounded exponential backoff
//!
//! Used around connect + probe of relational sources, where a refused or
//! timed out connection should not immediately mark the source unhealthy.

use crate::error::{ConnectorError, ConnectorResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use validator::Validate;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry)
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0) applied to each delay
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (fail immediately)
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set max retries (builder pattern)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay (builder pattern)
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set max delay (builder pattern)
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier (builder pattern)
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (builder pattern)
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay before retry `attempt` (1-indexed; 0 means no delay)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // cap attempt to prevent i32 overflow
        let capped_attempt = attempt.min(30);
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(capped_attempt as i32 - 1);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter_factor > 0.0 {
            let jitter_range = capped_delay * self.jitter_factor;
            // deterministic jitter from the golden ratio sequence
            let jitter_value = (attempt as f64 * 0.618033988749895) % 1.0;
            jitter_range * (jitter_value - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((capped_delay + jitter).max(0.0) as u64)
    }
}

/// Retry block as written in a connector config
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct RetrySettings {
    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 100))]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_delay_ms")]
    #[validate(range(min = 1))]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    #[validate(range(min = 1))]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig::default()
            .with_max_retries(settings.max_retries)
            .with_initial_delay(Duration::from_millis(settings.initial_delay_ms))
            .with_max_delay(Duration::from_millis(settings.max_delay_ms))
            .with_backoff_multiplier(settings.multiplier)
    }
}

/// Execute an async operation, retrying retryable errors with backoff.
///
/// Non-retryable errors and the last error after `max_retries` are
/// returned as-is.
pub async fn retry<T, E, F, Fut>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> ConnectorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<ConnectorError>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let error: ConnectorError = e.into();

                if !error.is_retryable() || attempts > config.max_retries {
                    return Err(error);
                }

                let delay = config.delay_for_attempt(attempts);
                tracing::warn!(
                    operation = what,
                    attempt = attempts,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

//! Retry delay computation shared by polling and socket reconnects.

use std::time::Duration;

use crate::config::PollingConfig;
use crate::error::{Error, Result};

/// Exponential backoff parameters, validated once at construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
    max_retries: u32,
}

impl BackoffPolicy {
    pub fn new(config: &PollingConfig) -> Result<Self> {
        if config.base_interval_ms == 0 {
            return Err(Error::invalid_argument("base_interval_ms must be positive"));
        }
        if config.max_interval_ms < config.base_interval_ms {
            return Err(Error::invalid_argument(
                "max_interval_ms must not be below base_interval_ms",
            ));
        }
        if !config.backoff_multiplier.is_finite() || config.backoff_multiplier <= 1.0 {
            return Err(Error::invalid_argument("backoff_multiplier must be greater than 1"));
        }
        if config.max_retries == 0 {
            return Err(Error::invalid_argument("max_retries must be positive"));
        }

        Ok(Self {
            base_interval: Duration::from_millis(config.base_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            multiplier: config.backoff_multiplier,
            max_retries: config.max_retries,
        })
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `min(base * multiplier^consecutive_errors, max)`
    pub fn next_delay(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.min(i32::MAX as u32) as i32;
        let base_ms = self.base_interval.as_millis() as f64;
        let max_ms = self.max_interval.as_millis() as f64;
        // powi overflows to infinity, which the min() clamps
        let delay_ms = (base_ms * self.multiplier.powi(exponent)).min(max_ms);
        Duration::from_millis(delay_ms.round() as u64)
    }

    pub fn should_pause(&self, consecutive_errors: u32) -> bool {
        consecutive_errors >= self.max_retries
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(3000),
            max_interval: Duration::from_millis(30000),
            multiplier: 1.5,
            max_retries: 5,
        }
    }
}

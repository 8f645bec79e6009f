//! Exponential backoff between rejected submissions.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Delay schedule: `initial * multiplier^n`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

impl BackoffPolicy {
    /// No waiting at all; tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            initial_ms: 0,
            multiplier: 1.0,
            max_ms: 0,
        }
    }

    /// Delay before retry number `retry_count` (0 = first retry).
    pub fn delay(&self, retry_count: u32) -> Duration {
        let exp = self.multiplier.powi(retry_count.min(i32::MAX as u32) as i32);
        let raw = (self.initial_ms as f64) * exp;
        let bounded = raw.min(self.max_ms as f64).max(0.0);
        Duration::from_millis(bounded.round() as u64)
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            initial_ms: config.initial_ms,
            multiplier: config.multiplier,
            max_ms: config.max_ms,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

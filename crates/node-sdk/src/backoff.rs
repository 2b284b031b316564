//! Exponential back-off between status-report delivery attempts.

use std::time::Duration;

use an_domain::config::ExecutionConfig;

/// Controls the wait between failed delivery attempts.
///
/// No jitter: successive waits never decrease.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    /// Wait after the first failed attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryBackoff {
    /// Compute the wait after failed attempt `attempt` (0-indexed).
    ///
    /// `min(initial * factor^attempt, max)`; a factor below 1 is treated
    /// as 1.  Both `initial` and `max` are floored at 1ms, so every wait is
    /// positive.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis().max(1) as f64;
        let cap_ms = self.max_delay.as_millis().max(1) as f64;
        let factor = self.backoff_factor.max(1.0);
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = base_ms * factor.powi(exponent);
        let capped_ms = delay_ms.min(cap_ms);
        Duration::from_millis(capped_ms as u64)
    }
}

impl From<&ExecutionConfig> for RetryBackoff {
    fn from(cfg: &ExecutionConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_retry_delay_ms),
            max_delay: Duration::from_millis(cfg.max_retry_delay_ms),
            backoff_factor: cfg.retry_backoff_factor,
        }
    }
}

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution mode & status reporting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls detached ("async") execution and the status-report retry
/// budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Allow detached execution for invocations that carry a
    /// coordinator-minted execution id.  When `false`, every invocation
    /// runs synchronously and the reply carries the result.
    #[serde(default = "d_true")]
    pub enable_async: bool,
    /// Total delivery attempts for one status report.
    #[serde(default = "d_max_status_retries")]
    pub max_status_retries: u32,
    /// Wait after the first failed attempt.
    #[serde(default = "d_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    /// Cap on any single wait between attempts.
    #[serde(default = "d_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Multiplier applied to the wait after each failed attempt.
    #[serde(default = "d_retry_backoff_factor")]
    pub retry_backoff_factor: f64,
    /// Maximum detached executions running at once.  Further detached
    /// invocations are still acknowledged and queue for a permit.
    #[serde(default = "d_max_concurrent_detached")]
    pub max_concurrent_detached: usize,
    /// How long shutdown waits for in-flight detached executions and their
    /// status reports before abandoning them.
    #[serde(default = "d_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            enable_async: true,
            max_status_retries: d_max_status_retries(),
            initial_retry_delay_ms: d_initial_retry_delay_ms(),
            max_retry_delay_ms: d_max_retry_delay_ms(),
            retry_backoff_factor: d_retry_backoff_factor(),
            max_concurrent_detached: d_max_concurrent_detached(),
            shutdown_grace_ms: d_shutdown_grace_ms(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_max_status_retries() -> u32 {
    5
}
fn d_initial_retry_delay_ms() -> u64 {
    1_000
}
fn d_max_retry_delay_ms() -> u64 {
    30_000
}
fn d_retry_backoff_factor() -> f64 {
    2.0
}
fn d_max_concurrent_detached() -> usize {
    64
}
fn d_shutdown_grace_ms() -> u64 {
    10_000
}

//! Status reporter: delivers terminal execution state to the coordinator
//! with bounded retry.
//!
//! Transport and clock are both injected ([`StatusSink`], [`Delay`]) so
//! the retry loop can be driven in tests without a network or real waits.

use std::sync::Arc;
use std::time::Duration;

use an_domain::trace::TraceEvent;
use an_protocol::ExecutionStatusReport;

use crate::backoff::RetryBackoff;

/// Why one delivery attempt failed.  Every failure is retried until the
/// attempt budget runs out: a coordinator may answer 404 for an execution
/// it has not persisted yet.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Connect error or timeout.
    #[error("transport: {0}")]
    Transport(String),
    /// The coordinator answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Destination for status reports.
#[async_trait::async_trait]
pub trait StatusSink: Send + Sync + 'static {
    async fn deliver(&self, report: &ExecutionStatusReport) -> Result<(), DeliveryError>;
}

/// Waits between delivery attempts.
#[async_trait::async_trait]
pub trait Delay: Send + Sync + 'static {
    async fn wait(&self, duration: Duration);
}

/// Real-time waits on the Tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait::async_trait]
impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Result of one [`StatusReporter::report`] call.
#[derive(Debug, Clone, Default)]
pub struct DeliveryOutcome {
    pub delivered: bool,
    pub attempts: u32,
    /// Waits taken between attempts, in order.
    pub delays: Vec<Duration>,
    pub last_error: Option<DeliveryError>,
}

#[derive(Clone)]
pub struct StatusReporter {
    sink: Arc<dyn StatusSink>,
    delay: Arc<dyn Delay>,
    backoff: RetryBackoff,
}

impl StatusReporter {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self {
            sink,
            delay: Arc::new(TokioDelay),
            backoff: RetryBackoff::default(),
        }
    }

    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn backoff(&self) -> &RetryBackoff {
        &self.backoff
    }

    /// Deliver `report`, making at most `max_retries` attempts (at least
    /// one).  Every attempt sends the full payload.
    ///
    /// Never fails: an undelivered report is logged at `error` level and
    /// returned as an outcome with `delivered == false`.
    pub async fn report(&self, report: &ExecutionStatusReport, max_retries: u32) -> DeliveryOutcome {
        let budget = max_retries.max(1);
        let mut outcome = DeliveryOutcome::default();

        for attempt in 0..budget {
            outcome.attempts = attempt + 1;
            match self.sink.deliver(report).await {
                Ok(()) => {
                    outcome.delivered = true;
                    outcome.last_error = None;
                    tracing::debug!(
                        execution_id = %report.execution_id,
                        attempts = outcome.attempts,
                        "status report delivered"
                    );
                    TraceEvent::StatusDelivered {
                        execution_id: report.execution_id.clone(),
                        status: report.status.to_string(),
                        attempts: outcome.attempts,
                    }
                    .emit();
                    return outcome;
                }
                Err(e) => {
                    let last = attempt + 1 == budget;
                    tracing::warn!(
                        execution_id = %report.execution_id,
                        attempt = attempt + 1,
                        max_attempts = budget,
                        error = %e,
                        "status report attempt failed"
                    );
                    outcome.last_error = Some(e);
                    if last {
                        break;
                    }
                    let wait = self.backoff.delay_for_attempt(attempt);
                    tracing::debug!(
                        execution_id = %report.execution_id,
                        delay_ms = wait.as_millis() as u64,
                        "retrying status report"
                    );
                    outcome.delays.push(wait);
                    self.delay.wait(wait).await;
                }
            }
        }

        let last_error = outcome
            .last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default();
        tracing::error!(
            execution_id = %report.execution_id,
            status = %report.status,
            attempts = outcome.attempts,
            error = %last_error,
            "status report undeliverable, outcome lost to coordinator"
        );
        TraceEvent::StatusDeliveryExhausted {
            execution_id: report.execution_id.clone(),
            status: report.status.to_string(),
            attempts: outcome.attempts,
            last_error,
        }
        .emit();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ExecutionContext, InboundHeaders};
    use parking_lot::Mutex;
    use serde_json::json;

    /// Fails the first `failures` attempts with `error`, then succeeds.
    struct ScriptedSink {
        failures: u32,
        error: DeliveryError,
        seen: Mutex<Vec<ExecutionStatusReport>>,
    }

    impl ScriptedSink {
        fn new(failures: u32, error: DeliveryError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                error,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl StatusSink for ScriptedSink {
        async fn deliver(&self, report: &ExecutionStatusReport) -> Result<(), DeliveryError> {
            let mut seen = self.seen.lock();
            seen.push(report.clone());
            if seen.len() as u32 <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingDelay {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait::async_trait]
    impl Delay for RecordingDelay {
        async fn wait(&self, duration: Duration) {
            self.waits.lock().push(duration);
        }
    }

    fn terminal_report() -> ExecutionStatusReport {
        let mut ctx = ExecutionContext::derive("echo", &InboundHeaders::default());
        ctx.mark_running();
        ctx.succeed(json!({"value": 1}));
        ctx.to_report()
    }

    fn transport() -> DeliveryError {
        DeliveryError::Transport("connection refused".into())
    }

    #[tokio::test]
    async fn fails_twice_then_succeeds() {
        let sink = ScriptedSink::new(2, transport());
        let delay = Arc::new(RecordingDelay::default());
        let reporter = StatusReporter::new(sink.clone()).with_delay(delay.clone());

        let outcome = reporter.report(&terminal_report(), 5).await;
        assert!(outcome.delivered);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.delays, [Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(*delay.waits.lock(), outcome.delays);
        assert!(outcome.delays.windows(2).all(|w| w[0] <= w[1]));

        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|r| *r == seen[0]));
    }

    #[tokio::test]
    async fn stops_after_max_retries() {
        let sink = ScriptedSink::new(u32::MAX, transport());
        let delay = Arc::new(RecordingDelay::default());
        let reporter = StatusReporter::new(sink.clone()).with_delay(delay.clone());

        let outcome = reporter.report(&terminal_report(), 5).await;
        assert!(!outcome.delivered);
        assert_eq!(outcome.attempts, 5);
        assert_eq!(sink.seen.lock().len(), 5);
        // No wait after the last attempt.
        assert_eq!(outcome.delays.len(), 4);
        assert!(outcome.delays.iter().all(|d| *d > Duration::ZERO));
        assert_eq!(outcome.last_error, Some(transport()));
    }

    #[tokio::test]
    async fn coordinator_statuses_are_retried() {
        let not_stored = DeliveryError::Status {
            status: 404,
            body: "execution not found".into(),
        };
        let sink = ScriptedSink::new(3, not_stored);
        let reporter =
            StatusReporter::new(sink.clone()).with_delay(Arc::new(RecordingDelay::default()));

        let outcome = reporter.report(&terminal_report(), 5).await;
        assert!(outcome.delivered);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.delays.len(), 3);
    }

    #[tokio::test]
    async fn zero_budget_still_attempts_once() {
        let sink = ScriptedSink::new(0, transport());
        let reporter = StatusReporter::new(sink.clone());
        let outcome = reporter.report(&terminal_report(), 0).await;
        assert!(outcome.delivered);
        assert_eq!(outcome.attempts, 1);
    }
}

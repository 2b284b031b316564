//! Dispatcher: resolves an invocation, picks the execution mode, runs the
//! handler and drives the reporting path.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use an_domain::config::ExecutionConfig;
use an_domain::trace::TraceEvent;
use an_protocol::{CapabilityKind, ExecutionStatus};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::context::{ExecutionContext, InboundHeaders};
use crate::registration::CoordinatorClient;
use crate::registry::{Capability, CapabilityRegistry, Handler};
use crate::reporter::StatusReporter;
use crate::types::{HandlerError, HandlerResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options & outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Detached execution is allowed for this node.
    pub enable_async: bool,
    /// Delivery attempts per status report.
    pub max_status_retries: u32,
    /// Detached executions running at once.
    pub max_concurrent_detached: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for DispatchOptions {
    fn from(cfg: &ExecutionConfig) -> Self {
        Self {
            enable_async: cfg.enable_async,
            max_status_retries: cfg.max_status_retries,
            max_concurrent_detached: cfg.max_concurrent_detached.max(1),
        }
    }
}

/// What [`Dispatcher::handle`] produced.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Synchronous run that succeeded.
    Completed {
        context: ExecutionContext,
        result: Value,
    },
    /// Synchronous run whose handler failed.
    Failed {
        context: ExecutionContext,
        error: String,
    },
    /// Detached run scheduled; the outcome goes to the status reporter.
    Accepted {
        execution_id: String,
        workflow_id: String,
        capability_id: String,
    },
    /// Unknown capability id.  No context was created.
    NotFound(String),
    /// Payload rejected by the input schema.  No context was created.
    Invalid(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Notified when any execution starts and finishes, including nested
/// local calls that never reach the coordinator.
///
/// The default methods emit [`TraceEvent`]s.
pub trait ExecutionObserver: Send + Sync + 'static {
    fn on_start(&self, ctx: &ExecutionContext, detached: bool) {
        TraceEvent::ExecutionStarted {
            execution_id: ctx.execution_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            parent_execution_id: ctx.parent_execution_id.clone(),
            capability_id: ctx.capability_id.clone(),
            detached,
        }
        .emit();
    }

    fn on_finish(&self, ctx: &ExecutionContext) {
        TraceEvent::ExecutionFinished {
            execution_id: ctx.execution_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            capability_id: ctx.capability_id.clone(),
            status: ctx.status.to_string(),
            duration_ms: ctx.duration_ms(),
        }
        .emit();
    }
}

/// Observer with only the default behavior.
#[derive(Debug, Default)]
pub struct TraceObserver;

impl ExecutionObserver for TraceObserver {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handed to every reasoner invocation.
#[derive(Clone)]
pub struct InvocationContext {
    execution: ExecutionContext,
    dispatcher: Dispatcher,
}

impl InvocationContext {
    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    pub fn execution_id(&self) -> &str {
        &self.execution.execution_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.execution.workflow_id
    }

    /// Invoke another capability on this node, in-process.
    ///
    /// The child execution inherits the workflow id and records this
    /// execution as its parent.
    pub async fn call(&self, capability_id: &str, input: Value) -> HandlerResult {
        self.dispatcher
            .call_local(&self.execution, capability_id, input)
            .await
    }

    /// Invoke a capability on another node through the coordinator.
    ///
    /// `target` is `node_id.capability_id`; a bare capability id means
    /// this node.
    pub async fn call_remote(&self, target: &str, input: Value) -> HandlerResult {
        self.dispatcher
            .call_remote(&self.execution, target, input)
            .await
    }
}

/// Where cross-node calls go: the coordinator, plus this node's id for
/// qualifying bare capability ids.
#[derive(Debug, Clone)]
pub struct RemoteRoute {
    pub node_id: String,
    pub coordinator: CoordinatorClient,
}

impl RemoteRoute {
    fn qualify(&self, target: &str) -> String {
        let target = target.trim_start_matches('/');
        if target.contains('.') {
            target.to_string()
        } else {
            format!("{}.{}", self.node_id, target.trim_start_matches('.'))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheap to clone; all clones share the registry, the detached
/// concurrency budget and the set of in-flight detached executions.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<CapabilityRegistry>,
    options: DispatchOptions,
    reporter: Option<StatusReporter>,
    observers: Vec<Arc<dyn ExecutionObserver>>,
    remote: Option<RemoteRoute>,
    detached: Arc<Semaphore>,
    tracker: TaskTracker,
    /// execution id -> capability id, until the status report settles.
    in_flight: Mutex<BTreeMap<String, String>>,
}

impl Dispatcher {
    /// An empty `observers` list falls back to [`TraceObserver`].
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        options: DispatchOptions,
        reporter: Option<StatusReporter>,
        mut observers: Vec<Arc<dyn ExecutionObserver>>,
        remote: Option<RemoteRoute>,
    ) -> Self {
        if observers.is_empty() {
            observers.push(Arc::new(TraceObserver));
        }
        let permits = options.max_concurrent_detached.max(1);
        Self {
            inner: Arc::new(Inner {
                registry,
                options,
                reporter,
                observers,
                remote,
                detached: Arc::new(Semaphore::new(permits)),
                tracker: TaskTracker::new(),
                in_flight: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.inner.registry
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.inner.options
    }

    /// Handle an inbound invocation of any kind.
    pub async fn handle(
        &self,
        capability_id: &str,
        payload: Value,
        inbound: &InboundHeaders,
    ) -> DispatchOutcome {
        self.handle_as(None, capability_id, payload, inbound).await
    }

    /// Handle an inbound invocation that arrived on a kind-specific route.
    /// A capability of a different kind is reported as not found.
    pub async fn handle_as(
        &self,
        kind: Option<CapabilityKind>,
        capability_id: &str,
        payload: Value,
        inbound: &InboundHeaders,
    ) -> DispatchOutcome {
        let capability = match self.inner.registry.get(capability_id) {
            Some(c) if kind.map_or(true, |k| k == c.kind()) => c,
            _ => {
                tracing::debug!(capability_id, "invocation of unknown capability");
                return DispatchOutcome::NotFound(capability_id.to_string());
            }
        };

        if let Err(reason) = capability.input_schema.validate(&payload) {
            tracing::debug!(capability_id, %reason, "input rejected by schema");
            return DispatchOutcome::Invalid(reason);
        }

        let ctx = ExecutionContext::derive(&capability.id, inbound);

        if self.is_detached(inbound) {
            let accepted = DispatchOutcome::Accepted {
                execution_id: ctx.execution_id.clone(),
                workflow_id: ctx.workflow_id.clone(),
                capability_id: capability.id.clone(),
            };
            self.run_detached(capability, ctx, payload);
            return accepted;
        }

        let ctx = self.execute(capability, ctx, payload, false).await;
        match ctx.status {
            ExecutionStatus::Succeeded => DispatchOutcome::Completed {
                result: ctx.result.clone().unwrap_or(Value::Null),
                context: ctx,
            },
            _ => DispatchOutcome::Failed {
                error: ctx.error.clone().unwrap_or_default(),
                context: ctx,
            },
        }
    }

    /// Detached only when enabled for the node, not overridden for the
    /// call, the coordinator minted the execution id, and there is a
    /// coordinator to report to.
    fn is_detached(&self, inbound: &InboundHeaders) -> bool {
        self.inner.options.enable_async
            && !inbound.force_sync
            && inbound.execution_id.is_some()
            && self.inner.reporter.is_some()
    }

    /// Spawn the handler and its status report on the detached tracker.
    /// Waiting for a detached permit happens inside the spawned task.
    fn run_detached(&self, capability: Arc<Capability>, ctx: ExecutionContext, payload: Value) {
        let execution_id = ctx.execution_id.clone();
        self.inner
            .in_flight
            .lock()
            .insert(execution_id.clone(), capability.id.clone());

        let dispatcher = self.clone();
        self.inner.tracker.spawn(async move {
            let semaphore = dispatcher.inner.detached.clone();
            // Closed only by `drain` after the grace period; `drain` has
            // already logged this execution as abandoned.
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            let ctx = dispatcher.execute(capability, ctx, payload, true).await;
            if let Some(reporter) = &dispatcher.inner.reporter {
                reporter
                    .report(&ctx.to_report(), dispatcher.inner.options.max_status_retries)
                    .await;
            }
            dispatcher.inner.in_flight.lock().remove(&execution_id);
        });
    }

    /// Detached executions whose status report has not settled yet.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Wait up to `grace` for every detached execution and its status
    /// report to finish.
    ///
    /// Executions still running (or still queued for a permit) when the
    /// grace period ends are abandoned: each is logged at `error` and
    /// emitted as [`TraceEvent::ExecutionAbandoned`].  Returns their ids.
    pub async fn drain(&self, grace: Duration) -> Vec<String> {
        let tracker = &self.inner.tracker;
        tracker.close();
        let pending = self.in_flight();
        if pending > 0 {
            tracing::info!(
                pending,
                grace_ms = grace.as_millis() as u64,
                "draining detached executions"
            );
        }
        if tokio::time::timeout(grace, tracker.wait()).await.is_ok() {
            return Vec::new();
        }

        self.inner.detached.close();
        let abandoned = std::mem::take(&mut *self.inner.in_flight.lock());
        for (execution_id, capability_id) in &abandoned {
            tracing::error!(
                execution_id = %execution_id,
                capability_id = %capability_id,
                grace_ms = grace.as_millis() as u64,
                "detached execution abandoned at shutdown, outcome not reported"
            );
            TraceEvent::ExecutionAbandoned {
                execution_id: execution_id.clone(),
                capability_id: capability_id.clone(),
            }
            .emit();
        }
        abandoned.into_keys().collect()
    }

    /// Run the handler for `ctx`, capturing errors and panics into its
    /// terminal status.
    async fn execute(
        &self,
        capability: Arc<Capability>,
        mut ctx: ExecutionContext,
        input: Value,
        detached: bool,
    ) -> ExecutionContext {
        ctx.mark_running();
        for observer in &self.inner.observers {
            observer.on_start(&ctx, detached);
        }
        tracing::debug!(
            execution_id = %ctx.execution_id,
            workflow_id = %ctx.workflow_id,
            capability_id = %ctx.capability_id,
            detached,
            "execution started"
        );

        let outcome = match &capability.handler {
            Handler::Deterministic(f) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| f(input)))
                    .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))))
            }
            Handler::Generative(reasoner) => {
                let invocation = InvocationContext {
                    execution: ctx.clone(),
                    dispatcher: self.clone(),
                };
                AssertUnwindSafe(reasoner.run(invocation, input))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))))
            }
        };

        let outcome = outcome.and_then(|result| {
            capability
                .output_schema
                .validate(&result)
                .map(|()| result)
                .map_err(HandlerError::InvalidOutput)
        });

        match outcome {
            Ok(result) => ctx.succeed(result),
            Err(e) => {
                if matches!(e, HandlerError::Panicked(_)) {
                    tracing::error!(
                        execution_id = %ctx.execution_id,
                        capability_id = %ctx.capability_id,
                        error = %e,
                        "handler panicked"
                    );
                } else {
                    tracing::warn!(
                        execution_id = %ctx.execution_id,
                        capability_id = %ctx.capability_id,
                        error = %e,
                        "handler failed"
                    );
                }
                ctx.fail(e.to_string());
            }
        }

        for observer in &self.inner.observers {
            observer.on_finish(&ctx);
        }
        ctx
    }

    /// Nested in-process call from within `parent`.  Always synchronous;
    /// never reported to the coordinator.
    pub async fn call_local(
        &self,
        parent: &ExecutionContext,
        capability_id: &str,
        input: Value,
    ) -> HandlerResult {
        let call_error = |message: String| HandlerError::Call {
            capability: capability_id.to_string(),
            message,
        };

        let capability = self
            .inner
            .registry
            .get(capability_id)
            .ok_or_else(|| call_error("capability not found".into()))?;
        capability
            .input_schema
            .validate(&input)
            .map_err(|reason| call_error(format!("invalid_input: {reason}")))?;

        let child = parent.child(&capability.id);
        let child = Box::pin(self.execute(capability, child, input, false)).await;
        match child.status {
            ExecutionStatus::Succeeded => Ok(child.result.unwrap_or(Value::Null)),
            _ => Err(call_error(child.error.unwrap_or_default())),
        }
    }

    /// Cross-node call from within `caller`, routed by the coordinator.
    pub async fn call_remote(
        &self,
        caller: &ExecutionContext,
        target: &str,
        input: Value,
    ) -> HandlerResult {
        let Some(remote) = &self.inner.remote else {
            return Err(HandlerError::Call {
                capability: target.to_string(),
                message: "no coordinator configured for remote calls".into(),
            });
        };
        let target = remote.qualify(target);
        tracing::debug!(
            execution_id = %caller.execution_id,
            workflow_id = %caller.workflow_id,
            target = %target,
            "remote call"
        );
        remote
            .coordinator
            .execute(&target, input, caller)
            .await
            .map_err(|e| HandlerError::Call {
                capability: target,
                message: e.to_string(),
            })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CapabilityDef;
    use crate::reporter::{DeliveryError, StatusSink};
    use an_protocol::ExecutionStatusReport;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<ExecutionStatusReport>);

    #[async_trait::async_trait]
    impl StatusSink for ChannelSink {
        async fn deliver(&self, report: &ExecutionStatusReport) -> Result<(), DeliveryError> {
            let _ = self.0.send(report.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        finished: Mutex<Vec<ExecutionContext>>,
    }

    impl ExecutionObserver for Recorder {
        fn on_finish(&self, ctx: &ExecutionContext) {
            self.finished.lock().push(ctx.clone());
        }
    }

    fn registry() -> Arc<CapabilityRegistry> {
        let mut reg = CapabilityRegistry::new();
        reg.register_def(CapabilityDef::skill("echo", Ok)).unwrap();
        reg.register_def(CapabilityDef::skill("fail", |_| {
            Err(HandlerError::failed("intentional"))
        }))
        .unwrap();
        reg.register_def(CapabilityDef::skill("explode", |_| panic!("kaboom")))
            .unwrap();
        reg.register_def(
            CapabilityDef::skill("typed", Ok).with_input_schema(json!({
                "type": "object",
                "properties": {"n": {"type": "integer"}},
                "required": ["n"]
            })),
        )
        .unwrap();
        reg.register_def(
            CapabilityDef::skill("bad_output", |_| Ok(json!("text")))
                .with_output_schema(json!({"type": "object"})),
        )
        .unwrap();
        reg.register_def(CapabilityDef::reasoner("outer", |ctx, input| async move {
            let inner = ctx.call("echo", input).await?;
            Ok(json!({"inner": inner, "parent": ctx.execution_id()}))
        }))
        .unwrap();
        reg.register_def(CapabilityDef::reasoner("slow", |_ctx, _input| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!({"done": true}))
        }))
        .unwrap();
        reg.register_def(CapabilityDef::reasoner("stuck", |_ctx, _input| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }))
        .unwrap();
        reg.register_def(CapabilityDef::reasoner("async_explode", |_ctx, _input| async move {
            if true {
                panic!("async kaboom");
            }
            Ok(Value::Null)
        }))
        .unwrap();
        Arc::new(reg)
    }

    fn dispatcher(
        reporter: Option<StatusReporter>,
        observer: Arc<Recorder>,
    ) -> Dispatcher {
        let observers: Vec<Arc<dyn ExecutionObserver>> = vec![observer as Arc<dyn ExecutionObserver>];
        Dispatcher::new(registry(), DispatchOptions::default(), reporter, observers, None)
    }

    fn coordinator_headers() -> InboundHeaders {
        InboundHeaders {
            execution_id: Some("exec-coord-1".into()),
            workflow_id: Some("wf-coord-1".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sync_success_returns_result() {
        let d = dispatcher(None, Arc::default());
        match d.handle("echo", json!({"v": 1}), &InboundHeaders::default()).await {
            DispatchOutcome::Completed { context, result } => {
                assert_eq!(result, json!({"v": 1}));
                assert_eq!(context.status, ExecutionStatus::Succeeded);
                assert!(context.is_workflow_root);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_capability_creates_no_context() {
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher(None, recorder.clone());
        let out = d.handle("nope", json!({}), &InboundHeaders::default()).await;
        assert!(matches!(out, DispatchOutcome::NotFound(id) if id == "nope"));
        assert!(recorder.finished.lock().is_empty());
    }

    #[tokio::test]
    async fn kind_mismatch_is_not_found() {
        let d = dispatcher(None, Arc::default());
        let out = d
            .handle_as(Some(CapabilityKind::Generative), "echo", json!({}), &InboundHeaders::default())
            .await;
        assert!(matches!(out, DispatchOutcome::NotFound(_)));
    }

    #[tokio::test]
    async fn schema_violation_creates_no_context() {
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher(None, recorder.clone());
        let out = d.handle("typed", json!({"n": "x"}), &InboundHeaders::default()).await;
        assert!(matches!(out, DispatchOutcome::Invalid(_)));
        assert!(recorder.finished.lock().is_empty());
    }

    #[tokio::test]
    async fn handler_error_is_captured() {
        let d = dispatcher(None, Arc::default());
        match d.handle("fail", json!({}), &InboundHeaders::default()).await {
            DispatchOutcome::Failed { context, error } => {
                assert_eq!(error, "intentional");
                assert_eq!(context.status, ExecutionStatus::Failed);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn panics_are_captured() {
        let d = dispatcher(None, Arc::default());
        for id in ["explode", "async_explode"] {
            match d.handle(id, json!({}), &InboundHeaders::default()).await {
                DispatchOutcome::Failed { error, .. } => {
                    assert!(error.starts_with("handler panicked"), "{error}");
                    assert!(error.contains("kaboom"), "{error}");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn output_schema_is_enforced() {
        let d = dispatcher(None, Arc::default());
        match d.handle("bad_output", json!({}), &InboundHeaders::default()).await {
            DispatchOutcome::Failed { error, .. } => assert!(error.starts_with("invalid_output")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn nested_call_links_parent() {
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher(None, recorder.clone());
        let (root, result) = match d.handle("outer", json!({"x": 1}), &InboundHeaders::default()).await {
            DispatchOutcome::Completed { context, result } => (context, result),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(result["inner"], json!({"x": 1}));
        assert_eq!(result["parent"], root.execution_id.as_str());

        let finished = recorder.finished.lock();
        assert_eq!(finished.len(), 2);
        let child = &finished[0];
        assert_eq!(child.capability_id, "echo");
        assert_eq!(child.parent_execution_id.as_deref(), Some(root.execution_id.as_str()));
        assert_eq!(child.workflow_id, root.workflow_id);
        assert!(root.parent_execution_id.is_none());
    }

    #[tokio::test]
    async fn detached_acknowledges_then_reports_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = StatusReporter::new(Arc::new(ChannelSink(tx)));
        let d = dispatcher(Some(reporter), Arc::default());

        let out = d.handle("slow", json!({}), &coordinator_headers()).await;
        match out {
            DispatchOutcome::Accepted { execution_id, workflow_id, capability_id } => {
                assert_eq!(execution_id, "exec-coord-1");
                assert_eq!(workflow_id, "wf-coord-1");
                assert_eq!(capability_id, "slow");
            }
            other => panic!("unexpected {other:?}"),
        }
        // Handler still sleeping.
        assert!(rx.try_recv().is_err());

        let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.execution_id, "exec-coord-1");
        assert_eq!(report.status, ExecutionStatus::Succeeded);
        assert_eq!(report.result, Some(json!({"done": true})));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn detached_failure_is_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = StatusReporter::new(Arc::new(ChannelSink(tx)));
        let d = dispatcher(Some(reporter), Arc::default());

        let out = d.handle("explode", json!({}), &coordinator_headers()).await;
        assert!(matches!(out, DispatchOutcome::Accepted { .. }));
        let report = rx.recv().await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Failed);
        assert!(report.error.unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn sync_mode_never_reports() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = StatusReporter::new(Arc::new(ChannelSink(tx)));
        let d = dispatcher(Some(reporter), Arc::default());

        // No coordinator-minted execution id.
        let out = d.handle("echo", json!({}), &InboundHeaders::default()).await;
        assert!(matches!(out, DispatchOutcome::Completed { .. }));

        // Forced sync.
        let forced = InboundHeaders {
            force_sync: true,
            ..coordinator_headers()
        };
        let out = d.handle("echo", json!({}), &forced).await;
        match out {
            DispatchOutcome::Completed { context, .. } => {
                assert_eq!(context.execution_id, "exec-coord-1");
            }
            other => panic!("unexpected {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn async_disabled_runs_inline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = StatusReporter::new(Arc::new(ChannelSink(tx)));
        let options = DispatchOptions {
            enable_async: false,
            ..Default::default()
        };
        let d = Dispatcher::new(registry(), options, Some(reporter), Vec::new(), None);
        let out = d.handle("echo", json!({}), &coordinator_headers()).await;
        assert!(matches!(out, DispatchOutcome::Completed { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn call_local_unknown_is_call_error() {
        let d = dispatcher(None, Arc::default());
        let parent = ExecutionContext::derive("outer", &InboundHeaders::default());
        let err = d.call_local(&parent, "ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, HandlerError::Call { capability, .. } if capability == "ghost"));
    }

    #[tokio::test]
    async fn drain_waits_for_detached_reports() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = StatusReporter::new(Arc::new(ChannelSink(tx)));
        let d = dispatcher(Some(reporter), Arc::default());

        let out = d.handle("slow", json!({}), &coordinator_headers()).await;
        assert!(matches!(out, DispatchOutcome::Accepted { .. }));
        assert_eq!(d.in_flight(), 1);

        let abandoned = d.drain(Duration::from_secs(5)).await;
        assert!(abandoned.is_empty());
        assert_eq!(d.in_flight(), 0);
        let report = rx.try_recv().unwrap();
        assert_eq!(report.execution_id, "exec-coord-1");
        assert_eq!(report.status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn drain_abandons_work_past_grace() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = StatusReporter::new(Arc::new(ChannelSink(tx)));
        let d = dispatcher(Some(reporter), Arc::default());

        let out = d.handle("stuck", json!({}), &coordinator_headers()).await;
        assert!(matches!(out, DispatchOutcome::Accepted { .. }));

        let abandoned = d.drain(Duration::from_millis(50)).await;
        assert_eq!(abandoned, ["exec-coord-1"]);
        assert_eq!(d.in_flight(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drain_abandons_queued_work() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = StatusReporter::new(Arc::new(ChannelSink(tx)));
        let options = DispatchOptions {
            max_concurrent_detached: 1,
            ..Default::default()
        };
        let d = Dispatcher::new(registry(), options, Some(reporter), Vec::new(), None);

        d.handle("stuck", json!({}), &coordinator_headers()).await;
        let queued = InboundHeaders {
            execution_id: Some("exec-coord-2".into()),
            ..coordinator_headers()
        };
        d.handle("echo", json!({}), &queued).await;

        let abandoned = d.drain(Duration::from_millis(50)).await;
        assert_eq!(abandoned, ["exec-coord-1", "exec-coord-2"]);
        // The queued execution never runs once its permit wait is cut off.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn remote_call_without_coordinator_is_call_error() {
        let d = dispatcher(None, Arc::default());
        let parent = ExecutionContext::derive("outer", &InboundHeaders::default());
        let err = d
            .call_remote(&parent, "billing.charge", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Call { capability, .. } if capability == "billing.charge"));
    }

    #[test]
    fn remote_targets_are_qualified_with_node_id() {
        let route = RemoteRoute {
            node_id: "hello-node".into(),
            coordinator: CoordinatorClient::new("http://coord:8080", None, Duration::from_secs(1))
                .unwrap(),
        };
        assert_eq!(route.qualify("say_hello"), "hello-node.say_hello");
        assert_eq!(route.qualify("/billing.charge"), "billing.charge");
    }
}

//! Builder pattern for constructing a [`Node`].

use std::sync::Arc;
use std::time::Duration;

use an_domain::config::{Config, ExecutionConfig, NodeIdentityConfig};

use crate::backoff::RetryBackoff;
use crate::dispatcher::{DispatchOptions, Dispatcher, ExecutionObserver, RemoteRoute};
use crate::group::CapabilityGroup;
use crate::node::Node;
use crate::registration::{resolve_base_url, CoordinatorClient};
use crate::registry::CapabilityRegistry;
use crate::reporter::{Delay, StatusReporter, StatusSink};
use crate::types::SdkError;

/// Fluent builder for [`Node`].
///
/// # Example
///
/// ```rust,no_run
/// # use an_node_sdk::{CapabilityDef, CapabilityRegistry, NodeBuilder};
/// let mut reg = CapabilityRegistry::new();
/// reg.register_def(CapabilityDef::skill("echo", Ok)).unwrap();
///
/// let node = NodeBuilder::new()
///     .node_id("hello-node")
///     .port(8001)
///     .coordinator_url("http://localhost:8080")
///     .build(reg)
///     .unwrap();
/// ```
pub struct NodeBuilder {
    pub(crate) identity: NodeIdentityConfig,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) max_concurrent_requests: usize,
    pub(crate) coordinator_url: Option<String>,
    pub(crate) token: Option<String>,
    pub(crate) callback_url: Option<String>,
    pub(crate) auto_register: bool,
    pub(crate) lease_refresh: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) execution: ExecutionConfig,
    pub(crate) observers: Vec<Arc<dyn ExecutionObserver>>,
    pub(crate) status_sink: Option<Arc<dyn StatusSink>>,
    pub(crate) retry_delay: Option<Arc<dyn Delay>>,
    pub(crate) groups: Vec<CapabilityGroup>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Seed every setting from a loaded [`Config`].  The bearer token is
    /// read from the configured environment variable.
    pub fn from_config(config: &Config) -> Self {
        Self {
            identity: config.node.clone(),
            host: config.server.host.clone(),
            port: config.server.port,
            max_concurrent_requests: config.server.max_concurrent_requests,
            coordinator_url: config.coordinator.url.clone(),
            token: config.coordinator.token(),
            callback_url: config.coordinator.callback_url.clone(),
            auto_register: config.coordinator.auto_register,
            lease_refresh: Duration::from_secs(config.coordinator.lease_refresh_secs),
            request_timeout: Duration::from_millis(config.coordinator.request_timeout_ms),
            execution: config.execution.clone(),
            observers: Vec::new(),
            status_sink: None,
            retry_delay: None,
            groups: Vec::new(),
        }
    }

    // ── Identity ─────────────────────────────────────────────────────

    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.identity.id = id.into();
        self
    }

    pub fn version(mut self, v: impl Into<String>) -> Self {
        self.identity.version = v.into();
        self
    }

    pub fn team_id(mut self, team: impl Into<String>) -> Self {
        self.identity.team_id = team.into();
        self
    }

    // ── Listener ─────────────────────────────────────────────────────

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    // ── Coordinator ──────────────────────────────────────────────────

    pub fn coordinator_url(mut self, url: impl Into<String>) -> Self {
        self.coordinator_url = Some(url.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Explicit public base address (beats `AGENT_CALLBACK_URL`).
    pub fn callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn auto_register(mut self, on: bool) -> Self {
        self.auto_register = on;
        self
    }

    /// Lease renewal period.  `Duration::ZERO` disables renewal.
    pub fn lease_refresh(mut self, every: Duration) -> Self {
        self.lease_refresh = every;
        self
    }

    // ── Execution ────────────────────────────────────────────────────

    pub fn enable_async(mut self, on: bool) -> Self {
        self.execution.enable_async = on;
        self
    }

    pub fn max_status_retries(mut self, n: u32) -> Self {
        self.execution.max_status_retries = n;
        self
    }

    pub fn max_concurrent_detached(mut self, n: usize) -> Self {
        self.execution.max_concurrent_detached = n;
        self
    }

    /// How long shutdown waits for in-flight detached executions.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.execution.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replace the coordinator as destination for status reports.
    pub fn status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = Some(sink);
        self
    }

    /// Replace the real-time wait between delivery attempts.
    pub fn retry_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Register every capability of `group` at build time.
    pub fn include(mut self, group: CapabilityGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Build the [`Node`].  The registry is frozen from here on.
    pub fn build(self, mut registry: CapabilityRegistry) -> Result<Node, SdkError> {
        for group in self.groups {
            group.register_into(&mut registry)?;
        }
        if registry.is_empty() {
            return Err(SdkError::Config("no capabilities registered".into()));
        }
        if self.identity.id.trim().is_empty() {
            return Err(SdkError::Config("node id must not be empty".into()));
        }

        let coordinator = self
            .coordinator_url
            .as_deref()
            .map(|url| CoordinatorClient::new(url, self.token.clone(), self.request_timeout))
            .transpose()?;

        let sink: Option<Arc<dyn StatusSink>> = match (self.status_sink, &coordinator) {
            (Some(sink), _) => Some(sink),
            (None, Some(client)) => Some(Arc::new(client.clone())),
            (None, None) => None,
        };
        if self.execution.enable_async && sink.is_none() {
            return Err(SdkError::Config(
                "detached execution is enabled but no coordinator url is configured".into(),
            ));
        }

        let reporter = sink.map(|sink| {
            let reporter =
                StatusReporter::new(sink).with_backoff(RetryBackoff::from(&self.execution));
            match self.retry_delay {
                Some(delay) => reporter.with_delay(delay),
                None => reporter,
            }
        });

        let remote = coordinator.clone().map(|coordinator| RemoteRoute {
            node_id: self.identity.id.clone(),
            coordinator,
        });
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            DispatchOptions::from(&self.execution),
            reporter,
            self.observers,
            remote,
        );
        let base_url = resolve_base_url(self.callback_url.as_deref(), &self.host, self.port);

        Ok(Node {
            identity: self.identity,
            host: self.host,
            port: self.port,
            callback_url: self.callback_url,
            base_url,
            max_concurrent_requests: self.max_concurrent_requests,
            dispatcher,
            coordinator,
            auto_register: self.auto_register,
            lease_refresh: self.lease_refresh,
            shutdown_grace: Duration::from_millis(self.execution.shutdown_grace_ms),
        })
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

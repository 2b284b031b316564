//! A built node: router, registration, lease lifecycle and serve loop.

use std::time::Duration;

use an_domain::config::NodeIdentityConfig;
use an_domain::trace::TraceEvent;
use an_protocol::{NodePhase, NodeRegistrationRequest, NodeStatusUpdate, RegistrationAck};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::builder::NodeBuilder;
use crate::dispatcher::Dispatcher;
use crate::registration::{registration_record, resolve_base_url, CoordinatorClient};
use crate::server;
use crate::types::SdkError;

/// A fully-configured node ready to serve.
///
/// Create via [`NodeBuilder`].
pub struct Node {
    pub(crate) identity: NodeIdentityConfig,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) callback_url: Option<String>,
    pub(crate) base_url: String,
    pub(crate) max_concurrent_requests: usize,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) coordinator: Option<CoordinatorClient>,
    pub(crate) auto_register: bool,
    pub(crate) lease_refresh: Duration,
    pub(crate) shutdown_grace: Duration,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.identity.id)
            .field("base_url", &self.base_url)
            .field("capabilities", &self.dispatcher.registry().ids())
            .field("coordinator", &self.coordinator)
            .field("auto_register", &self.auto_register)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Start a new builder.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    pub fn node_id(&self) -> &str {
        &self.identity.id
    }

    /// Address announced to the coordinator.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn coordinator(&self) -> Option<&CoordinatorClient> {
        self.coordinator.as_ref()
    }

    /// The HTTP surface, for embedding in another server or for tests.
    pub fn router(&self) -> Router {
        server::router(
            self.dispatcher.clone(),
            &self.identity.id,
            self.max_concurrent_requests,
        )
    }

    pub fn registration_record(&self) -> NodeRegistrationRequest {
        registration_record(
            &self.identity,
            &self.base_url,
            self.dispatcher.registry().summaries(),
            self.lease_refresh.as_secs(),
        )
    }

    /// Announce this node to the coordinator.  One attempt; failures are
    /// returned to the caller.
    pub async fn register(&self) -> Result<RegistrationAck, SdkError> {
        let client = self
            .coordinator
            .as_ref()
            .ok_or_else(|| SdkError::Config("no coordinator url configured".into()))?;
        let record = self.registration_record();
        let ack = client.register(&record).await?;

        tracing::info!(
            node_id = %self.identity.id,
            base_url = %self.base_url,
            coordinator = %client.base_url(),
            capabilities = record.capabilities.len(),
            "registered with coordinator"
        );
        TraceEvent::NodeRegistered {
            node_id: self.identity.id.clone(),
            base_url: self.base_url.clone(),
            capabilities: record.capabilities.len(),
        }
        .emit();
        Ok(ack)
    }

    /// Bind `server.host:server.port` and serve until `shutdown` fires.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), SdkError> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already-bound listener.
    ///
    /// With a coordinator and auto-registration on, the node registers
    /// before accepting requests (a failure aborts startup), marks itself
    /// ready and renews its lease in the background.
    ///
    /// On shutdown it stops accepting requests, gives in-flight detached
    /// executions the shutdown grace period to finish reporting, then
    /// announces shutdown to the coordinator.
    pub async fn serve_on(
        mut self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), SdkError> {
        let local = listener.local_addr()?;
        if local.port() != self.port {
            self.port = local.port();
            self.base_url = resolve_base_url(self.callback_url.as_deref(), &self.host, self.port);
        }

        let lease_cancel = shutdown.child_token();
        let registered = match (&self.coordinator, self.auto_register) {
            (Some(client), true) => {
                self.register().await?;
                send_ready(client, &self.identity.id).await;
                if !self.lease_refresh.is_zero() {
                    spawn_lease_loop(
                        client.clone(),
                        self.identity.id.clone(),
                        self.lease_refresh,
                        lease_cancel.clone(),
                    );
                }
                true
            }
            _ => false,
        };

        tracing::info!(
            node_id = %self.identity.id,
            addr = %local,
            capabilities = self.dispatcher.registry().len(),
            "node listening"
        );

        let app = self.router();
        let token = shutdown.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        lease_cancel.cancel();

        let abandoned = self.dispatcher.drain(self.shutdown_grace).await;
        if !abandoned.is_empty() {
            tracing::error!(
                node_id = %self.identity.id,
                abandoned = abandoned.len(),
                "shutdown abandoned detached executions"
            );
        }

        if registered {
            if let Some(client) = &self.coordinator {
                if let Err(e) = client.shutdown(&self.identity.id, "graceful shutdown").await {
                    tracing::warn!(node_id = %self.identity.id, error = %e, "shutdown notice failed");
                }
            }
        }
        tracing::info!(node_id = %self.identity.id, "node stopped");
        served.map_err(SdkError::from)
    }

    /// Spawn [`serve`](Self::serve) on the Tokio runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<Result<(), SdkError>> {
        tokio::spawn(async move { self.serve(shutdown).await })
    }
}

fn ready() -> NodeStatusUpdate {
    NodeStatusUpdate {
        phase: NodePhase::Ready,
        health_score: Some(100),
    }
}

async fn send_ready(client: &CoordinatorClient, node_id: &str) {
    match client.update_status(node_id, &ready()).await {
        Ok(lease) => tracing::debug!(node_id, lease_seconds = ?lease.lease_seconds, "node ready"),
        Err(e) => tracing::warn!(node_id, error = %e, "ready status update failed"),
    }
}

fn spawn_lease_loop(
    client: CoordinatorClient,
    node_id: String,
    every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // First tick completes immediately; ready was just sent.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => send_ready(&client, &node_id).await,
            }
        }
        tracing::debug!(node_id = %node_id, "lease loop stopped");
    })
}

//! Registration client: announces this node to the coordinator, and is
//! the HTTP transport for status reports and cross-node calls.

use std::time::Duration;

use an_domain::config::NodeIdentityConfig;
use an_protocol::{
    headers, CapabilitySummary, CommunicationConfig, ExecutionStatus, ExecutionStatusReport,
    LeaseResponse, NodePhase, NodeRegistrationRequest, NodeStatusUpdate, RegistrationAck,
    RemoteExecuteReply, RemoteExecuteRequest, ShutdownRequest,
};
use chrono::Utc;
use reqwest::{Method, Url};

use crate::context::ExecutionContext;
use crate::reporter::{DeliveryError, StatusSink};
use crate::types::SdkError;

/// Environment override for the externally reachable base address.
pub const CALLBACK_URL_ENV: &str = "AGENT_CALLBACK_URL";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Base address
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve the base address announced to the coordinator.
///
/// Precedence: `explicit` > `env_override` > `http://{host}:{port}`.
/// Blank values count as absent.  A wildcard bind host is announced as
/// `localhost`.
pub fn build_base_url(
    explicit: Option<&str>,
    env_override: Option<&str>,
    default_host: &str,
    port: u16,
) -> String {
    let pick = |v: Option<&str>| {
        v.map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
    };
    if let Some(url) = pick(explicit).or_else(|| pick(env_override)) {
        return url;
    }
    let host = match default_host.trim() {
        "" | "0.0.0.0" | "::" | "[::]" => "localhost",
        h => h,
    };
    format!("http://{host}:{port}")
}

/// [`build_base_url`] with the override read from [`CALLBACK_URL_ENV`].
pub fn resolve_base_url(explicit: Option<&str>, default_host: &str, port: u16) -> String {
    let env = std::env::var(CALLBACK_URL_ENV).ok();
    build_base_url(explicit, env.as_deref(), default_host, port)
}

/// Build the registration record.  Capabilities keep registration order.
pub fn registration_record(
    identity: &NodeIdentityConfig,
    base_url: &str,
    capabilities: Vec<CapabilitySummary>,
    heartbeat_secs: u64,
) -> NodeRegistrationRequest {
    let now = Utc::now();
    NodeRegistrationRequest {
        id: identity.id.clone(),
        team_id: identity.team_id.clone(),
        base_url: base_url.to_string(),
        version: identity.version.clone(),
        capabilities,
        communication_config: CommunicationConfig {
            protocols: vec!["http".into()],
            heartbeat_interval: format!("{heartbeat_secs}s"),
        },
        health_status: NodePhase::Starting,
        last_heartbeat: now,
        registered_at: now,
        metadata: serde_json::json!({
            "sdk": "an-node-sdk",
            "sdk_version": env!("CARGO_PKG_VERSION"),
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP client for the coordinator's node API.
///
/// Every method makes exactly one attempt; retrying registration is the
/// caller's decision.
#[derive(Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl std::fmt::Debug for CoordinatorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorClient")
            .field("base", &self.base.as_str())
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl CoordinatorClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, SdkError> {
        let base = Url::parse(base_url.trim())
            .map_err(|e| SdkError::Config(format!("coordinator url {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SdkError::Config(format!(
                "coordinator url {base_url:?} cannot be a base"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SdkError::Config(format!("http client: {e}")))?;
        Ok(Self { http, base, token })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// `base` + `segments`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.http.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// `POST /api/v1/nodes/register`.
    pub async fn register(
        &self,
        record: &NodeRegistrationRequest,
    ) -> Result<RegistrationAck, SdkError> {
        let url = self.endpoint(&["api", "v1", "nodes", "register"]);
        let resp = self
            .request(Method::POST, url)
            .json(record)
            .send()
            .await
            .map_err(|e| SdkError::Registration(e.to_string()))?;
        let body = expect_success(resp).await?;
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }

    /// `PATCH /api/v1/nodes/{id}/status`.
    pub async fn update_status(
        &self,
        node_id: &str,
        update: &NodeStatusUpdate,
    ) -> Result<LeaseResponse, SdkError> {
        let url = self.endpoint(&["api", "v1", "nodes", node_id, "status"]);
        let resp = self
            .request(Method::PATCH, url)
            .json(update)
            .send()
            .await
            .map_err(|e| SdkError::Registration(e.to_string()))?;
        let body = expect_success(resp).await?;
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }

    /// `POST /api/v1/nodes/{id}/shutdown`.
    pub async fn shutdown(&self, node_id: &str, reason: &str) -> Result<(), SdkError> {
        let url = self.endpoint(&["api", "v1", "nodes", node_id, "shutdown"]);
        let resp = self
            .request(Method::POST, url)
            .json(&ShutdownRequest {
                reason: reason.to_string(),
            })
            .send()
            .await
            .map_err(|e| SdkError::Registration(e.to_string()))?;
        expect_success(resp).await.map(|_| ())
    }

    /// `POST /api/v1/execute/{target}`, where `target` is
    /// `{node_id}.{capability_id}`.
    ///
    /// Carries `caller`'s workflow as the run id and `caller` itself as
    /// the parent, so the callee's context links into the same call graph.
    pub async fn execute(
        &self,
        target: &str,
        input: serde_json::Value,
        caller: &ExecutionContext,
    ) -> Result<serde_json::Value, SdkError> {
        let url = self.endpoint(&["api", "v1", "execute", target]);
        let mut req = self
            .request(Method::POST, url)
            .header(headers::RUN_ID, &caller.workflow_id)
            .header(headers::WORKFLOW_ID, &caller.workflow_id)
            .header(headers::PARENT_EXECUTION_ID, &caller.execution_id)
            .json(&RemoteExecuteRequest { input });
        if let Some(session) = &caller.session_id {
            req = req.header(headers::SESSION_ID, session);
        }
        if let Some(actor) = &caller.actor_id {
            req = req.header(headers::ACTOR_ID, actor);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SdkError::Remote(format!("{target}: {e}")))?;
        let body = expect_success(resp).await?;
        let reply: RemoteExecuteReply = serde_json::from_str(&body)
            .map_err(|e| SdkError::Remote(format!("{target}: malformed reply: {e}")))?;

        if let Some(message) = reply.error_message.filter(|m| !m.is_empty()) {
            return Err(SdkError::Remote(format!("{target}: {message}")));
        }
        if !reply
            .status
            .eq_ignore_ascii_case(ExecutionStatus::Succeeded.as_str())
        {
            return Err(SdkError::Remote(format!(
                "{target}: status {}",
                reply.status
            )));
        }
        Ok(reply.result.unwrap_or(serde_json::Value::Null))
    }
}

async fn expect_success(resp: reqwest::Response) -> Result<String, SdkError> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(SdkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// `POST /api/v1/executions/{execution_id}/status`.
#[async_trait::async_trait]
impl StatusSink for CoordinatorClient {
    async fn deliver(&self, report: &ExecutionStatusReport) -> Result<(), DeliveryError> {
        let url = self.endpoint(&["api", "v1", "executions", &report.execution_id, "status"]);
        let resp = self
            .request(Method::POST, url)
            .json(report)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use an_protocol::CapabilityKind;

    #[test]
    fn explicit_beats_env() {
        assert_eq!(
            build_base_url(Some("https://a"), Some("https://b"), "127.0.0.1", 8001),
            "https://a"
        );
    }

    #[test]
    fn env_used_without_explicit() {
        assert_eq!(build_base_url(None, Some("https://b"), "127.0.0.1", 8001), "https://b");
        assert_eq!(build_base_url(Some("  "), Some("https://b/"), "127.0.0.1", 8001), "https://b");
    }

    #[test]
    fn synthesized_default() {
        assert_eq!(build_base_url(None, None, "127.0.0.1", 9000), "http://127.0.0.1:9000");
        assert_eq!(build_base_url(None, Some(""), "0.0.0.0", 8001), "http://localhost:8001");
    }

    #[test]
    fn record_keeps_capability_order() {
        let caps = ["b", "a"]
            .iter()
            .map(|id| CapabilitySummary {
                id: id.to_string(),
                name: id.to_string(),
                kind: CapabilityKind::Deterministic,
                input_schema: serde_json::json!({}),
                output_schema: serde_json::json!({}),
            })
            .collect();
        let record =
            registration_record(&NodeIdentityConfig::default(), "http://n:1", caps, 120);
        assert_eq!(record.id, "hello-node");
        assert_eq!(record.capabilities[0].id, "b");
        assert_eq!(record.communication_config.heartbeat_interval, "120s");
    }

    #[test]
    fn endpoints_join_and_encode() {
        let c = CoordinatorClient::new("http://coord:8080/base/", None, Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            c.endpoint(&["api", "v1", "executions", "exec/1", "status"]).as_str(),
            "http://coord:8080/base/api/v1/executions/exec%2F1/status"
        );
        let c = CoordinatorClient::new("http://coord:8080", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            c.endpoint(&["api", "v1", "nodes", "register"]).as_str(),
            "http://coord:8080/api/v1/nodes/register"
        );
    }

    #[test]
    fn rejects_bad_coordinator_url() {
        let err = CoordinatorClient::new("not a url", None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SdkError::Config(_)));
    }

    #[tokio::test]
    async fn not_found_status_is_retried_to_budget() {
        use crate::context::InboundHeaders;
        use crate::reporter::{Delay, StatusReporter};
        use axum::http::StatusCode;
        use axum::routing::post;
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        struct NoDelay;

        #[async_trait::async_trait]
        impl Delay for NoDelay {
            async fn wait(&self, _duration: Duration) {}
        }

        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/api/v1/executions/:id/status",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NOT_FOUND
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client =
            CoordinatorClient::new(&format!("http://{addr}"), None, Duration::from_secs(5)).unwrap();
        let reporter = StatusReporter::new(Arc::new(client)).with_delay(Arc::new(NoDelay));

        let mut ctx = ExecutionContext::derive("echo", &InboundHeaders::default());
        ctx.mark_running();
        ctx.succeed(serde_json::json!({}));
        let outcome = reporter.report(&ctx.to_report(), 5).await;

        assert!(!outcome.delivered);
        assert_eq!(outcome.attempts, 5);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert!(matches!(
            outcome.last_error,
            Some(DeliveryError::Status { status: 404, .. })
        ));
    }
}

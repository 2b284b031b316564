//! Node protocol: the HTTP bodies and headers exchanged between a
//! capability node, its invokers, and the coordinator.
//!
//! Everything here is plain serde data.  The node SDK owns behavior; the
//! coordinator is expected to speak the same shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Headers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inbound/outbound call-graph identity headers (lowercase, as `http`
/// normalizes them).
pub mod headers {
    pub const WORKFLOW_ID: &str = "x-workflow-id";
    /// Older name for the workflow id; read when `x-workflow-id` is absent.
    pub const RUN_ID: &str = "x-run-id";
    pub const EXECUTION_ID: &str = "x-execution-id";
    pub const PARENT_EXECUTION_ID: &str = "x-parent-execution-id";
    pub const SESSION_ID: &str = "x-session-id";
    pub const ACTOR_ID: &str = "x-actor-id";
    /// Per-call override: `sync` forces synchronous execution.
    pub const EXECUTION_MODE: &str = "x-execution-mode";
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capabilities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The two capability kinds.  Wire tags are the coordinator's names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    /// Runs to completion without suspending ("skill").
    #[serde(rename = "skill")]
    Deterministic,
    /// May suspend, e.g. on an external model call ("reasoner").
    #[serde(rename = "reasoner")]
    Generative,
}

impl CapabilityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityKind::Deterministic => "skill",
            CapabilityKind::Generative => "reasoner",
        }
    }

    /// First path segment of the invocation route for this kind.
    pub fn route_segment(self) -> &'static str {
        match self {
            CapabilityKind::Deterministic => "skills",
            CapabilityKind::Generative => "reasoners",
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the coordinator learns about one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySummary {
    /// Exposed, namespace-composed id.
    pub id: String,
    /// Declared short name before namespace composition.
    pub name: String,
    pub kind: CapabilityKind,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registration & lease
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationConfig {
    pub protocols: Vec<String>,
    pub heartbeat_interval: String,
}

/// `POST /api/v1/nodes/register` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistrationRequest {
    pub id: String,
    pub team_id: String,
    pub base_url: String,
    pub version: String,
    /// In registration order.
    pub capabilities: Vec<CapabilitySummary>,
    pub communication_config: CommunicationConfig,
    pub health_status: NodePhase,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Coordinator acknowledgment.  Only success/failure is retained by the
/// node; the remaining fields are informational.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationAck {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Lifecycle phase announced to the coordinator: `starting` at
/// registration, `ready` once serving and on every lease renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    Starting,
    Ready,
}

/// `PATCH /api/v1/nodes/{id}/status` body (lease renewal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusUpdate {
    pub phase: NodePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_score: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseResponse {
    #[serde(default)]
    pub lease_seconds: Option<u64>,
    #[serde(default)]
    pub next_lease_renewal: Option<String>,
}

/// `POST /api/v1/nodes/{id}/shutdown` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownRequest {
    pub reason: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `POST /api/v1/executions/{execution_id}/status` body.
///
/// Always carries the full terminal state, so re-sending it is safe: the
/// coordinator de-duplicates by `execution_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatusReport {
    pub execution_id: String,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<String>,
    pub capability_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation replies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Status string of a detached acknowledgment.  Distinct from
/// `succeeded`: the caller has observed no result yet.
pub const ACCEPTED: &str = "accepted";

/// 202 body for a detached invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedReply {
    pub status: String,
    pub execution_id: String,
    pub workflow_id: String,
    pub capability_id: String,
}

/// 500 body for a synchronous invocation whose handler failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedReply {
    pub status: ExecutionStatus,
    pub error: String,
    pub execution_id: String,
    pub workflow_id: String,
}

/// 4xx body for requests rejected before any execution existed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cross-node calls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /api/v1/execute/{node}.{capability}` body.  The coordinator
/// routes it to the owning node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteExecuteRequest {
    pub input: serde_json::Value,
}

/// Coordinator reply to a cross-node call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteExecuteReply {
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

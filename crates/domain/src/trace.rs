use serde::Serialize;

/// Structured trace events emitted across the agentnode crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    CapabilityRegistered {
        capability_id: String,
        kind: String,
    },
    NodeRegistered {
        node_id: String,
        base_url: String,
        capabilities: usize,
    },
    ExecutionStarted {
        execution_id: String,
        workflow_id: String,
        parent_execution_id: Option<String>,
        capability_id: String,
        detached: bool,
    },
    ExecutionFinished {
        execution_id: String,
        workflow_id: String,
        capability_id: String,
        status: String,
        duration_ms: u64,
    },
    StatusDelivered {
        execution_id: String,
        status: String,
        attempts: u32,
    },
    StatusDeliveryExhausted {
        execution_id: String,
        status: String,
        attempts: u32,
        last_error: String,
    },
    /// A detached execution still in flight when the shutdown grace
    /// period ran out; its outcome never reached the coordinator.
    ExecutionAbandoned {
        execution_id: String,
        capability_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "an_event");
    }
}

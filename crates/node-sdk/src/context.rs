//! Call-graph identity for each invocation.
//!
//! Rules:
//! - an inbound execution id is adopted verbatim, otherwise one is minted
//! - an inbound workflow id is adopted, otherwise one is minted and the
//!   invocation becomes the workflow root
//! - the parent execution id comes only from the inbound header
//! - a local child call inherits the workflow id and takes the caller's
//!   execution id as its parent

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde_json::Value;

use an_protocol::{headers, ExecutionStatus, ExecutionStatusReport};

/// Identity headers extracted from an inbound invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundHeaders {
    pub workflow_id: Option<String>,
    pub execution_id: Option<String>,
    pub parent_execution_id: Option<String>,
    pub session_id: Option<String>,
    pub actor_id: Option<String>,
    /// `x-execution-mode: sync` was sent.
    pub force_sync: bool,
}

impl InboundHeaders {
    /// Read identity headers.  Blank values count as absent;
    /// `x-workflow-id` wins over its older alias `x-run-id`.
    pub fn from_headers(map: &HeaderMap) -> Self {
        let get = |name: &str| {
            map.get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };
        Self {
            workflow_id: get(headers::WORKFLOW_ID).or_else(|| get(headers::RUN_ID)),
            execution_id: get(headers::EXECUTION_ID),
            parent_execution_id: get(headers::PARENT_EXECUTION_ID),
            session_id: get(headers::SESSION_ID),
            actor_id: get(headers::ACTOR_ID),
            force_sync: get(headers::EXECUTION_MODE)
                .is_some_and(|m| m.eq_ignore_ascii_case("sync")),
        }
    }
}

/// Mint a fresh execution id.  Random, so safe under concurrent minting.
pub fn new_execution_id() -> String {
    format!("exec_{}", uuid::Uuid::new_v4().simple())
}

pub fn new_workflow_id() -> String {
    format!("wf_{}", uuid::Uuid::new_v4().simple())
}

/// State of one invocation, from entry to terminal status.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: String,
    pub parent_execution_id: Option<String>,
    pub capability_id: String,
    pub session_id: Option<String>,
    pub actor_id: Option<String>,
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// This invocation minted the workflow id.
    pub is_workflow_root: bool,
}

impl ExecutionContext {
    /// Context for an inbound invocation of `capability_id`.
    pub fn derive(capability_id: &str, inbound: &InboundHeaders) -> Self {
        let (workflow_id, is_workflow_root) = match &inbound.workflow_id {
            Some(id) => (id.clone(), false),
            None => (new_workflow_id(), true),
        };
        Self {
            workflow_id,
            execution_id: inbound
                .execution_id
                .clone()
                .unwrap_or_else(new_execution_id),
            parent_execution_id: inbound.parent_execution_id.clone(),
            capability_id: capability_id.to_string(),
            session_id: inbound.session_id.clone(),
            actor_id: inbound.actor_id.clone(),
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            is_workflow_root,
        }
    }

    /// Context for a local call made from within this execution.
    pub fn child(&self, capability_id: &str) -> Self {
        Self {
            workflow_id: self.workflow_id.clone(),
            execution_id: new_execution_id(),
            parent_execution_id: Some(self.execution_id.clone()),
            capability_id: capability_id.to_string(),
            session_id: self.session_id.clone(),
            actor_id: self.actor_id.clone(),
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            is_workflow_root: false,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Utc::now();
    }

    pub fn succeed(&mut self, result: Value) {
        self.status = ExecutionStatus::Succeeded;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.result = None;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Snapshot handed to the status reporter.
    pub fn to_report(&self) -> ExecutionStatusReport {
        ExecutionStatusReport {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
            parent_execution_id: self.parent_execution_id.clone(),
            capability_id: self.capability_id.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at.unwrap_or_else(Utc::now),
            duration_ms: self.duration_ms(),
        }
    }
}

//! HTTP surface of a node.
//!
//! | Route                    | Purpose                          |
//! |--------------------------|----------------------------------|
//! | `GET  /health`           | liveness                         |
//! | `GET  /capabilities`     | registered capability summaries  |
//! | `POST /reasoners/*id`    | invoke a generative capability   |
//! | `POST /skills/*id`       | invoke a deterministic capability|
//!
//! A `/` inside `*id` is read as the `_` namespace separator.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use an_protocol::{
    headers, AcceptedReply, CapabilityKind, ErrorReply, ExecutionStatus, FailedReply, ACCEPTED,
};

use crate::context::InboundHeaders;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::namespace;

#[derive(Clone)]
struct AppState {
    dispatcher: Dispatcher,
    node_id: Arc<str>,
}

/// Build the node router.
pub fn router(dispatcher: Dispatcher, node_id: &str, max_concurrent_requests: usize) -> Router {
    let state = AppState {
        dispatcher,
        node_id: Arc::from(node_id),
    };
    Router::new()
        .route("/health", get(health))
        .route("/capabilities", get(capabilities))
        .route(&invoke_route(CapabilityKind::Generative), post(invoke_reasoner))
        .route(&invoke_route(CapabilityKind::Deterministic), post(invoke_skill))
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            max_concurrent_requests.max(1),
        ))
        .with_state(state)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn invoke_route(kind: CapabilityKind) -> String {
    format!("/{}/*id", kind.route_segment())
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorReply {
            error: message.into(),
        }),
    )
        .into_response()
}

fn header_value(v: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(v).ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health, GET /capabilities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "node_id": &*state.node_id,
        "capabilities": state.dispatcher.registry().len(),
    }))
}

async fn capabilities(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "capabilities": state.dispatcher.registry().summaries() }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /reasoners/*id, POST /skills/*id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn invoke_reasoner(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    invoke(state, CapabilityKind::Generative, &id, &headers, &body).await
}

async fn invoke_skill(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    invoke(state, CapabilityKind::Deterministic, &id, &headers, &body).await
}

async fn invoke(
    state: AppState,
    kind: CapabilityKind,
    path_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let capability_id = namespace::id_from_path(path_id);

    // An empty body is an empty object.
    let payload: Value = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")),
        }
    };

    let inbound = InboundHeaders::from_headers(headers);
    let outcome = state
        .dispatcher
        .handle_as(Some(kind), &capability_id, payload, &inbound)
        .await;
    outcome_response(kind, outcome)
}

fn outcome_response(kind: CapabilityKind, outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::Completed { context, result } => {
            let mut resp = (StatusCode::OK, Json(result)).into_response();
            let h = resp.headers_mut();
            for (name, value) in [
                (headers::EXECUTION_ID, &context.execution_id),
                (headers::WORKFLOW_ID, &context.workflow_id),
            ] {
                if let Some(v) = header_value(value) {
                    h.insert(HeaderName::from_static(name), v);
                }
            }
            resp
        }
        DispatchOutcome::Failed { context, error } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(FailedReply {
                status: ExecutionStatus::Failed,
                error,
                execution_id: context.execution_id,
                workflow_id: context.workflow_id,
            }),
        )
            .into_response(),
        DispatchOutcome::Accepted {
            execution_id,
            workflow_id,
            capability_id,
        } => (
            StatusCode::ACCEPTED,
            Json(AcceptedReply {
                status: ACCEPTED.into(),
                execution_id,
                workflow_id,
                capability_id,
            }),
        )
            .into_response(),
        DispatchOutcome::NotFound(id) => {
            api_error(StatusCode::NOT_FOUND, format!("{kind} '{id}' not found"))
        }
        DispatchOutcome::Invalid(reason) => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, format!("invalid_input: {reason}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;

    #[test]
    fn completed_reply_carries_identity_headers() {
        let mut ctx = ExecutionContext::derive("echo", &InboundHeaders::default());
        ctx.succeed(json!({"a": 1}));
        let resp = outcome_response(
            CapabilityKind::Deterministic,
            DispatchOutcome::Completed {
                result: json!({"a": 1}),
                context: ctx.clone(),
            },
        );
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(headers::EXECUTION_ID).unwrap(),
            ctx.execution_id.as_str()
        );
        assert_eq!(
            resp.headers().get(headers::WORKFLOW_ID).unwrap(),
            ctx.workflow_id.as_str()
        );
    }

    #[test]
    fn invoke_routes_per_kind() {
        assert_eq!(invoke_route(CapabilityKind::Generative), "/reasoners/*id");
        assert_eq!(invoke_route(CapabilityKind::Deterministic), "/skills/*id");
    }

    #[test]
    fn status_codes() {
        let not_found = outcome_response(
            CapabilityKind::Generative,
            DispatchOutcome::NotFound("ghost".into()),
        );
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let invalid = outcome_response(
            CapabilityKind::Generative,
            DispatchOutcome::Invalid("missing n".into()),
        );
        assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let accepted = outcome_response(
            CapabilityKind::Generative,
            DispatchOutcome::Accepted {
                execution_id: "e".into(),
                workflow_id: "w".into(),
                capability_id: "c".into(),
            },
        );
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);
    }
}

//! `an-node-sdk`: runtime for building capability nodes.
//!
//! A "node" is a process that exposes named capabilities over HTTP,
//! announces them to a remote coordinator, and reports the outcome of
//! detached executions back to it.  This crate provides the pieces so
//! node authors only write handler bodies.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  let mut reg = CapabilityRegistry::new();                      │
//! │  reg.register_def(CapabilityDef::skill("get_greeting", f))?;   │
//! │                                                                │
//! │  let mut users = CapabilityGroup::new("/Users/Profile-v1/");   │
//! │  users.reasoner("fetch_order", fetch_order);                   │
//! │  users.register_into(&mut reg)?;   // users_profile_v1_fetch_… │
//! │                                                                │
//! │  NodeBuilder::from_config(&config)                             │
//! │      .build(reg)?                                              │
//! │      .serve(shutdown)                                          │
//! │      .await?;                                                  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Invocation flow
//!
//! 1. `POST /reasoners/{id}` or `POST /skills/{id}` enters the [`Dispatcher`]
//! 2. The capability is resolved and the payload validated against its
//!    input schema; failures are answered inline (404 / 422)
//! 3. An [`ExecutionContext`] is derived from the identity headers
//! 4. Synchronous mode: the handler runs inline and the reply carries the
//!    result.  Detached mode (coordinator-minted execution id, async
//!    enabled): the reply is `202 accepted` and the terminal state is
//!    handed to the [`StatusReporter`], which retries with back-off
//!
//! # Naming conventions
//!
//! - Namespace prefixes normalize to lowercase alphanumeric segments
//! - Composed ids join segments and the leaf name with `_`
//! - A `/` in an invocation path is read as the `_` separator

pub mod backoff;
pub mod builder;
pub mod context;
pub mod dispatcher;
pub mod group;
pub mod namespace;
pub mod node;
pub mod registration;
pub mod registry;
pub mod reporter;
pub mod schema;
pub mod server;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use backoff::RetryBackoff;
pub use builder::NodeBuilder;
pub use context::{ExecutionContext, InboundHeaders};
pub use dispatcher::{
    DispatchOptions, DispatchOutcome, Dispatcher, ExecutionObserver, InvocationContext,
    RemoteRoute,
};
pub use group::CapabilityGroup;
pub use namespace::Namespace;
pub use node::Node;
pub use registration::{build_base_url, resolve_base_url, CoordinatorClient};
pub use registry::{Capability, CapabilityDef, CapabilityRegistry, Handler, Reasoner};
pub use reporter::{
    Delay, DeliveryError, DeliveryOutcome, StatusReporter, StatusSink, TokioDelay,
};
pub use schema::Schema;
pub use types::{HandlerError, HandlerResult, SdkError};

// Re-export protocol types so nodes never need to import an-protocol directly.
pub use an_protocol::{CapabilityKind, CapabilitySummary, ExecutionStatus, ExecutionStatusReport};

//! Capability registry: maps capability ids to handlers and schemas.
//!
//! The registry is filled before the node starts serving and is frozen
//! behind an `Arc` afterwards.  Dispatch only reads it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use an_domain::trace::TraceEvent;
use an_protocol::{CapabilityKind, CapabilitySummary};
use serde_json::Value;

use crate::dispatcher::InvocationContext;
use crate::schema::Schema;
use crate::types::{HandlerResult, SdkError};

/// Implement this trait for generative capabilities ("reasoners").
///
/// Reasoners run on the Tokio runtime and may suspend, e.g. on a model
/// call or on a nested [`InvocationContext::call`].
///
/// # Example
///
/// ```rust,no_run
/// use an_node_sdk::{HandlerResult, InvocationContext, Reasoner};
///
/// struct Summarize;
///
/// #[async_trait::async_trait]
/// impl Reasoner for Summarize {
///     async fn run(&self, ctx: InvocationContext, input: serde_json::Value) -> HandlerResult {
///         let greeting = ctx.call("get_greeting", input).await?;
///         Ok(serde_json::json!({ "summary": greeting }))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Reasoner: Send + Sync + 'static {
    async fn run(&self, ctx: InvocationContext, input: Value) -> HandlerResult;
}

/// Deterministic capability body ("skill").  Runs to completion without
/// suspending.
pub type SkillFn = dyn Fn(Value) -> HandlerResult + Send + Sync;

/// A handler tagged with its kind.  The kind is fixed by the variant, so
/// it cannot change after registration.
#[derive(Clone)]
pub enum Handler {
    Deterministic(Arc<SkillFn>),
    Generative(Arc<dyn Reasoner>),
}

impl Handler {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Handler::Deterministic(_) => CapabilityKind::Deterministic,
            Handler::Generative(_) => CapabilityKind::Generative,
        }
    }

    pub fn skill<F>(f: F) -> Self
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        Handler::Deterministic(Arc::new(f))
    }

    pub fn reasoner<R: Reasoner>(r: R) -> Self {
        Handler::Generative(Arc::new(r))
    }

    /// Wrap an async closure as a reasoner.
    pub fn reasoner_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(InvocationContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Generative(Arc::new(ReasonerFn(f)))
    }
}

struct ReasonerFn<F>(F);

#[async_trait::async_trait]
impl<F, Fut> Reasoner for ReasonerFn<F>
where
    F: Fn(InvocationContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn run(&self, ctx: InvocationContext, input: Value) -> HandlerResult {
        (self.0)(ctx, input).await
    }
}

/// A capability declaration before it receives its exposed id.
#[derive(Clone)]
pub struct CapabilityDef {
    pub(crate) name: String,
    pub(crate) handler: Handler,
    pub(crate) input_schema: Option<Value>,
    pub(crate) output_schema: Option<Value>,
}

impl CapabilityDef {
    pub fn new(name: impl Into<String>, handler: Handler) -> Self {
        Self {
            name: name.into(),
            handler,
            input_schema: None,
            output_schema: None,
        }
    }

    pub fn skill<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(name, Handler::skill(f))
    }

    pub fn reasoner<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(InvocationContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::new(name, Handler::reasoner_fn(f))
    }

    /// Override the default input schema (any object).
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Override the default output schema (anything).
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CapabilityKind {
        self.handler.kind()
    }
}

/// A registered, invocable capability.
pub struct Capability {
    pub id: String,
    /// Declared short name; differs from `id` when composed under a
    /// namespace.
    pub name: String,
    pub handler: Handler,
    pub input_schema: Schema,
    pub output_schema: Schema,
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        self.handler.kind()
    }

    pub fn summary(&self) -> CapabilitySummary {
        CapabilitySummary {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind(),
            input_schema: self.input_schema.raw().clone(),
            output_schema: self.output_schema.raw().clone(),
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Registry of capabilities, keyed by exposed id, in registration order.
#[derive(Default)]
pub struct CapabilityRegistry {
    by_id: HashMap<String, Arc<Capability>>,
    order: Vec<String>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `def` under the exact id `id`.
    ///
    /// Fails with [`SdkError::DuplicateCapability`] if `id` is taken and
    /// with [`SdkError::InvalidSchema`] if a schema does not compile.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        def: CapabilityDef,
    ) -> Result<Arc<Capability>, SdkError> {
        let id = id.into();
        if id.is_empty() {
            return Err(SdkError::Validation("capability id must not be empty".into()));
        }
        if self.by_id.contains_key(&id) {
            return Err(SdkError::DuplicateCapability(id));
        }

        let compile = |raw: Option<Value>, default: Value| {
            Schema::compile(raw.unwrap_or(default)).map_err(|message| SdkError::InvalidSchema {
                capability: id.clone(),
                message,
            })
        };
        let input_schema = compile(def.input_schema, Schema::default_input())?;
        let output_schema = compile(def.output_schema, Schema::default_output())?;

        let capability = Arc::new(Capability {
            id: id.clone(),
            name: def.name,
            handler: def.handler,
            input_schema,
            output_schema,
        });

        TraceEvent::CapabilityRegistered {
            capability_id: id.clone(),
            kind: capability.kind().to_string(),
        }
        .emit();

        self.by_id.insert(id.clone(), capability.clone());
        self.order.push(id);
        Ok(capability)
    }

    /// Register `def` unqualified, under its declared name.
    pub fn register_def(&mut self, def: CapabilityDef) -> Result<Arc<Capability>, SdkError> {
        let id = def.name.clone();
        self.register(id, def)
    }

    /// Look up a capability, failing with [`SdkError::NotFound`].
    pub fn resolve(&self, id: &str) -> Result<Arc<Capability>, SdkError> {
        self.get(id)
            .ok_or_else(|| SdkError::NotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<Arc<Capability>> {
        self.by_id.get(id).cloned()
    }

    /// Registered ids, in registration order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Capability summaries, in registration order.
    pub fn summaries(&self) -> Vec<CapabilitySummary> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .map(|c| c.summary())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HandlerError;
    use serde_json::json;

    fn echo() -> CapabilityDef {
        CapabilityDef::skill("echo", Ok)
    }

    #[test]
    fn register_and_resolve() {
        let mut reg = CapabilityRegistry::new();
        let cap = reg.register_def(echo()).unwrap();
        assert_eq!(cap.id, "echo");
        assert_eq!(cap.kind(), CapabilityKind::Deterministic);
        assert_eq!(reg.resolve("echo").unwrap().id, "echo");
        assert!(matches!(reg.resolve("missing"), Err(SdkError::NotFound(id)) if id == "missing"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut reg = CapabilityRegistry::new();
        reg.register_def(echo()).unwrap();
        let err = reg.register_def(echo()).unwrap_err();
        assert!(matches!(err, SdkError::DuplicateCapability(id) if id == "echo"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn same_name_under_distinct_ids() {
        let mut reg = CapabilityRegistry::new();
        reg.register("billing_lookup", CapabilityDef::skill("lookup", Ok))
            .unwrap();
        reg.register("shipping_lookup", CapabilityDef::skill("lookup", Ok))
            .unwrap();
        let cap = reg.resolve("shipping_lookup").unwrap();
        assert_eq!(cap.name, "lookup");
    }

    #[test]
    fn summaries_keep_registration_order() {
        let mut reg = CapabilityRegistry::new();
        reg.register_def(CapabilityDef::skill("zeta", Ok)).unwrap();
        reg.register_def(CapabilityDef::reasoner("alpha", |_ctx, input| async move {
            Ok(input)
        }))
        .unwrap();
        let summaries = reg.summaries();
        let ids: Vec<_> = summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["zeta", "alpha"]);
        assert_eq!(summaries[1].kind, CapabilityKind::Generative);
        assert_eq!(summaries[0].input_schema, Schema::default_input());
    }

    #[test]
    fn invalid_schema_fails_registration() {
        let mut reg = CapabilityRegistry::new();
        let def = echo().with_input_schema(json!({"type": 12}));
        let err = reg.register_def(def).unwrap_err();
        assert!(matches!(err, SdkError::InvalidSchema { .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn skill_handler_runs() {
        let def = CapabilityDef::skill("fail", |_| Err(HandlerError::failed("intentional")));
        match &def.handler {
            Handler::Deterministic(f) => {
                let err = f(json!({})).unwrap_err();
                assert_eq!(err.to_string(), "intentional");
            }
            Handler::Generative(_) => panic!("expected a skill"),
        }
    }
}

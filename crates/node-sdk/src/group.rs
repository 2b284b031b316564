//! Namespaced groups of capabilities.
//!
//! A group collects declarations under a prefix and may nest other
//! groups.  Nothing is registered until [`CapabilityGroup::register_into`]
//! composes the final ids.

use std::future::Future;

use serde_json::Value;

use crate::dispatcher::InvocationContext;
use crate::namespace::Namespace;
use crate::registry::{CapabilityDef, CapabilityRegistry};
use crate::types::{HandlerResult, SdkError};

/// Capabilities declared under one namespace prefix.
///
/// ```rust,no_run
/// # use an_node_sdk::{CapabilityGroup, CapabilityRegistry};
/// let mut profile = CapabilityGroup::new("Profile-v1");
/// profile.skill("fetch_order", |input| Ok(input));
///
/// let mut users = CapabilityGroup::new("/Users/");
/// users.nest(profile);
///
/// let mut reg = CapabilityRegistry::new();
/// users.register_into(&mut reg).unwrap();
/// assert!(reg.get("users_profile_v1_fetch_order").is_some());
/// ```
#[derive(Clone, Default)]
pub struct CapabilityGroup {
    namespace: Namespace,
    defs: Vec<CapabilityDef>,
    children: Vec<CapabilityGroup>,
}

impl CapabilityGroup {
    pub fn new(prefix: &str) -> Self {
        Self {
            namespace: Namespace::parse(prefix),
            ..Default::default()
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn skill<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(CapabilityDef::skill(name, f))
    }

    pub fn reasoner<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(InvocationContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.add(CapabilityDef::reasoner(name, f))
    }

    pub fn add(&mut self, def: CapabilityDef) -> &mut Self {
        self.defs.push(def);
        self
    }

    /// Nest `child` under this group's prefix.
    pub fn nest(&mut self, child: CapabilityGroup) -> &mut Self {
        self.children.push(child);
        self
    }

    /// Ids this group would register, in declaration order.
    pub fn ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_ids(&Namespace::root(), &mut out);
        out
    }

    fn collect_ids(&self, outer: &Namespace, out: &mut Vec<String>) {
        let ns = outer.nest(&self.namespace);
        out.extend(self.defs.iter().map(|d| ns.qualify(d.name())));
        for child in &self.children {
            child.collect_ids(&ns, out);
        }
    }

    /// Register every declaration with its composed id.  Own declarations
    /// come first, then each nested group in the order it was added.
    ///
    /// Stops at the first failure; capabilities registered before it stay
    /// registered.
    pub fn register_into(self, registry: &mut CapabilityRegistry) -> Result<usize, SdkError> {
        self.register_under(&Namespace::root(), registry)
    }

    fn register_under(
        self,
        outer: &Namespace,
        registry: &mut CapabilityRegistry,
    ) -> Result<usize, SdkError> {
        let ns = outer.nest(&self.namespace);
        let mut count = 0;
        for def in self.defs {
            registry.register(ns.qualify(def.name()), def)?;
            count += 1;
        }
        for child in self.children {
            count += child.register_under(&ns, registry)?;
        }
        Ok(count)
    }
}

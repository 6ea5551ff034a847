//! Per-request resolution context.
//!
//! A [`RequestContext`] carries what every resolver call of one request
//! shares: where reads come from (the request's [`Scope`] or a committed
//! snapshot), the read trace used to capture a standing query's
//! dependencies, and, inside a live connection, the subscription control
//! surface.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use orgdir_core::{Dependency, EntityRef, SubscriptionId};
use orgdir_store::StoreRead;

use crate::error::{ContextError, ResolveError, SubscriptionError};
use crate::scope::Scope;

// ── Mutation Context ──────────────────────────────────────────────

/// The receiver of a mutation method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationContext {
    /// "A new instance of this type", reached without selecting an id.
    Anonymous { entity: String },
    /// A specific stored instance.
    Bound(EntityRef),
}

impl MutationContext {
    pub fn entity(&self) -> &str {
        match self {
            Self::Anonymous { entity } => entity,
            Self::Bound(target) => &target.entity,
        }
    }

    pub fn require_anonymous(&self, operation: &'static str) -> Result<(), ContextError> {
        match self {
            Self::Anonymous { .. } => Ok(()),
            Self::Bound(target) => Err(ContextError {
                entity: target.entity.clone(),
                operation,
                required: "anonymous",
            }),
        }
    }

    pub fn require_bound(&self, operation: &'static str) -> Result<&EntityRef, ContextError> {
        match self {
            Self::Bound(target) => Ok(target),
            Self::Anonymous { entity } => Err(ContextError {
                entity: entity.clone(),
                operation,
                required: "non-anonymous",
            }),
        }
    }
}

// ── Subscription Control ──────────────────────────────────────────

/// Subscription control operations of one live connection, exposed to
/// documents through the `_Subscription` root field.
#[async_trait]
pub trait SubscriptionControl: Send + Sync {
    /// Ids of the subscriptions owned by this connection.
    async fn subscriptions(&self) -> Vec<SubscriptionId>;

    /// Register a standing query and return its id.
    async fn subscribe(
        &self,
        query: serde_json::Value,
        variables: serde_json::Value,
    ) -> Result<SubscriptionId, SubscriptionError>;

    /// Returns whether a subscription was removed. Unknown ids are a no-op.
    async fn unsubscribe(&self, sid: &str) -> Result<bool, SubscriptionError>;

    async fn pause(&self, sid: &str) -> Result<bool, SubscriptionError>;

    async fn resume(&self, sid: &str) -> Result<bool, SubscriptionError>;
}

// ── Request Context ───────────────────────────────────────────────

enum ReadSource {
    Scope(Scope),
    Snapshot(Box<dyn StoreRead>),
}

pub struct RequestContext {
    source: ReadSource,
    trace: Option<BTreeSet<Dependency>>,
    control: Option<Arc<dyn SubscriptionControl>>,
}

impl RequestContext {
    /// A context whose reads and writes go through `scope`.
    pub fn scoped(scope: Scope) -> Self {
        Self {
            source: ReadSource::Scope(scope),
            trace: None,
            control: None,
        }
    }

    /// A read-only context over committed state. Mutations fail with
    /// [`ResolveError::NoScope`].
    pub fn snapshot(reader: Box<dyn StoreRead>) -> Self {
        Self {
            source: ReadSource::Snapshot(reader),
            trace: None,
            control: None,
        }
    }

    pub fn with_control(mut self, control: Arc<dyn SubscriptionControl>) -> Self {
        self.control = Some(control);
        self
    }

    /// Record a dependency for every read from now on.
    pub fn tracing_reads(mut self) -> Self {
        self.trace = Some(BTreeSet::new());
        self
    }

    pub fn reader(&self) -> &dyn StoreRead {
        match &self.source {
            ReadSource::Scope(scope) => scope.reader(),
            ReadSource::Snapshot(reader) => reader.as_ref(),
        }
    }

    /// The enclosing scope, required by every mutation.
    pub fn scope_mut(&mut self, operation: &str) -> Result<&mut Scope, ResolveError> {
        match &mut self.source {
            ReadSource::Scope(scope) => Ok(scope),
            ReadSource::Snapshot(_) => Err(ResolveError::NoScope(operation.to_string())),
        }
    }

    pub fn control(&self) -> Option<Arc<dyn SubscriptionControl>> {
        self.control.clone()
    }

    pub fn trace(&mut self, dependency: Dependency) {
        if let Some(trace) = &mut self.trace {
            trace.insert(dependency);
        }
    }

    pub fn trace_instance(&mut self, entity: &str, id: &str) {
        if self.trace.is_some() {
            self.trace(Dependency::Instance(EntityRef::new(entity, id)));
        }
    }

    /// Dependencies traced so far; empty when tracing is off.
    pub fn dependencies(&self) -> BTreeSet<Dependency> {
        self.trace.clone().unwrap_or_default()
    }

    /// Give back the scope, if this context owned one.
    pub fn into_scope(self) -> Option<Scope> {
        match self.source {
            ReadSource::Scope(scope) => Some(scope),
            ReadSource::Snapshot(_) => None,
        }
    }
}

//! Executes operation documents against the resolvers.
//!
//! Fields resolve in document order against one [`RequestContext`]. A
//! failing field yields `null` plus an entry in [`Output::errors`]; a fatal
//! error (see [`ResolveError::is_fatal`]) abandons the whole operation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use orgdir_core::{Cardinality, Catalog, CatalogError, EntityRef, Record};
use orgdir_store::IdAllocator;

use crate::capability::{Capabilities, FieldCapability, RootCapability, CONTROL_FIELD};
use crate::context::{MutationContext, RequestContext, SubscriptionControl};
use crate::document::{Document, Selection};
use crate::error::{ResolveError, Result, SubscriptionError};
use crate::mutation::MutationResolver;
use crate::query::{Lookup, QueryResolver};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One field-level failure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldError {
    pub message: String,
    /// Response keys and list indexes leading to the failed field.
    pub path: Vec<Value>,
}

impl FieldError {
    fn new(error: &ResolveError, path: Vec<Value>) -> Self {
        Self {
            message: error.to_string(),
            path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Output {
    pub data: Value,
    pub errors: Vec<FieldError>,
}

/// What an entity selection resolves against.
enum Node {
    Bound(Record),
    /// Placeholder from a root lookup without an id.
    Unselected,
}

pub struct Executor {
    capabilities: Arc<Capabilities>,
    queries: QueryResolver,
    mutations: MutationResolver,
}

impl Executor {
    pub fn new(catalog: Arc<Catalog>, ids: Arc<IdAllocator>) -> Self {
        Self {
            capabilities: Arc::new(Capabilities::build(catalog.clone())),
            queries: QueryResolver::new(catalog.clone()),
            mutations: MutationResolver::new(catalog, ids),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.capabilities.catalog()
    }

    /// Run one operation of `document`.
    pub async fn execute(
        &self,
        ctx: &mut RequestContext,
        document: &Document,
        operation: Option<&str>,
        variables: &Value,
    ) -> Result<Output> {
        let selections = document.operation(operation, variables)?;
        let mut errors = Vec::new();
        let mut data = Map::new();

        for sel in &selections {
            let path = vec![Value::from(sel.key())];
            let value = match self.resolve_root(ctx, sel, path.clone(), &mut errors).await {
                Ok(value) => value,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    errors.push(FieldError::new(&e, path));
                    Value::Null
                }
            };
            data.insert(sel.key().to_string(), value);
        }

        if !errors.is_empty() {
            tracing::debug!(errors = errors.len(), "Operation finished with field errors");
        }
        Ok(Output {
            data: Value::Object(data),
            errors,
        })
    }

    async fn resolve_root(
        &self,
        ctx: &mut RequestContext,
        sel: &Selection,
        path: Vec<Value>,
        errors: &mut Vec<FieldError>,
    ) -> Result<Value> {
        match self.capabilities.root(&sel.field)?.clone() {
            RootCapability::One { entity } => {
                match self.queries.query_one(ctx, &entity, sel.arg("id")).await? {
                    Lookup::Found(record) => {
                        self.render(ctx, &entity, record, &sel.select, path, errors)
                            .await
                    }
                    Lookup::NotFound => Ok(Value::Null),
                    Lookup::Unselected => {
                        self.resolve_selections(
                            ctx,
                            &entity,
                            &Node::Unselected,
                            &sel.select,
                            path,
                            errors,
                        )
                        .await
                    }
                }
            }
            RootCapability::All { entity } => {
                let records = self.queries.query_all(ctx, &entity).await?;
                self.render_list(ctx, &entity, records, &sel.select, path, errors)
                    .await
            }
            RootCapability::Control => self.resolve_control(ctx, sel, path, errors).await,
        }
    }

    fn resolve_selections<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        entity: &'a str,
        node: &'a Node,
        selections: &'a [Selection],
        path: Vec<Value>,
        errors: &'a mut Vec<FieldError>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let mut out = Map::new();
            for sel in selections {
                let mut field_path = path.clone();
                field_path.push(Value::from(sel.key()));

                let value = match self
                    .resolve_field(ctx, entity, node, sel, field_path.clone(), errors)
                    .await
                {
                    Ok(value) => value,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        errors.push(FieldError::new(&e, field_path));
                        Value::Null
                    }
                };
                out.insert(sel.key().to_string(), value);
            }
            Ok(Value::Object(out))
        })
    }

    async fn resolve_field(
        &self,
        ctx: &mut RequestContext,
        entity: &str,
        node: &Node,
        sel: &Selection,
        path: Vec<Value>,
        errors: &mut Vec<FieldError>,
    ) -> Result<Value> {
        let capability = self.capabilities.field(entity, &sel.field)?.clone();
        let context = match node {
            Node::Bound(record) => MutationContext::Bound(EntityRef::new(entity, record.id.as_str())),
            Node::Unselected => MutationContext::Anonymous {
                entity: entity.to_string(),
            },
        };

        match (capability, node) {
            (FieldCapability::Id, Node::Bound(record)) => Ok(Value::String(record.id.clone())),
            (FieldCapability::TypeName, _) => Ok(Value::String(entity.to_string())),
            (FieldCapability::Attribute(attr), Node::Bound(record)) => {
                Ok(record.attribute(&attr.name).clone())
            }
            (FieldCapability::Relationship(rel), Node::Bound(record)) => match rel.cardinality {
                Cardinality::One => {
                    match self
                        .queries
                        .relationship_one(ctx, entity, record, &rel.name)
                        .await?
                    {
                        Some(counterpart) => {
                            self.render(ctx, &rel.target, counterpart, &sel.select, path, errors)
                                .await
                        }
                        None => Ok(Value::Null),
                    }
                }
                Cardinality::Many => {
                    let counterparts = self
                        .queries
                        .relationship_many(ctx, entity, record, &rel.name)
                        .await?;
                    self.render_list(ctx, &rel.target, counterparts, &sel.select, path, errors)
                        .await
                }
            },
            (FieldCapability::Relationship(rel), Node::Unselected) => match rel.cardinality {
                Cardinality::One => Ok(Value::Null),
                Cardinality::Many => Ok(Value::Array(Vec::new())),
            },
            (FieldCapability::Id | FieldCapability::Attribute(_), Node::Unselected) => {
                Ok(Value::Null)
            }
            (FieldCapability::Create, _) => {
                let with = sel.arg("with").unwrap_or(&Value::Null);
                let record = self
                    .mutations
                    .create(ctx, &context, sel.arg("id"), with)
                    .await?;
                self.render(ctx, entity, record, &sel.select, path, errors)
                    .await
            }
            (FieldCapability::Clone, _) => {
                let record = self.mutations.clone_instance(ctx, &context).await?;
                self.render(ctx, entity, record, &sel.select, path, errors)
                    .await
            }
            (FieldCapability::Update, _) => {
                let with = sel.arg("with").unwrap_or(&Value::Null);
                let record = self.mutations.update(ctx, &context, with).await?;
                self.render(ctx, entity, record, &sel.select, path, errors)
                    .await
            }
            (FieldCapability::Delete, _) => {
                let id = self.mutations.delete(ctx, &context).await?;
                Ok(Value::String(id))
            }
        }
    }

    /// An instance with its sub-selection, or just its id when nothing is
    /// selected.
    async fn render(
        &self,
        ctx: &mut RequestContext,
        entity: &str,
        record: Record,
        select: &[Selection],
        path: Vec<Value>,
        errors: &mut Vec<FieldError>,
    ) -> Result<Value> {
        if select.is_empty() {
            return Ok(Value::String(record.id));
        }
        let node = Node::Bound(record);
        self.resolve_selections(ctx, entity, &node, select, path, errors)
            .await
    }

    async fn render_list(
        &self,
        ctx: &mut RequestContext,
        entity: &str,
        records: Vec<Record>,
        select: &[Selection],
        path: Vec<Value>,
        errors: &mut Vec<FieldError>,
    ) -> Result<Value> {
        let mut items = Vec::with_capacity(records.len());
        for (idx, record) in records.into_iter().enumerate() {
            let mut item_path = path.clone();
            item_path.push(Value::from(idx));
            items.push(
                self.render(ctx, entity, record, select, item_path, errors)
                    .await?,
            );
        }
        Ok(Value::Array(items))
    }

    // ── Subscription Control ──────────────────────────────────────

    async fn resolve_control(
        &self,
        ctx: &mut RequestContext,
        sel: &Selection,
        path: Vec<Value>,
        errors: &mut Vec<FieldError>,
    ) -> Result<Value> {
        let control = ctx.control().ok_or(SubscriptionError::NoConnection)?;

        let mut out = Map::new();
        for op in &sel.select {
            let mut op_path = path.clone();
            op_path.push(Value::from(op.key()));
            let value = match control_op(control.as_ref(), op).await {
                Ok(value) => value,
                Err(e) => {
                    errors.push(FieldError::new(&e, op_path));
                    Value::Null
                }
            };
            out.insert(op.key().to_string(), value);
        }
        Ok(Value::Object(out))
    }
}

async fn control_op(control: &dyn SubscriptionControl, op: &Selection) -> Result<Value> {
    match op.field.as_str() {
        "subscriptions" => {
            let ids: Vec<Value> = control
                .subscriptions()
                .await
                .iter()
                .map(|sid| Value::String(sid.to_string()))
                .collect();
            Ok(Value::Array(ids))
        }
        "subscribe" => {
            let query = op
                .arg("query")
                .filter(|q| !q.is_null())
                .cloned()
                .ok_or_else(|| SubscriptionError::Malformed("subscribe needs a query".into()))?;
            let variables = op.arg("variables").cloned().unwrap_or(Value::Null);
            let sid = control.subscribe(query, variables).await?;
            Ok(Value::String(sid.to_string()))
        }
        "unsubscribe" => Ok(Value::Bool(control.unsubscribe(sid_arg(op)?).await?)),
        "pause" => Ok(Value::Bool(control.pause(sid_arg(op)?).await?)),
        "resume" => Ok(Value::Bool(control.resume(sid_arg(op)?).await?)),
        other => Err(CatalogError::UnknownField {
            entity: CONTROL_FIELD.to_string(),
            field: other.to_string(),
        }
        .into()),
    }
}

fn sid_arg(op: &Selection) -> std::result::Result<&str, SubscriptionError> {
    op.arg("sid")
        .and_then(Value::as_str)
        .ok_or_else(|| SubscriptionError::Malformed(format!("{} needs a string sid", op.field)))
}

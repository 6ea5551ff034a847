//! Mutation resolver: `create`, `clone`, `update` and `delete` for every
//! catalog type.
//!
//! Each method checks its mutation context first, then validates all of its
//! arguments before the first write, so a failing field leaves neither
//! writes nor change records behind. Writes go through the request's scope
//! and each applied write is recorded there.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use orgdir_core::{
    Cardinality, Catalog, CatalogError, ChangeOp, ChangeRecord, EntityRef, EntityTypeDef,
    OwningSide, Record, RelationshipDef,
};
use orgdir_store::IdAllocator;

use crate::context::{MutationContext, RequestContext};
use crate::error::{ResolveError, Result};
use crate::query::id_value;
use crate::scope::Scope;

/// A validated relationship assignment from a `with` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RelationshipWrite {
    /// Set or clear a one-cardinality relationship.
    One(Option<String>),
    /// Replace the counterpart set.
    Set(Vec<String>),
    Add(Vec<String>),
    Del(Vec<String>),
}

impl RelationshipWrite {
    fn ids(&self) -> Vec<&str> {
        match self {
            Self::One(id) => id.iter().map(String::as_str).collect(),
            Self::Set(ids) | Self::Add(ids) | Self::Del(ids) => {
                ids.iter().map(String::as_str).collect()
            }
        }
    }
}

/// The `with` argument split into attribute and relationship writes.
#[derive(Debug, Default)]
struct FieldWrites {
    id: Option<String>,
    attributes: BTreeMap<String, Value>,
    relationships: Vec<(RelationshipDef, RelationshipWrite)>,
}

#[derive(Debug, Clone)]
pub struct MutationResolver {
    catalog: Arc<Catalog>,
    ids: Arc<IdAllocator>,
}

impl MutationResolver {
    pub fn new(catalog: Arc<Catalog>, ids: Arc<IdAllocator>) -> Self {
        Self { catalog, ids }
    }

    /// Create a new instance from an anonymous context. The id comes from
    /// the `id` argument, then `with.id`, then the allocator.
    pub async fn create(
        &self,
        ctx: &mut RequestContext,
        context: &MutationContext,
        id: Option<&Value>,
        with: &Value,
    ) -> Result<Record> {
        context.require_anonymous("create")?;
        let entity = context.entity();
        let def = self.catalog.describe(entity)?;
        let scope = ctx.scope_mut("create")?;

        let mut writes = parse_writes(def, with, true)?;
        verify_counterparts(scope, &writes).await?;

        let id = match id.filter(|v| !v.is_null()) {
            Some(value) => Some(id_value(value)?),
            None => writes.id.take(),
        };
        let id = match id {
            Some(id) => {
                if scope.reader().contains(entity, &id).await? {
                    return Err(ResolveError::InvalidArgument(format!(
                        "{entity} with id {id} already exists"
                    )));
                }
                id
            }
            None => self.ids.allocate(entity, scope.reader()).await?,
        };

        let mut record = Record::new(id.clone());
        record.attributes = writes.attributes;
        scope.txn().insert(entity, record).await?;

        let target = EntityRef::new(entity, id.as_str());
        scope.record(ChangeRecord::new(target.clone(), ChangeOp::Create));
        for (rel, write) in &writes.relationships {
            apply_relationship(scope, &target, rel, write).await?;
        }

        tracing::debug!(%target, "Instance created");
        fetch_existing(scope, &target).await
    }

    /// Copy the bound instance under a fresh id. Relationships stored on the
    /// instance itself are copied; those stored on counterparts are not.
    pub async fn clone_instance(
        &self,
        ctx: &mut RequestContext,
        context: &MutationContext,
    ) -> Result<Record> {
        let source = context.require_bound("clone")?;
        let def = self.catalog.describe(&source.entity)?;
        let scope = ctx.scope_mut("clone")?;

        let original = fetch_existing(scope, source).await?;
        let id = self.ids.allocate(&source.entity, scope.reader()).await?;

        let mut copy = Record::new(id.clone());
        copy.attributes = original.attributes.clone();
        let mut copied = Vec::new();
        for rel in def.owned_relationships() {
            if let Some(counterpart) = original.reference(&rel.foreign_key) {
                copy.references
                    .insert(rel.foreign_key.clone(), counterpart.to_string());
                copied.push(
                    ChangeRecord::new(EntityRef::new(&source.entity, id.as_str()), ChangeOp::Update)
                        .via(&rel.name, Some(EntityRef::new(&rel.target, counterpart))),
                );
            }
        }
        scope.txn().insert(&source.entity, copy).await?;

        let target = EntityRef::new(&source.entity, id.as_str());
        scope.record(ChangeRecord::new(target.clone(), ChangeOp::Create));
        for change in copied {
            scope.record(change);
        }

        tracing::debug!(from = %source, to = %target, "Instance cloned");
        fetch_existing(scope, &target).await
    }

    /// Merge `with` into the bound instance; unspecified fields are kept.
    pub async fn update(
        &self,
        ctx: &mut RequestContext,
        context: &MutationContext,
        with: &Value,
    ) -> Result<Record> {
        let target = context.require_bound("update")?;
        let def = self.catalog.describe(&target.entity)?;
        let scope = ctx.scope_mut("update")?;

        let writes = parse_writes(def, with, false)?;
        let existing = fetch_existing(scope, target).await?;
        verify_counterparts(scope, &writes).await?;

        if !writes.attributes.is_empty() {
            let mut attributes = existing.attributes;
            attributes.extend(writes.attributes);
            scope
                .txn()
                .save_attributes(&target.entity, &target.id, attributes)
                .await?;
        }
        scope.record(ChangeRecord::new(target.clone(), ChangeOp::Update));
        for (rel, write) in &writes.relationships {
            apply_relationship(scope, target, rel, write).await?;
        }

        tracing::debug!(%target, "Instance updated");
        fetch_existing(scope, target).await
    }

    /// Remove the bound instance and return its id. References held by
    /// other instances are left in place.
    pub async fn delete(&self, ctx: &mut RequestContext, context: &MutationContext) -> Result<String> {
        let target = context.require_bound("delete")?;
        self.catalog.describe(&target.entity)?;
        let scope = ctx.scope_mut("delete")?;

        if !scope.txn().remove(&target.entity, &target.id).await? {
            return Err(missing(target));
        }
        scope.record(ChangeRecord::new(target.clone(), ChangeOp::Delete));

        tracing::debug!(%target, "Instance deleted");
        Ok(target.id.clone())
    }
}

// ── Validation ────────────────────────────────────────────────────

fn parse_writes(def: &EntityTypeDef, with: &Value, allow_id: bool) -> Result<FieldWrites> {
    let fields = match with {
        Value::Null => return Ok(FieldWrites::default()),
        Value::Object(fields) => fields,
        other => {
            return Err(ResolveError::InvalidArgument(format!(
                "with must be an object, got {other}"
            )))
        }
    };

    let mut writes = FieldWrites::default();
    for (name, value) in fields {
        if name == "id" {
            if !allow_id {
                return Err(ResolveError::InvalidArgument(
                    "id of an existing instance cannot be changed".to_string(),
                ));
            }
            if !value.is_null() {
                writes.id = Some(id_value(value)?);
            }
        } else if let Some(attr) = def.attribute(name) {
            if !attr.kind.accepts(value) {
                return Err(ResolveError::InvalidArgument(format!(
                    "{}.{name} expects {:?}, got {value}",
                    def.name, attr.kind
                )));
            }
            if attr.required && value.is_null() {
                return Err(ResolveError::InvalidArgument(format!(
                    "{}.{name} must not be null",
                    def.name
                )));
            }
            writes.attributes.insert(name.clone(), value.clone());
        } else if let Some(rel) = def.relationship(name) {
            let write = parse_relationship(rel, value)?;
            writes.relationships.push((rel.clone(), write));
        } else {
            return Err(CatalogError::UnknownField {
                entity: def.name.clone(),
                field: name.clone(),
            }
            .into());
        }
    }
    Ok(writes)
}

fn parse_relationship(rel: &RelationshipDef, value: &Value) -> Result<RelationshipWrite> {
    let invalid = || {
        ResolveError::InvalidArgument(format!(
            "unsupported value for relationship {}: {value}",
            rel.name
        ))
    };

    match rel.cardinality {
        Cardinality::One => match value {
            Value::Null => Ok(RelationshipWrite::One(None)),
            other => Ok(RelationshipWrite::One(Some(id_value(other)?))),
        },
        Cardinality::Many => match value {
            Value::Array(_) => Ok(RelationshipWrite::Set(id_list(value).ok_or_else(invalid)?)),
            Value::Object(ops) if ops.len() == 1 => {
                let (op, ids) = ops.iter().next().ok_or_else(invalid)?;
                let ids = id_list(ids).ok_or_else(invalid)?;
                match op.as_str() {
                    "set" => Ok(RelationshipWrite::Set(ids)),
                    "add" => Ok(RelationshipWrite::Add(ids)),
                    "del" => Ok(RelationshipWrite::Del(ids)),
                    _ => Err(invalid()),
                }
            }
            _ => Err(invalid()),
        },
    }
}

fn id_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| id_value(v).ok())
        .collect()
}

async fn verify_counterparts(scope: &Scope, writes: &FieldWrites) -> Result<()> {
    for (rel, write) in &writes.relationships {
        if matches!(write, RelationshipWrite::Del(_)) {
            continue;
        }
        for id in write.ids() {
            if !scope.reader().contains(&rel.target, id).await? {
                return Err(ResolveError::InvalidArgument(format!(
                    "{} {id} referenced by {} does not exist",
                    rel.target, rel.name
                )));
            }
        }
    }
    Ok(())
}

// ── Relationship Writes ───────────────────────────────────────────

/// Apply one relationship write on `target` and record one change per
/// affected counterpart, attached or detached.
async fn apply_relationship(
    scope: &mut Scope,
    target: &EntityRef,
    rel: &RelationshipDef,
    write: &RelationshipWrite,
) -> Result<()> {
    let affected = match (rel.cardinality, rel.owner, write) {
        (Cardinality::One, OwningSide::Source, RelationshipWrite::One(new)) => {
            let current = fetch_existing(scope, target).await?;
            let previous = current.reference(&rel.foreign_key).map(str::to_string);
            scope
                .txn()
                .set_reference(&target.entity, &target.id, &rel.foreign_key, new.as_deref())
                .await?;

            let mut affected: BTreeSet<String> = new.iter().cloned().collect();
            affected.extend(previous);
            affected
        }
        (Cardinality::One, OwningSide::Target, RelationshipWrite::One(new)) => {
            let holders = scope
                .reader()
                .fetch_referencing(&rel.target, &rel.foreign_key, &target.id)
                .await?;
            let mut affected = BTreeSet::new();
            for holder in holders {
                if new.as_deref() != Some(holder.id.as_str()) {
                    scope
                        .txn()
                        .set_reference(&rel.target, &holder.id, &rel.foreign_key, None)
                        .await?;
                }
                affected.insert(holder.id);
            }
            if let Some(new) = new {
                scope
                    .txn()
                    .set_reference(&rel.target, new, &rel.foreign_key, Some(&target.id))
                    .await?;
                affected.insert(new.clone());
            }
            affected
        }
        (Cardinality::Many, OwningSide::Target, write) => {
            let current: BTreeSet<String> = scope
                .reader()
                .fetch_referencing(&rel.target, &rel.foreign_key, &target.id)
                .await?
                .into_iter()
                .map(|r| r.id)
                .collect();
            let named: BTreeSet<String> = write.ids().into_iter().map(str::to_string).collect();

            let (attach, detach): (BTreeSet<String>, BTreeSet<String>) = match write {
                RelationshipWrite::Set(_) => (
                    named.difference(&current).cloned().collect(),
                    current.difference(&named).cloned().collect(),
                ),
                RelationshipWrite::Add(_) => {
                    (named.difference(&current).cloned().collect(), BTreeSet::new())
                }
                RelationshipWrite::Del(_) => {
                    (BTreeSet::new(), named.intersection(&current).cloned().collect())
                }
                RelationshipWrite::One(_) => return Err(unsupported(target, rel)),
            };

            for id in &detach {
                scope
                    .txn()
                    .set_reference(&rel.target, id, &rel.foreign_key, None)
                    .await?;
            }
            for id in &attach {
                scope
                    .txn()
                    .set_reference(&rel.target, id, &rel.foreign_key, Some(&target.id))
                    .await?;
            }
            attach.into_iter().chain(detach).collect()
        }
        _ => return Err(unsupported(target, rel)),
    };

    if affected.is_empty() {
        scope.record(ChangeRecord::new(target.clone(), ChangeOp::Update).via(&rel.name, None));
    }
    for id in affected {
        scope.record(
            ChangeRecord::new(target.clone(), ChangeOp::Update)
                .via(&rel.name, Some(EntityRef::new(&rel.target, id))),
        );
    }
    Ok(())
}

async fn fetch_existing(scope: &Scope, target: &EntityRef) -> Result<Record> {
    scope
        .reader()
        .fetch(&target.entity, &target.id)
        .await?
        .ok_or_else(|| missing(target))
}

fn missing(target: &EntityRef) -> ResolveError {
    ResolveError::InvalidArgument(format!("{target} does not exist"))
}

fn unsupported(target: &EntityRef, rel: &RelationshipDef) -> ResolveError {
    ResolveError::InvalidArgument(format!(
        "relationship {} on {} cannot be written this way",
        rel.name, target.entity
    ))
}

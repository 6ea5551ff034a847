//! Query resolver: generic reads for every catalog type.
//!
//! All reads go through the request context's reader, so they see the
//! request's own uncommitted writes inside a scope and committed state
//! otherwise. Every instance read is traced as a dependency.

use std::sync::Arc;

use serde_json::Value;

use orgdir_core::{Cardinality, Catalog, Dependency, OwningSide, Record, RelationshipDef};

use crate::context::RequestContext;
use crate::error::{ResolveError, Result};

/// Outcome of a single-instance lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Record),
    /// An id was given (possibly null) but nothing is stored under it.
    NotFound,
    /// No id argument at all: the anonymous placeholder of the type.
    Unselected,
}

#[derive(Debug, Clone)]
pub struct QueryResolver {
    catalog: Arc<Catalog>,
}

impl QueryResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// `queryOne`: look up one instance by its `id` argument.
    pub async fn query_one(
        &self,
        ctx: &mut RequestContext,
        entity: &str,
        id: Option<&Value>,
    ) -> Result<Lookup> {
        self.catalog.describe(entity)?;

        let id = match id {
            None => return Ok(Lookup::Unselected),
            Some(Value::Null) => return Ok(Lookup::NotFound),
            Some(value) => id_value(value)?,
        };

        let record = ctx.reader().fetch(entity, &id).await?;
        ctx.trace_instance(entity, &id);
        Ok(record.map_or(Lookup::NotFound, Lookup::Found))
    }

    /// `queryAll`: every instance of the type, ordered by id.
    pub async fn query_all(&self, ctx: &mut RequestContext, entity: &str) -> Result<Vec<Record>> {
        self.catalog.describe(entity)?;

        let records = ctx.reader().fetch_all(entity).await?;
        ctx.trace(Dependency::Collection {
            entity: entity.to_string(),
        });
        for record in &records {
            ctx.trace_instance(entity, &record.id);
        }
        Ok(records)
    }

    /// `queryRelationshipOne`: the counterpart of `parent`, if set.
    ///
    /// A reference to a deleted counterpart resolves to `None`.
    pub async fn relationship_one(
        &self,
        ctx: &mut RequestContext,
        entity: &str,
        parent: &Record,
        name: &str,
    ) -> Result<Option<Record>> {
        let rel = self.expect_cardinality(entity, name, Cardinality::One)?;

        match rel.owner {
            OwningSide::Source => {
                let Some(target_id) = parent.reference(&rel.foreign_key) else {
                    return Ok(None);
                };
                let record = ctx.reader().fetch(&rel.target, target_id).await?;
                ctx.trace_instance(&rel.target, target_id);
                Ok(record)
            }
            OwningSide::Target => {
                let holders = ctx
                    .reader()
                    .fetch_referencing(&rel.target, &rel.foreign_key, &parent.id)
                    .await?;
                let first = holders.into_iter().next();
                if let Some(record) = &first {
                    ctx.trace_instance(&rel.target, &record.id);
                }
                Ok(first)
            }
        }
    }

    /// `queryRelationshipMany`: every counterpart of `parent`, never null.
    pub async fn relationship_many(
        &self,
        ctx: &mut RequestContext,
        entity: &str,
        parent: &Record,
        name: &str,
    ) -> Result<Vec<Record>> {
        let rel = self.expect_cardinality(entity, name, Cardinality::Many)?;

        let records = ctx
            .reader()
            .fetch_referencing(&rel.target, &rel.foreign_key, &parent.id)
            .await?;
        for record in &records {
            ctx.trace_instance(&rel.target, &record.id);
        }
        Ok(records)
    }

    fn expect_cardinality(
        &self,
        entity: &str,
        name: &str,
        cardinality: Cardinality,
    ) -> Result<RelationshipDef> {
        let rel = self.catalog.relationship(entity, name)?;
        if rel.cardinality != cardinality {
            return Err(ResolveError::InvalidArgument(format!(
                "{entity}.{name} is not a {cardinality:?} relationship"
            )));
        }
        Ok(rel.clone())
    }
}

/// Ids are strings; numeric ids are accepted and compared as their decimal
/// text.
pub(crate) fn id_value(value: &Value) -> Result<String> {
    match value {
        Value::String(id) => Ok(id.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ResolveError::InvalidArgument(format!(
            "expected an id, got {other}"
        ))),
    }
}

//! Write operations for the in-memory store.
//!
//! All writes land in the transaction's private copy of the tables.
//! Required-attribute checks are deferred to commit so that one request can
//! build an instance across several writes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedMutexGuard, RwLock};

use orgdir_core::{Catalog, Record};

use crate::client::{StoreError, StoreRead, StoreTxn, Tables};

/// A serializable transaction over [`crate::MemoryStore`].
pub struct MemoryTxn {
    catalog: Arc<Catalog>,
    committed: Arc<RwLock<Tables>>,
    working: Tables,
    touched: BTreeSet<(String, String)>,
    _gate: OwnedMutexGuard<()>,
}

impl MemoryTxn {
    pub(crate) fn new(
        catalog: Arc<Catalog>,
        committed: Arc<RwLock<Tables>>,
        working: Tables,
        gate: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            catalog,
            committed,
            working,
            touched: BTreeSet::new(),
            _gate: gate,
        }
    }

    fn table_mut(&mut self, entity: &str) -> Result<&mut BTreeMap<String, Record>, StoreError> {
        self.working
            .entities
            .get_mut(entity)
            .ok_or_else(|| StoreError::UnknownTable(entity.to_string()))
    }

    fn record_mut(&mut self, entity: &str, id: &str) -> Result<&mut Record, StoreError> {
        self.table_mut(entity)?
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            })
    }

    fn touch(&mut self, entity: &str, id: &str) {
        self.touched.insert((entity.to_string(), id.to_string()));
    }

    /// Every touched instance that still exists must carry its required
    /// attributes.
    fn check_constraints(&self) -> Result<(), StoreError> {
        for (entity, id) in &self.touched {
            let Some(record) = self.working.fetch(entity, id)? else {
                continue;
            };
            let def = self
                .catalog
                .describe(entity)
                .map_err(|e| StoreError::UnknownTable(e.to_string()))?;
            for attr in def.attributes.iter().filter(|a| a.required) {
                if record.attribute(&attr.name).is_null() {
                    return Err(StoreError::Constraint {
                        entity: entity.clone(),
                        id: id.clone(),
                        reason: format!("{} must not be null", attr.name),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreRead for MemoryTxn {
    async fn fetch(&self, entity: &str, id: &str) -> Result<Option<Record>, StoreError> {
        self.working.fetch(entity, id)
    }

    async fn fetch_all(&self, entity: &str) -> Result<Vec<Record>, StoreError> {
        self.working.fetch_all(entity)
    }

    async fn fetch_referencing(
        &self,
        entity: &str,
        foreign_key: &str,
        id: &str,
    ) -> Result<Vec<Record>, StoreError> {
        self.working.fetch_referencing(entity, foreign_key, id)
    }
}

#[async_trait]
impl StoreTxn for MemoryTxn {
    fn reader(&self) -> &dyn StoreRead {
        self
    }

    async fn insert(&mut self, entity: &str, record: Record) -> Result<(), StoreError> {
        let id = record.id.clone();
        let table = self.table_mut(entity)?;
        if table.contains_key(&id) {
            return Err(StoreError::Duplicate {
                entity: entity.to_string(),
                id,
            });
        }
        table.insert(id.clone(), record);
        self.touch(entity, &id);
        Ok(())
    }

    async fn save_attributes(
        &mut self,
        entity: &str,
        id: &str,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        self.record_mut(entity, id)?.attributes = attributes;
        self.touch(entity, id);
        Ok(())
    }

    async fn remove(&mut self, entity: &str, id: &str) -> Result<bool, StoreError> {
        let existed = self.table_mut(entity)?.remove(id).is_some();
        self.touch(entity, id);
        Ok(existed)
    }

    async fn set_reference(
        &mut self,
        entity: &str,
        id: &str,
        foreign_key: &str,
        target: Option<&str>,
    ) -> Result<(), StoreError> {
        let record = self.record_mut(entity, id)?;
        match target {
            Some(target) => {
                record
                    .references
                    .insert(foreign_key.to_string(), target.to_string());
            }
            None => {
                record.references.remove(foreign_key);
            }
        }
        self.touch(entity, id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.check_constraints()?;
        let touched = this.touched.len();
        let mut committed = this.committed.write().await;
        *committed = this.working;
        tracing::debug!(touched, "Store transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        tracing::debug!(touched = self.touched.len(), "Store transaction rolled back");
        Ok(())
    }
}

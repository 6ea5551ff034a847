//! Read operations over the in-memory tables.

use std::collections::BTreeMap;

use orgdir_core::Record;

use crate::client::{StoreError, Tables};

impl Tables {
    pub(crate) fn table(&self, entity: &str) -> Result<&BTreeMap<String, Record>, StoreError> {
        self.entities
            .get(entity)
            .ok_or_else(|| StoreError::UnknownTable(entity.to_string()))
    }

    pub(crate) fn fetch(&self, entity: &str, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.table(entity)?.get(id).cloned())
    }

    pub(crate) fn fetch_all(&self, entity: &str) -> Result<Vec<Record>, StoreError> {
        Ok(self.table(entity)?.values().cloned().collect())
    }

    pub(crate) fn fetch_referencing(
        &self,
        entity: &str,
        foreign_key: &str,
        id: &str,
    ) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .table(entity)?
            .values()
            .filter(|r| r.reference(foreign_key) == Some(id))
            .cloned()
            .collect())
    }
}

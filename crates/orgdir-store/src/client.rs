//! Persistence interface and the in-memory transactional store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use orgdir_core::{Catalog, Record};

use crate::mutations::MemoryTxn;

/// Errors from persistence operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("No table for entity type {0}")]
    UnknownTable(String),

    #[error("{entity} with id {id} already exists")]
    Duplicate { entity: String, id: String },

    #[error("{entity} with id {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation on {entity} {id}: {reason}")]
    Constraint {
        entity: String,
        id: String,
        reason: String,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to entity records.
#[async_trait]
pub trait StoreRead: Send + Sync {
    /// Fetch one record, if present.
    async fn fetch(&self, entity: &str, id: &str) -> Result<Option<Record>, StoreError>;

    /// Fetch every record of a type, ordered by id.
    async fn fetch_all(&self, entity: &str) -> Result<Vec<Record>, StoreError>;

    /// Fetch every record of `entity` whose `foreign_key` references `id`,
    /// ordered by id.
    async fn fetch_referencing(
        &self,
        entity: &str,
        foreign_key: &str,
        id: &str,
    ) -> Result<Vec<Record>, StoreError>;

    async fn contains(&self, entity: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self.fetch(entity, id).await?.is_some())
    }
}

/// One atomic unit of work. Writes are invisible to other readers until
/// [`StoreTxn::commit`]; dropping without committing discards them.
#[async_trait]
pub trait StoreTxn: StoreRead {
    /// Read access to this transaction's own view.
    fn reader(&self) -> &dyn StoreRead;

    /// Insert a new record; fails if the id is taken.
    async fn insert(&mut self, entity: &str, record: Record) -> Result<(), StoreError>;

    /// Replace the attributes of an existing record, keeping its references.
    async fn save_attributes(
        &mut self,
        entity: &str,
        id: &str,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Result<(), StoreError>;

    /// Remove a record. Returns whether it existed.
    async fn remove(&mut self, entity: &str, id: &str) -> Result<bool, StoreError>;

    /// Set or clear one foreign key on an existing record.
    async fn set_reference(
        &mut self,
        entity: &str,
        id: &str,
        foreign_key: &str,
        target: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Check deferred constraints and publish every write atomically.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every write.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// A transactional entity store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError>;

    /// A read-only view of committed state.
    async fn snapshot(&self) -> Result<Box<dyn StoreRead>, StoreError>;
}

/// Configuration for the in-memory store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long `begin` waits for the writer gate.
    pub writer_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            writer_timeout: Duration::from_millis(5000),
        }
    }
}

impl From<&orgdir_core::config::StoreSettings> for StoreConfig {
    fn from(settings: &orgdir_core::config::StoreSettings) -> Self {
        Self {
            writer_timeout: Duration::from_millis(settings.writer_timeout_ms),
        }
    }
}

/// Entity tables keyed by type name, each ordered by id.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) entities: HashMap<String, BTreeMap<String, Record>>,
}

/// In-memory store with serializable transactions.
///
/// Writing transactions are serialized through a single writer gate; each
/// works on a private copy of the tables and publishes it on commit.
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct MemoryStore {
    catalog: Arc<Catalog>,
    committed: Arc<RwLock<Tables>>,
    writer: Arc<Mutex<()>>,
    config: StoreConfig,
}

impl MemoryStore {
    /// Create an empty store with one table per catalog type.
    pub fn new(catalog: Arc<Catalog>, config: StoreConfig) -> Self {
        let mut tables = Tables::default();
        for def in catalog.types() {
            tables.entities.insert(def.name.clone(), BTreeMap::new());
        }
        tracing::info!(tables = tables.entities.len(), "In-memory store created");
        Self {
            catalog,
            committed: Arc::new(RwLock::new(tables)),
            writer: Arc::new(Mutex::new(())),
            config,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        let gate = tokio::time::timeout(self.config.writer_timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "writer gate busy for more than {}ms",
                    self.config.writer_timeout.as_millis()
                ))
            })?;

        let working = self.committed.read().await.clone();
        Ok(Box::new(MemoryTxn::new(
            self.catalog.clone(),
            self.committed.clone(),
            working,
            gate,
        )))
    }

    async fn snapshot(&self) -> Result<Box<dyn StoreRead>, StoreError> {
        let tables = self.committed.read().await.clone();
        Ok(Box::new(MemorySnapshot { tables }))
    }
}

/// Committed state as of the moment it was taken.
pub struct MemorySnapshot {
    tables: Tables,
}

#[async_trait]
impl StoreRead for MemorySnapshot {
    async fn fetch(&self, entity: &str, id: &str) -> Result<Option<Record>, StoreError> {
        self.tables.fetch(entity, id)
    }

    async fn fetch_all(&self, entity: &str) -> Result<Vec<Record>, StoreError> {
        self.tables.fetch_all(entity)
    }

    async fn fetch_referencing(
        &self,
        entity: &str,
        foreign_key: &str,
        id: &str,
    ) -> Result<Vec<Record>, StoreError> {
        self.tables.fetch_referencing(entity, foreign_key, id)
    }
}

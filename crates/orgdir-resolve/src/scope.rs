//! Transaction & change-tracing scope.
//!
//! One scope wraps every resolver call of one request in a single store
//! transaction and accumulates the change records of the mutations applied
//! through it. `commit` and `abort` consume the scope, so a scope reaches
//! exactly one terminal state and is never reused.

use orgdir_core::{ChangeLog, ChangeRecord};
use orgdir_store::{Store, StoreRead, StoreTxn};

use crate::error::TransactionError;

pub struct Scope {
    txn: Box<dyn StoreTxn>,
    changes: Vec<ChangeRecord>,
}

impl Scope {
    /// Open a scope on a fresh store transaction.
    pub async fn open(store: &dyn Store) -> Result<Self, TransactionError> {
        let txn = store.begin().await.map_err(TransactionError::Begin)?;
        Ok(Self {
            txn,
            changes: Vec::new(),
        })
    }

    /// Append a change record. Callers record only after the corresponding
    /// write has been applied through [`Scope::txn`].
    pub fn record(&mut self, change: ChangeRecord) {
        self.changes.push(change);
    }

    pub fn txn(&mut self) -> &mut dyn StoreTxn {
        self.txn.as_mut()
    }

    pub fn reader(&self) -> &dyn StoreRead {
        self.txn.reader()
    }

    /// Change records buffered so far.
    pub fn pending(&self) -> &[ChangeRecord] {
        &self.changes
    }

    /// Persist every buffered write atomically and freeze the change log.
    pub async fn commit(self) -> Result<ChangeLog, TransactionError> {
        let count = self.changes.len();
        match self.txn.commit().await {
            Ok(()) => {
                tracing::info!(changes = count, "Scope committed");
                Ok(ChangeLog::new(self.changes))
            }
            Err(e) => {
                tracing::warn!(changes = count, error = %e, "Scope commit failed, aborted");
                Err(TransactionError::Commit(e))
            }
        }
    }

    /// Discard every buffered write and change record.
    pub async fn abort(self) {
        let count = self.changes.len();
        if let Err(e) = self.txn.rollback().await {
            tracing::warn!(error = %e, "Scope rollback failed");
        }
        tracing::info!(discarded = count, "Scope aborted");
    }
}

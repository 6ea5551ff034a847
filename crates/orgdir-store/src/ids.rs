//! Process-wide id allocation for `create` and `clone` without a supplied id.
//!
//! The counter is monotonic and lives only as long as the process; it is not
//! persisted. After a restart over existing data the counter begins again at
//! its configured start, so allocation skips any value already present in the
//! target type. An allocated id is therefore never handed out twice within one
//! process, and never collides with a stored id.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::client::{StoreError, StoreRead};

#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Allocate a fresh id for `entity`, skipping values already stored.
    pub async fn allocate(
        &self,
        entity: &str,
        reader: &dyn StoreRead,
    ) -> Result<String, StoreError> {
        loop {
            let candidate = self.next.fetch_add(1, Ordering::SeqCst).to_string();
            if !reader.contains(entity, &candidate).await? {
                return Ok(candidate);
            }
            tracing::debug!(entity, id = %candidate, "Skipping id already in use");
        }
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}

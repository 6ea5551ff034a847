//! orgdir-store: persistence for the organizational directory.
//!
//! This crate is the single mutation point for entity records. All reads and
//! writes flow through the [`Store`] / [`StoreTxn`] traits so that resolvers
//! never touch storage directly and every write happens inside a transaction.

pub mod client;
pub mod ids;
pub mod mutations;
pub mod queries;
pub mod seed;

pub use client::{MemoryStore, Store, StoreConfig, StoreError, StoreRead, StoreTxn};
pub use ids::IdAllocator;
pub use seed::seed_directory;

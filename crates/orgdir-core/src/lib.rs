//! orgdir-core: Shared types, schema catalog, configuration, and error handling
//! for the organizational directory.
//!
//! This crate provides the foundational types used across all orgdir components:
//! - The schema catalog (entity types, attributes, relationships)
//! - Stored records and entity references
//! - Change records, change logs, dependencies, and notices
//! - Configuration management
//! - Common error types

pub mod catalog;
pub mod changes;
pub mod config;
pub mod error;
pub mod types;

pub use catalog::{
    AttributeDef, Cardinality, Catalog, CatalogBuilder, EntityTypeDef, OwningSide,
    RelationshipDef, ScalarKind,
};
pub use changes::{ChangeLog, ChangeOp, ChangeRecord, Dependency, Notice};
pub use config::DirectoryConfig;
pub use error::{CatalogError, DirectoryError};
pub use types::{ConnectionId, EntityRef, Record, SubscriptionId};

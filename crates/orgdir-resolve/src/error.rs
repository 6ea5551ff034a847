//! Error types for the orgdir-resolve crate.

use thiserror::Error;

use orgdir_core::CatalogError;
use orgdir_store::StoreError;

/// A mutation was called with the wrong kind of mutation context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("method {entity}#{operation} only allowed in {required} {entity} context")]
pub struct ContextError {
    pub entity: String,
    pub operation: &'static str,
    /// "anonymous" or "non-anonymous".
    pub required: &'static str,
}

/// The transaction scope could not be opened or committed.
#[derive(Error, Debug, Clone)]
pub enum TransactionError {
    #[error("Failed to open transaction: {0}")]
    Begin(#[source] StoreError),

    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] StoreError),
}

/// Malformed subscription control calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Invalid subscription argument: {0}")]
    Malformed(String),

    #[error("Subscriptions require a live connection")]
    NoConnection,

    #[error("Standing query failed: {0}")]
    Evaluation(String),

    #[error("Standing query reads no entities")]
    EmptyDependencies,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Mutation {0} called outside a transaction scope")]
    NoScope(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("Invalid operation document: {0}")]
    Document(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ResolveError {
    /// Errors after which the enclosing scope must not commit. Everything
    /// else fails only the field it occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoScope(_) | Self::Store(_) | Self::Document(_))
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;

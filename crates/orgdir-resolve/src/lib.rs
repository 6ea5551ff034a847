//! orgdir-resolve: generic, catalog-driven resolution of queries and
//! mutations.
//!
//! - [`capability`]: the table of root and entity fields built from the catalog
//! - [`query`]: `queryOne`, `queryAll` and relationship traversal
//! - [`mutation`]: `create`, `clone`, `update`, `delete`
//! - [`scope`]: one transaction and change trace per request
//! - [`context`]: per-request read source, read tracing and subscription control
//! - [`document`] / [`executor`]: operation documents and their execution

pub mod capability;
pub mod context;
pub mod document;
pub mod error;
pub mod executor;
pub mod mutation;
pub mod query;
pub mod scope;

pub use capability::{Capabilities, CONTROL_FIELD};
pub use context::{MutationContext, RequestContext, SubscriptionControl};
pub use document::{Document, Selection};
pub use error::{ContextError, ResolveError, SubscriptionError, TransactionError};
pub use executor::{Executor, FieldError, Output};
pub use mutation::MutationResolver;
pub use query::{Lookup, QueryResolver};
pub use scope::Scope;

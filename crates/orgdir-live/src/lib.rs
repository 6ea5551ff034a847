//! orgdir-live: live subscriptions over the organizational directory.
//!
//! - [`registry`]: standing queries, their dependency sets and delivery state
//! - [`connection`]: live connections and fire-and-forget notice dispatch
//! - [`service`]: the request handler tying scopes, matching and dispatch together

pub mod connection;
pub mod error;
pub mod registry;
pub mod service;

pub use connection::{ConnectionManager, NoticeSink};
pub use error::LiveError;
pub use registry::{DeliveryState, Subscription, SubscriptionRegistry};
pub use service::{DirectoryService, Request, Response};

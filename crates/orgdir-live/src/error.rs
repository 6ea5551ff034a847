//! Error types for the orgdir-live crate.

use thiserror::Error;

use orgdir_core::ConnectionId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiveError {
    #[error("Connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("Notice delivery failed: {0}")]
    Delivery(String),
}

//! Core domain types shared by the store, the resolvers and the live layer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Entity References ─────────────────────────────────────────────

/// Identifies one instance of one entity type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub entity: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.entity, self.id)
    }
}

// ── Records ───────────────────────────────────────────────────────

/// A stored entity instance.
///
/// Attribute values are scalar JSON values keyed by attribute name.
/// Relationship values live in `references` as foreign key name → referenced
/// id, on whichever record owns the foreign key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub references: BTreeMap<String, String>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn with_reference(mut self, foreign_key: &str, id: &str) -> Self {
        self.references
            .insert(foreign_key.to_string(), id.to_string());
        self
    }

    /// The attribute value, treating an absent attribute as null.
    pub fn attribute(&self, name: &str) -> &serde_json::Value {
        self.attributes.get(name).unwrap_or(&serde_json::Value::Null)
    }

    pub fn reference(&self, foreign_key: &str) -> Option<&str> {
        self.references.get(foreign_key).map(String::as_str)
    }
}

// ── Live Connection Identifiers ───────────────────────────────────

/// Identifies a live duplex connection, derived from the transport peer
/// identity (e.g. `"10.0.0.7:51234"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, unique identifier of a standing query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

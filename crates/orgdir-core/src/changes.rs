//! Change tracing and invalidation types.
//!
//! A request's mutations are traced as [`ChangeRecord`]s; a committed
//! request freezes them into a [`ChangeLog`]. Standing queries remember the
//! [`Dependency`] set of their last result, and affected connections receive
//! a [`Notice`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, EntityRef, SubscriptionId};

/// Kind of mutation a change record traces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

/// One applied mutation.
///
/// Relationship-bearing records name the relationship and the counterpart
/// whose side of it was affected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeRecord {
    pub target: EntityRef,
    pub op: ChangeOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<EntityRef>,
}

impl ChangeRecord {
    pub fn new(target: EntityRef, op: ChangeOp) -> Self {
        Self {
            target,
            op,
            relationship: None,
            counterpart: None,
        }
    }

    pub fn via(mut self, relationship: &str, counterpart: Option<EntityRef>) -> Self {
        self.relationship = Some(relationship.to_string());
        self.counterpart = counterpart;
        self
    }
}

/// The frozen, ordered change trace of one committed transaction scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLog {
    records: Vec<ChangeRecord>,
    committed_at: DateTime<Utc>,
}

impl ChangeLog {
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        Self {
            records,
            committed_at: Utc::now(),
        }
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Something a standing query's result was computed from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dependency {
    /// One instance, whether or not it existed when read.
    Instance(EntityRef),
    /// The membership of a whole collection (instances created or deleted).
    Collection { entity: String },
}

impl Dependency {
    /// Whether `change` makes a result depending on `self` stale.
    pub fn affected_by(&self, change: &ChangeRecord) -> bool {
        match self {
            Self::Instance(dep) => {
                *dep == change.target || change.counterpart.as_ref() == Some(dep)
            }
            Self::Collection { entity } => {
                *entity == change.target.entity
                    && matches!(change.op, ChangeOp::Create | ChangeOp::Delete)
            }
        }
    }
}

/// A notice pushed to one connection: these standing queries are stale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notice {
    #[serde(skip)]
    pub connection: Option<ConnectionId>,
    #[serde(rename = "data")]
    pub subscriptions: BTreeSet<SubscriptionId>,
    pub sent_at: DateTime<Utc>,
}

impl Notice {
    pub fn new(connection: ConnectionId, subscriptions: BTreeSet<SubscriptionId>) -> Self {
        Self {
            connection: Some(connection),
            subscriptions,
            sent_at: Utc::now(),
        }
    }

    /// Wire form pushed over the connection.
    pub fn to_frame(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "NOTIFY",
            "data": self.subscriptions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str) -> EntityRef {
        EntityRef::new("Person", id)
    }

    #[test]
    fn instance_dependency_matches_target_and_counterpart() {
        let dep = Dependency::Instance(EntityRef::new("OrgUnit", "XT"));

        let direct = ChangeRecord::new(EntityRef::new("OrgUnit", "XT"), ChangeOp::Update);
        assert!(dep.affected_by(&direct));

        let via = ChangeRecord::new(person("NEW"), ChangeOp::Create)
            .via("belongsTo", Some(EntityRef::new("OrgUnit", "XT")));
        assert!(dep.affected_by(&via));

        let other = ChangeRecord::new(person("HZ"), ChangeOp::Update);
        assert!(!dep.affected_by(&other));
    }

    #[test]
    fn collection_dependency_ignores_updates() {
        let dep = Dependency::Collection {
            entity: "Person".to_string(),
        };
        assert!(dep.affected_by(&ChangeRecord::new(person("A"), ChangeOp::Create)));
        assert!(dep.affected_by(&ChangeRecord::new(person("A"), ChangeOp::Delete)));
        assert!(!dep.affected_by(&ChangeRecord::new(person("A"), ChangeOp::Update)));
    }

    #[test]
    fn notice_frame_shape() {
        let sid = SubscriptionId::new();
        let notice = Notice::new(ConnectionId::from("peer:1"), BTreeSet::from([sid]));
        let frame = notice.to_frame();
        assert_eq!(frame["type"], "NOTIFY");
        assert_eq!(frame["data"][0], sid.to_string());
    }

    #[test]
    fn change_record_serialization_omits_empty_relationship() {
        let json = serde_json::to_string(&ChangeRecord::new(person("JHO"), ChangeOp::Create))
            .unwrap();
        assert!(json.contains("\"op\":\"create\""));
        assert!(!json.contains("relationship"));
    }
}

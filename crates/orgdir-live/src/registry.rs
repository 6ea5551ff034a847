//! Subscription registry and invalidation matcher.
//!
//! All bookkeeping sits behind one lock, so registration, control calls,
//! matching and routing never interleave. The registry also tracks which
//! connections are live: a standing query can only be registered for a
//! connection that has not yet been removed.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use orgdir_core::{ChangeLog, ConnectionId, Dependency, SubscriptionId};
use orgdir_resolve::SubscriptionError;

/// Whether matched notices go out immediately.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DeliveryState {
    Active,
    /// Matches only raise `pending`; `resume` sends one catch-up notice.
    Paused { pending: bool },
}

/// A standing query registered by one connection.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub connection: ConnectionId,
    pub query: Value,
    pub variables: Value,
    pub dependencies: BTreeSet<Dependency>,
    pub state: DeliveryState,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryState {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    by_connection: HashMap<ConnectionId, BTreeSet<SubscriptionId>>,
    live: HashSet<ConnectionId>,
}

impl RegistryState {
    /// The subscription, if it exists and belongs to `owner`.
    fn owned_mut(&mut self, owner: &ConnectionId, sid: SubscriptionId) -> Option<&mut Subscription> {
        self.subscriptions
            .get_mut(&sid)
            .filter(|sub| &sub.connection == owner)
    }

    fn detach(&mut self, sid: SubscriptionId) -> Option<Subscription> {
        let sub = self.subscriptions.remove(&sid)?;
        if let Some(owned) = self.by_connection.get_mut(&sub.connection) {
            owned.remove(&sid);
            if owned.is_empty() {
                self.by_connection.remove(&sub.connection);
            }
        }
        Some(sub)
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept registrations for `connection` until it is removed.
    pub async fn attach(&self, connection: ConnectionId) {
        self.state.lock().await.live.insert(connection);
    }

    /// Store a standing query with the dependency set of its first result.
    /// Fails with `NoConnection` once the owner has been removed, even if
    /// the query started evaluating while it was still connected.
    pub async fn register(
        &self,
        connection: ConnectionId,
        query: Value,
        variables: Value,
        dependencies: BTreeSet<Dependency>,
    ) -> Result<SubscriptionId, SubscriptionError> {
        if dependencies.is_empty() {
            return Err(SubscriptionError::EmptyDependencies);
        }

        let id = SubscriptionId::new();
        let subscription = Subscription {
            id,
            connection: connection.clone(),
            query,
            variables,
            dependencies,
            state: DeliveryState::Active,
            created_at: Utc::now(),
        };

        let mut state = self.state.lock().await;
        if !state.live.contains(&connection) {
            tracing::debug!(connection = %connection, "Registration for a closed connection refused");
            return Err(SubscriptionError::NoConnection);
        }
        tracing::debug!(
            subscription = %id,
            connection = %connection,
            dependencies = subscription.dependencies.len(),
            "Subscription registered"
        );
        state.subscriptions.insert(id, subscription);
        state.by_connection.entry(connection).or_default().insert(id);
        Ok(id)
    }

    /// Remove a subscription of `owner`. Unknown or foreign ids are a no-op.
    pub async fn unsubscribe(&self, owner: &ConnectionId, sid: SubscriptionId) -> bool {
        let mut state = self.state.lock().await;
        if state.owned_mut(owner, sid).is_none() {
            return false;
        }
        state.detach(sid);
        tracing::debug!(subscription = %sid, connection = %owner, "Subscription removed");
        true
    }

    pub async fn pause(&self, owner: &ConnectionId, sid: SubscriptionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(sub) = state.owned_mut(owner, sid) else {
            return false;
        };
        if sub.state == DeliveryState::Active {
            sub.state = DeliveryState::Paused { pending: false };
        }
        true
    }

    /// Reactivate a subscription. Returns `None` for unknown ids, otherwise
    /// whether a notice was missed while paused.
    pub async fn resume(&self, owner: &ConnectionId, sid: SubscriptionId) -> Option<bool> {
        let mut state = self.state.lock().await;
        let sub = state.owned_mut(owner, sid)?;
        let pending = matches!(sub.state, DeliveryState::Paused { pending: true });
        sub.state = DeliveryState::Active;
        Some(pending)
    }

    /// Put a resumed subscription back on hold with its notice pending,
    /// used when the catch-up notice could not be queued.
    pub async fn hold_pending(&self, owner: &ConnectionId, sid: SubscriptionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(sub) = state.owned_mut(owner, sid) else {
            return false;
        };
        sub.state = DeliveryState::Paused { pending: true };
        true
    }

    pub async fn subscriptions_of(&self, connection: &ConnectionId) -> Vec<SubscriptionId> {
        let state = self.state.lock().await;
        state
            .by_connection
            .get(connection)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn get(&self, sid: SubscriptionId) -> Option<Subscription> {
        self.state.lock().await.subscriptions.get(&sid).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every subscription of a connection and refuse new ones.
    /// Returns how many were dropped.
    pub async fn remove_connection(&self, connection: &ConnectionId) -> usize {
        let mut state = self.state.lock().await;
        state.live.remove(connection);
        let owned = state.by_connection.remove(connection).unwrap_or_default();
        for sid in &owned {
            state.subscriptions.remove(sid);
        }
        owned.len()
    }

    /// Every subscription made stale by `log`, each at most once.
    pub async fn matches(&self, log: &ChangeLog) -> BTreeSet<SubscriptionId> {
        let state = self.state.lock().await;
        let matched: BTreeSet<SubscriptionId> = state
            .subscriptions
            .values()
            .filter(|sub| {
                log.records()
                    .iter()
                    .any(|change| sub.dependencies.iter().any(|dep| dep.affected_by(change)))
            })
            .map(|sub| sub.id)
            .collect();

        tracing::debug!(
            changes = log.len(),
            matched = matched.len(),
            "Change log matched against subscriptions"
        );
        matched
    }

    /// Group matched ids by owning connection for delivery. Paused
    /// subscriptions are marked pending and held back; ids removed since
    /// matching are skipped.
    pub async fn route(
        &self,
        sids: &BTreeSet<SubscriptionId>,
    ) -> BTreeMap<ConnectionId, BTreeSet<SubscriptionId>> {
        let mut state = self.state.lock().await;
        let mut routes: BTreeMap<ConnectionId, BTreeSet<SubscriptionId>> = BTreeMap::new();
        for sid in sids {
            let Some(sub) = state.subscriptions.get_mut(sid) else {
                continue;
            };
            match sub.state {
                DeliveryState::Active => {
                    routes.entry(sub.connection.clone()).or_default().insert(*sid);
                }
                DeliveryState::Paused { .. } => {
                    sub.state = DeliveryState::Paused { pending: true };
                }
            }
        }
        routes
    }
}

//! Connection manager and notification dispatcher.
//!
//! Each connection gets a bounded notice queue drained by its own delivery
//! task, so a slow or dead peer never blocks the request that produced the
//! notice. Dispatch is fire-and-forget: a full queue or a vanished
//! connection drops the notice with a log line and nothing else.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use orgdir_core::{ConnectionId, Notice, SubscriptionId};

use crate::error::LiveError;
use crate::registry::SubscriptionRegistry;

/// The push side of a live connection, supplied by the transport.
#[async_trait]
pub trait NoticeSink: Send + Sync + 'static {
    async fn push(&self, notice: Notice) -> Result<(), LiveError>;
}

#[async_trait]
impl NoticeSink for mpsc::Sender<Notice> {
    async fn push(&self, notice: Notice) -> Result<(), LiveError> {
        self.send(notice)
            .await
            .map_err(|_| LiveError::Delivery("push channel closed".into()))
    }
}

struct ConnectionHandle {
    queue: mpsc::Sender<Notice>,
    delivery: JoinHandle<()>,
    connected_at: DateTime<Utc>,
}

pub struct ConnectionManager {
    registry: Arc<SubscriptionRegistry>,
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    capacity: usize,
}

impl ConnectionManager {
    pub fn new(registry: Arc<SubscriptionRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            connections: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a connection and start its delivery task.
    pub async fn connect(
        &self,
        connection: ConnectionId,
        sink: Box<dyn NoticeSink>,
    ) -> Result<(), LiveError> {
        let mut connections = self.connections.lock().await;
        if connections.contains_key(&connection) {
            return Err(LiveError::DuplicateConnection(connection));
        }

        self.registry.attach(connection.clone()).await;
        let (queue, rx) = mpsc::channel(self.capacity);
        let delivery = tokio::spawn(deliver(connection.clone(), rx, sink));
        connections.insert(
            connection.clone(),
            ConnectionHandle {
                queue,
                delivery,
                connected_at: Utc::now(),
            },
        );
        tracing::info!(connection = %connection, "Connection opened");
        Ok(())
    }

    /// Unsubscribe everything the connection owns, then remove it. Notices
    /// still queued or being pushed are dropped, and standing queries still
    /// evaluating for it fail to register.
    pub async fn disconnect(&self, connection: &ConnectionId) -> bool {
        let dropped = self.registry.remove_connection(connection).await;
        let handle = self.connections.lock().await.remove(connection);

        let Some(handle) = handle else {
            return false;
        };
        handle.delivery.abort();
        // Cancelled is the expected outcome.
        let _ = handle.delivery.await;

        tracing::info!(
            connection = %connection,
            subscriptions = dropped,
            connected_for_s = (Utc::now() - handle.connected_at).num_seconds(),
            "Connection closed"
        );
        true
    }

    pub async fn is_connected(&self, connection: &ConnectionId) -> bool {
        self.connections.lock().await.contains_key(connection)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Push one notice per owning connection for the matched ids. Returns
    /// the number of notices queued.
    pub async fn dispatch(&self, sids: &BTreeSet<SubscriptionId>) -> usize {
        let routes = self.registry.route(sids).await;
        let mut queued = 0;
        for (connection, ids) in routes {
            if self.notify(&connection, ids).await {
                queued += 1;
            }
        }
        queued
    }

    /// Queue one notice for one connection without waiting.
    pub async fn notify(&self, connection: &ConnectionId, ids: BTreeSet<SubscriptionId>) -> bool {
        let connections = self.connections.lock().await;
        let Some(handle) = connections.get(connection) else {
            tracing::debug!(connection = %connection, "Notice dropped, connection gone");
            return false;
        };

        let count = ids.len();
        match handle.queue.try_send(Notice::new(connection.clone(), ids)) {
            Ok(()) => {
                tracing::debug!(connection = %connection, subscriptions = count, "Notice queued");
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection = %connection, "Notice dropped, queue full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(connection = %connection, "Notice dropped, delivery stopped");
                false
            }
        }
    }
}

async fn deliver(connection: ConnectionId, mut rx: mpsc::Receiver<Notice>, sink: Box<dyn NoticeSink>) {
    while let Some(notice) = rx.recv().await {
        if let Err(e) = sink.push(notice).await {
            tracing::warn!(connection = %connection, error = %e, "Notice delivery failed");
        }
    }
    tracing::debug!(connection = %connection, "Delivery task finished");
}

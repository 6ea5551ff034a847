//! The directory request handler and connection lifecycle hooks.
//!
//! Every request runs inside one [`Scope`]. A committed scope's change log
//! is matched against the registered subscriptions and the affected
//! connections are notified after the commit has completed.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use orgdir_core::{
    catalog, Catalog, ChangeLog, ConnectionId, DirectoryConfig, DirectoryError, SubscriptionId,
};
use orgdir_resolve::{
    Document, Executor, FieldError, RequestContext, Scope, SubscriptionControl, SubscriptionError,
};
use orgdir_store::{IdAllocator, MemoryStore, Store, StoreConfig};

use crate::connection::{ConnectionManager, NoticeSink};
use crate::error::LiveError;
use crate::registry::SubscriptionRegistry;

/// One request from the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The operation document.
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_operation(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// Structured result of one request. `data` is absent when the request was
/// aborted as a whole.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl Response {
    fn aborted(message: String) -> Self {
        Self {
            data: None,
            errors: vec![FieldError {
                message,
                path: Vec::new(),
            }],
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.data.is_none()
    }
}

struct Shared {
    store: Arc<dyn Store>,
    executor: Executor,
    registry: Arc<SubscriptionRegistry>,
    connections: ConnectionManager,
}

/// Request handler shared by every transport connection. Clone is cheap.
#[derive(Clone)]
pub struct DirectoryService {
    shared: Arc<Shared>,
}

impl DirectoryService {
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn Store>, config: &DirectoryConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let ids = Arc::new(IdAllocator::new(config.ids.start));
        Self {
            shared: Arc::new(Shared {
                store,
                executor: Executor::new(catalog, ids),
                connections: ConnectionManager::new(registry.clone(), config.live.notice_capacity),
                registry,
            }),
        }
    }

    /// The sample directory schema over an empty in-memory store.
    pub fn in_memory(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let catalog = Arc::new(catalog::directory()?);
        let store = MemoryStore::new(catalog.clone(), StoreConfig::from(&config.store));
        Ok(Self::new(catalog, Arc::new(store), config))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.shared.store
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.shared.registry
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.shared.connections
    }

    /// Handle a request outside any live connection.
    pub async fn handle(&self, request: &Request) -> Response {
        self.run(None, request).await
    }

    /// Handle a request arriving on a live connection; the subscription
    /// control field is available.
    pub async fn handle_on(&self, connection: &ConnectionId, request: &Request) -> Response {
        self.run(Some(connection), request).await
    }

    pub async fn on_connect(
        &self,
        connection: ConnectionId,
        sink: Box<dyn NoticeSink>,
    ) -> Result<(), LiveError> {
        self.shared.connections.connect(connection, sink).await
    }

    pub async fn on_disconnect(&self, connection: &ConnectionId) -> bool {
        self.shared.connections.disconnect(connection).await
    }

    async fn run(&self, connection: Option<&ConnectionId>, request: &Request) -> Response {
        let document = match Document::parse(&request.query) {
            Ok(document) => document,
            Err(e) => return Response::aborted(e.to_string()),
        };

        let scope = match Scope::open(self.shared.store.as_ref()).await {
            Ok(scope) => scope,
            Err(e) => return Response::aborted(e.to_string()),
        };
        let mut ctx = RequestContext::scoped(scope);
        if let Some(connection) = connection {
            if self.shared.connections.is_connected(connection).await {
                ctx = ctx.with_control(Arc::new(SessionControl {
                    connection: connection.clone(),
                    shared: self.shared.clone(),
                }));
            }
        }

        let variables = request.variables.clone().unwrap_or(Value::Null);
        let outcome = self
            .shared
            .executor
            .execute(&mut ctx, &document, request.operation_name.as_deref(), &variables)
            .await;

        let Some(scope) = ctx.into_scope() else {
            return Response::aborted("request lost its transaction scope".to_string());
        };
        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "Request aborted");
                scope.abort().await;
                return Response::aborted(e.to_string());
            }
        };

        match scope.commit().await {
            Ok(log) => {
                self.publish(&log).await;
                Response {
                    data: Some(output.data),
                    errors: output.errors,
                }
            }
            Err(e) => Response::aborted(e.to_string()),
        }
    }

    /// Notify connections whose subscriptions the committed changes affect.
    async fn publish(&self, log: &ChangeLog) {
        if log.is_empty() {
            return;
        }
        let matched = self.shared.registry.matches(log).await;
        if matched.is_empty() {
            return;
        }
        let notices = self.shared.connections.dispatch(&matched).await;
        tracing::debug!(
            subscriptions = matched.len(),
            notices,
            committed_at = %log.committed_at(),
            "Change notices dispatched"
        );
    }
}

/// Subscription control bound to one live connection. Ids owned by other
/// connections behave like unknown ids.
struct SessionControl {
    connection: ConnectionId,
    shared: Arc<Shared>,
}

#[async_trait]
impl SubscriptionControl for SessionControl {
    async fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.shared.registry.subscriptions_of(&self.connection).await
    }

    async fn subscribe(
        &self,
        query: Value,
        variables: Value,
    ) -> Result<SubscriptionId, SubscriptionError> {
        let document =
            Document::from_value(&query).map_err(|e| SubscriptionError::Malformed(e.to_string()))?;

        // Standing queries read committed state only.
        let snapshot = self
            .shared
            .store
            .snapshot()
            .await
            .map_err(|e| SubscriptionError::Evaluation(e.to_string()))?;
        let mut ctx = RequestContext::snapshot(snapshot).tracing_reads();
        let output = self
            .shared
            .executor
            .execute(&mut ctx, &document, None, &variables)
            .await
            .map_err(|e| SubscriptionError::Evaluation(e.to_string()))?;
        if let Some(error) = output.errors.first() {
            return Err(SubscriptionError::Evaluation(error.message.clone()));
        }

        self.shared
            .registry
            .register(self.connection.clone(), query, variables, ctx.dependencies())
            .await
    }

    async fn unsubscribe(&self, sid: &str) -> Result<bool, SubscriptionError> {
        let sid = parse_sid(sid)?;
        Ok(self.shared.registry.unsubscribe(&self.connection, sid).await)
    }

    async fn pause(&self, sid: &str) -> Result<bool, SubscriptionError> {
        let sid = parse_sid(sid)?;
        Ok(self.shared.registry.pause(&self.connection, sid).await)
    }

    async fn resume(&self, sid: &str) -> Result<bool, SubscriptionError> {
        let sid = parse_sid(sid)?;
        match self.shared.registry.resume(&self.connection, sid).await {
            None => Ok(false),
            Some(pending) => {
                if pending
                    && !self
                        .shared
                        .connections
                        .notify(&self.connection, BTreeSet::from([sid]))
                        .await
                {
                    // Catch-up notice not queued; keep it owed.
                    self.shared.registry.hold_pending(&self.connection, sid).await;
                }
                Ok(true)
            }
        }
    }
}

fn parse_sid(raw: &str) -> Result<SubscriptionId, SubscriptionError> {
    SubscriptionId::parse(raw)
        .ok_or_else(|| SubscriptionError::Malformed(format!("{raw:?} is not a subscription id")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use orgdir_store::seed_directory;

    use super::*;

    async fn service() -> DirectoryService {
        let service = DirectoryService::in_memory(&DirectoryConfig::default()).unwrap();
        seed_directory(service.store().as_ref()).await.unwrap();
        service
    }

    #[test]
    fn request_deserializes_operation_name() {
        let request: Request = serde_json::from_value(json!({
            "query": "{\"a\": [\"Persons\"]}",
            "operationName": "a"
        }))
        .unwrap();
        assert_eq!(request.operation_name.as_deref(), Some("a"));
        assert!(request.variables.is_none());
    }

    #[test]
    fn aborted_response_omits_data() {
        let json = serde_json::to_value(Response::aborted("boom".into())).unwrap();
        assert_eq!(json, json!({"errors": [{"message": "boom", "path": []}]}));
    }

    #[tokio::test]
    async fn malformed_document_aborts() {
        let service = service().await;
        let response = service.handle(&Request::new("{not json")).await;
        assert!(response.is_aborted());
    }

    #[tokio::test]
    async fn control_needs_a_connection() {
        let service = service().await;
        let response = service
            .handle(&Request::new(r#"[{"field": "_Subscription", "select": ["subscriptions"]}]"#))
            .await;
        assert_eq!(response.data, Some(json!({"_Subscription": null})));
        assert_eq!(response.errors.len(), 1);
    }

    #[tokio::test]
    async fn malformed_sid_is_a_subscription_error() {
        let service = service().await;
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let cid = ConnectionId::from("peer:1");
        service.on_connect(cid.clone(), Box::new(tx)).await.unwrap();

        let response = service
            .handle_on(
                &cid,
                &Request::new(
                    r#"[{"field": "_Subscription", "select": [
                        {"field": "unsubscribe", "args": {"sid": "not-a-uuid"}}
                    ]}]"#,
                ),
            )
            .await;
        assert_eq!(
            response.errors[0].message,
            SubscriptionError::Malformed("\"not-a-uuid\" is not a subscription id".into())
                .to_string()
        );
    }

    #[tokio::test]
    async fn standing_query_without_reads_is_rejected() {
        let service = service().await;
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let cid = ConnectionId::from("peer:1");
        service.on_connect(cid.clone(), Box::new(tx)).await.unwrap();

        let response = service
            .handle_on(
                &cid,
                &Request::new(
                    r#"[{"field": "_Subscription", "select": [
                        {"field": "subscribe", "args": {"query": [{"field": "Person", "select": ["__typename"]}]}}
                    ]}]"#,
                ),
            )
            .await;
        assert_eq!(
            response.errors[0].message,
            SubscriptionError::EmptyDependencies.to_string()
        );
        assert!(service.registry().is_empty().await);
    }

    /// Sink whose pushes never complete.
    struct StuckSink;

    #[async_trait]
    impl NoticeSink for StuckSink {
        async fn push(&self, _notice: orgdir_core::Notice) -> Result<(), LiveError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn resume_keeps_notice_owed_when_queue_is_full() {
        let mut config = DirectoryConfig::default();
        config.live.notice_capacity = 1;
        let service = DirectoryService::in_memory(&config).unwrap();
        seed_directory(service.store().as_ref()).await.unwrap();

        let cid = ConnectionId::from("peer:stuck");
        service.on_connect(cid.clone(), Box::new(StuckSink)).await.unwrap();
        let sid = service
            .registry()
            .register(
                cid.clone(),
                Value::Null,
                Value::Null,
                BTreeSet::from([orgdir_core::Dependency::Collection {
                    entity: "Person".into(),
                }]),
            )
            .await
            .unwrap();

        // Fill the queue behind the stuck push.
        let mut filled = false;
        for _ in 0..4 {
            if !service.connections().notify(&cid, BTreeSet::from([sid])).await {
                filled = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(filled);

        assert!(service.registry().pause(&cid, sid).await);
        service.registry().route(&BTreeSet::from([sid])).await;

        let response = service
            .handle_on(
                &cid,
                &Request::new(
                    json!([{"field": "_Subscription", "select": [
                        {"field": "resume", "args": {"sid": sid.to_string()}}
                    ]}])
                    .to_string(),
                ),
            )
            .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            service.registry().get(sid).await.unwrap().state,
            crate::registry::DeliveryState::Paused { pending: true }
        );
    }
}

//! End-to-end scenarios: requests through the directory service, standing
//! queries on live connections, and the notices they receive.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, Notify};

use orgdir_core::{catalog, ConnectionId, DirectoryConfig, Notice, SubscriptionId};
use orgdir_live::{DirectoryService, LiveError, NoticeSink, Request, Response};
use orgdir_resolve::SubscriptionError;
use orgdir_store::{
    seed_directory, MemoryStore, Store, StoreConfig, StoreError, StoreRead, StoreTxn,
};

async fn service() -> DirectoryService {
    let service = DirectoryService::in_memory(&DirectoryConfig::default()).unwrap();
    seed_directory(service.store().as_ref()).await.unwrap();
    service
}

async fn connect(service: &DirectoryService, peer: &str) -> (ConnectionId, mpsc::Receiver<Notice>) {
    let (tx, rx) = mpsc::channel(16);
    let cid = ConnectionId::from(peer);
    service.on_connect(cid.clone(), Box::new(tx)).await.unwrap();
    (cid, rx)
}

async fn run(service: &DirectoryService, document: Value) -> Response {
    service.handle(&Request::new(document.to_string())).await
}

async fn control(service: &DirectoryService, cid: &ConnectionId, ops: Value) -> Value {
    let document = json!([{"field": "_Subscription", "select": ops}]);
    let response = service
        .handle_on(cid, &Request::new(document.to_string()))
        .await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    response.data.unwrap()["_Subscription"].clone()
}

async fn subscribe(service: &DirectoryService, cid: &ConnectionId, query: Value) -> SubscriptionId {
    let data = control(
        service,
        cid,
        json!([{"field": "subscribe", "alias": "sid", "args": {"query": query}}]),
    )
    .await;
    SubscriptionId::parse(data["sid"].as_str().unwrap()).unwrap()
}

async fn next_notice(rx: &mut mpsc::Receiver<Notice>) -> Notice {
    tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("no notice arrived")
        .expect("push channel closed")
}

async fn assert_quiet(rx: &mut mpsc::Receiver<Notice>) {
    let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(received.is_err(), "unexpected notice: {received:?}");
}

fn rename_hz(name: &str) -> Value {
    json!([{"field": "Person", "args": {"id": "HZ"}, "select": [
        {"field": "update", "args": {"with": {"name": name}}}
    ]}])
}

#[tokio::test]
async fn test_create_then_query_one() {
    let service = service().await;
    let created = run(
        &service,
        json!([{"field": "Person", "select": [
            {"field": "create", "args": {"id": "JHO", "with": {"name": "Jochen Hörtreiter"}}}
        ]}]),
    )
    .await;
    assert!(created.errors.is_empty(), "{:?}", created.errors);
    assert_eq!(created.data.unwrap()["Person"]["create"], "JHO");

    let read = run(
        &service,
        json!([{"field": "Person", "args": {"id": "JHO"},
                "select": ["id", "name", "belongsTo", "supervisor"]}]),
    )
    .await;
    assert_eq!(
        read.data.unwrap()["Person"],
        json!({"id": "JHO", "name": "Jochen Hörtreiter", "belongsTo": null, "supervisor": null})
    );
}

#[tokio::test]
async fn test_clone_equals_original_except_identity() {
    let service = service().await;
    let cloned = run(
        &service,
        json!([{"field": "Person", "args": {"id": "RSE"}, "select": [
            {"field": "clone", "select": ["id"]}
        ]}]),
    )
    .await;
    let data = cloned.data.unwrap();
    let copy_id = data["Person"]["clone"]["id"].as_str().unwrap().to_string();
    assert_ne!(copy_id, "RSE");

    let fields = json!(["name", "belongsTo", "supervisor"]);
    let read = run(
        &service,
        json!([
            {"field": "Person", "alias": "original", "args": {"id": "RSE"}, "select": fields},
            {"field": "Person", "alias": "copy", "args": {"id": copy_id}, "select": fields}
        ]),
    )
    .await;
    let data = read.data.unwrap();
    assert_eq!(data["original"], data["copy"]);
    assert_eq!(data["copy"]["belongsTo"], "XT");
}

#[tokio::test]
async fn test_delete_hides_instance() {
    let service = service().await;
    let deleted = run(
        &service,
        json!([{"field": "Person", "args": {"id": "BWE"}, "select": ["delete"]}]),
    )
    .await;
    assert_eq!(deleted.data.unwrap()["Person"]["delete"], "BWE");

    let read = run(
        &service,
        json!([
            {"field": "Persons", "select": ["id"]},
            {"field": "Person", "args": {"id": "BWE"}, "select": ["id"]}
        ]),
    )
    .await;
    let data = read.data.unwrap();
    let ids: Vec<_> = data["Persons"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert!(!ids.contains(&"BWE"));
    assert_eq!(ids.len(), 7);
    assert_eq!(data["Person"], Value::Null);
}

#[tokio::test]
async fn test_wrong_context_produces_no_changes() {
    let service = service().await;
    let (cid, mut rx) = connect(&service, "peer:1").await;
    subscribe(&service, &cid, json!([{"field": "Persons", "select": ["id"]}])).await;

    let response = run(
        &service,
        json!([
            {"field": "Person", "args": {"id": "HZ"}, "select": ["create"]},
            {"field": "Person", "alias": "anon", "select": [
                "delete",
                {"field": "update", "args": {"with": {"name": "X"}}},
                "clone"
            ]}
        ]),
    )
    .await;

    assert_eq!(response.errors.len(), 4);
    assert!(response
        .errors
        .iter()
        .all(|e| e.message.contains("only allowed in")));
    assert!(response.errors[0]
        .message
        .contains("Person#create only allowed in anonymous Person context"));
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_aborted_scope_notifies_nobody() {
    let service = service().await;
    let (cid, mut rx) = connect(&service, "peer:1").await;
    subscribe(
        &service,
        &cid,
        json!([{"field": "Person", "args": {"id": "HZ"}, "select": ["name"]}]),
    )
    .await;

    // The nameless person fails the commit, taking the rename with it.
    let response = run(
        &service,
        json!([
            {"field": "Person", "args": {"id": "HZ"}, "select": [
                {"field": "update", "args": {"with": {"name": "Renamed"}}}
            ]},
            {"field": "Person", "alias": "nameless", "select": [
                {"field": "create", "args": {"id": "NONAME"}}
            ]}
        ]),
    )
    .await;
    assert!(response.is_aborted());
    assert_quiet(&mut rx).await;

    let read = run(
        &service,
        json!([
            {"field": "Person", "args": {"id": "HZ"}, "select": ["name"]},
            {"field": "Person", "alias": "nameless", "args": {"id": "NONAME"}, "select": ["id"]}
        ]),
    )
    .await;
    let data = read.data.unwrap();
    assert_eq!(data["Person"]["name"], "Hans Zehetmaier");
    assert_eq!(data["nameless"], Value::Null);
}

#[tokio::test]
async fn test_committed_change_notifies_subscriber() {
    let service = service().await;
    let (cid, mut rx) = connect(&service, "peer:1").await;
    let sid = subscribe(
        &service,
        &cid,
        json!([{"field": "Person", "args": {"id": "HZ"}, "select": ["name"]}]),
    )
    .await;

    run(&service, rename_hz("Hans Z.")).await;
    let notice = next_notice(&mut rx).await;
    assert_eq!(notice.subscriptions, BTreeSet::from([sid]));
    assert_eq!(notice.to_frame(), json!({"type": "NOTIFY", "data": [sid.to_string()]}));
}

#[tokio::test]
async fn test_paused_subscription_coalesces_notices() {
    let service = service().await;
    let (cid, mut rx) = connect(&service, "peer:1").await;
    let sid = subscribe(
        &service,
        &cid,
        json!([{"field": "Person", "args": {"id": "HZ"}, "select": ["name"]}]),
    )
    .await;

    let paused = control(
        &service,
        &cid,
        json!([{"field": "pause", "args": {"sid": sid.to_string()}}]),
    )
    .await;
    assert_eq!(paused["pause"], true);

    for name in ["One", "Two", "Three"] {
        let response = run(&service, rename_hz(name)).await;
        assert!(response.errors.is_empty());
    }
    assert_quiet(&mut rx).await;

    let resumed = control(
        &service,
        &cid,
        json!([{"field": "resume", "args": {"sid": sid.to_string()}}]),
    )
    .await;
    assert_eq!(resumed["resume"], true);

    let notice = next_notice(&mut rx).await;
    assert_eq!(notice.subscriptions, BTreeSet::from([sid]));
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_director_and_unit_commit_together() {
    let service = service().await;
    let response = run(
        &service,
        json!([
            {"field": "Person", "select": [
                {"field": "create", "args": {"id": "JHO", "with": {"name": "Jochen Hörtreiter"}}}
            ]},
            {"field": "OrgUnit", "select": [
                {"field": "create",
                 "args": {"id": "CoC-WT", "with": {
                     "name": "Competence Center Web Technologies",
                     "director": "JHO",
                     "parentUnit": "XT"
                 }},
                 "select": ["id", {"field": "director", "select": ["id"]}]}
            ]}
        ]),
    )
    .await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(
        response.data.unwrap()["OrgUnit"]["create"],
        json!({"id": "CoC-WT", "director": {"id": "JHO"}})
    );

    let read = run(
        &service,
        json!([
            {"field": "OrgUnit", "args": {"id": "CoC-WT"}, "select": ["name", "director", "parentUnit"]},
            {"field": "Person", "args": {"id": "JHO"}, "select": ["name"]}
        ]),
    )
    .await;
    let data = read.data.unwrap();
    assert_eq!(data["OrgUnit"]["director"], "JHO");
    assert_eq!(data["OrgUnit"]["parentUnit"], "XT");
    assert_eq!(data["Person"]["name"], "Jochen Hörtreiter");
}

#[tokio::test]
async fn test_director_and_unit_roll_back_together() {
    let service = service().await;
    let response = run(
        &service,
        json!([
            {"field": "Person", "select": [
                {"field": "create", "args": {"id": "JHO", "with": {"name": "Jochen Hörtreiter"}}}
            ]},
            {"field": "OrgUnit", "select": [
                {"field": "create", "args": {"id": "CoC-WT", "with": {"director": "JHO"}}}
            ]}
        ]),
    )
    .await;
    assert!(response.is_aborted());

    let read = run(
        &service,
        json!([
            {"field": "Person", "args": {"id": "JHO"}, "select": ["id"]},
            {"field": "OrgUnit", "args": {"id": "CoC-WT"}, "select": ["id"]}
        ]),
    )
    .await;
    assert_eq!(read.data.unwrap(), json!({"Person": null, "OrgUnit": null}));
}

#[tokio::test]
async fn test_members_subscription_matched_once() {
    let service = service().await;
    let (cid, mut rx) = connect(&service, "peer:1").await;
    let members = subscribe(
        &service,
        &cid,
        json!([{"field": "OrgUnit", "args": {"id": "XT"}, "select": [
            {"field": "members", "select": ["id", "name"]}
        ]}]),
    )
    .await;
    let unrelated = subscribe(
        &service,
        &cid,
        json!([{"field": "Person", "args": {"id": "FST"}, "select": ["name"]}]),
    )
    .await;

    let response = run(
        &service,
        json!([
            {"field": "Person", "select": [
                {"field": "create", "args": {"id": "NEW", "with": {"name": "New Member"}}}
            ]},
            {"field": "OrgUnit", "args": {"id": "XT"}, "select": [
                {"field": "update", "args": {"with": {"members": {"add": ["NEW"]}}},
                 "select": [{"field": "members", "select": ["id"]}]}
            ]}
        ]),
    )
    .await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(
        response.data.unwrap()["OrgUnit"]["update"]["members"],
        json!([{"id": "BEN"}, {"id": "CGU"}, {"id": "NEW"}, {"id": "RSE"}])
    );

    let notice = next_notice(&mut rx).await;
    assert_eq!(notice.subscriptions, BTreeSet::from([members]));
    assert!(!notice.subscriptions.contains(&unrelated));
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_foreign_subscription_behaves_as_unknown() {
    let service = service().await;
    let (alice, _rx_a) = connect(&service, "peer:alice").await;
    let (bob, _rx_b) = connect(&service, "peer:bob").await;
    let sid = subscribe(&service, &alice, json!(["Persons"])).await;

    let data = control(
        &service,
        &bob,
        json!([
            {"field": "unsubscribe", "args": {"sid": sid.to_string()}},
            {"field": "pause", "args": {"sid": sid.to_string()}},
            "subscriptions"
        ]),
    )
    .await;
    assert_eq!(data, json!({"unsubscribe": false, "pause": false, "subscriptions": []}));

    let data = control(
        &service,
        &alice,
        json!([
            "subscriptions",
            {"field": "unsubscribe", "alias": "first", "args": {"sid": sid.to_string()}},
            {"field": "unsubscribe", "alias": "second", "args": {"sid": sid.to_string()}}
        ]),
    )
    .await;
    assert_eq!(data["subscriptions"], json!([sid.to_string()]));
    assert_eq!(data["first"], true);
    assert_eq!(data["second"], false);
}

/// Sink that holds every push until released.
struct SlowSink {
    started: Arc<Notify>,
    release: Arc<Notify>,
    delivered: Arc<Mutex<Vec<Notice>>>,
}

#[async_trait]
impl NoticeSink for SlowSink {
    async fn push(&self, notice: Notice) -> Result<(), LiveError> {
        self.started.notify_one();
        self.release.notified().await;
        self.delivered.lock().await.push(notice);
        Ok(())
    }
}

#[tokio::test]
async fn test_disconnect_during_dispatch_drops_notice() {
    let service = service().await;
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let cid = ConnectionId::from("peer:slow");
    service
        .on_connect(
            cid.clone(),
            Box::new(SlowSink {
                started: started.clone(),
                release: release.clone(),
                delivered: delivered.clone(),
            }),
        )
        .await
        .unwrap();
    let sid = subscribe(
        &service,
        &cid,
        json!([{"field": "Person", "args": {"id": "HZ"}, "select": ["name"]}]),
    )
    .await;

    let response = run(&service, rename_hz("Hans Z.")).await;
    assert!(response.errors.is_empty());
    tokio::time::timeout(Duration::from_millis(500), started.notified())
        .await
        .expect("delivery never started");

    assert!(service.on_disconnect(&cid).await);
    release.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(delivered.lock().await.is_empty());
    assert!(service.registry().get(sid).await.is_none());

    // Later changes find nobody to notify and still succeed.
    let response = run(&service, rename_hz("Hans Zehetmaier")).await;
    assert!(response.errors.is_empty());
    assert!(!response.is_aborted());
}

/// Store whose snapshots wait until released, holding a standing query
/// mid-evaluation.
struct GatedStore {
    inner: MemoryStore,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Store for GatedStore {
    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        self.inner.begin().await
    }

    async fn snapshot(&self) -> Result<Box<dyn StoreRead>, StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.snapshot().await
    }
}

#[tokio::test]
async fn test_disconnect_during_subscribe_leaves_no_subscription() {
    let config = DirectoryConfig::default();
    let catalog = Arc::new(catalog::directory().unwrap());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let store = GatedStore {
        inner: MemoryStore::new(catalog.clone(), StoreConfig::default()),
        entered: entered.clone(),
        release: release.clone(),
    };
    let service = DirectoryService::new(catalog, Arc::new(store), &config);
    seed_directory(service.store().as_ref()).await.unwrap();
    let (cid, mut rx) = connect(&service, "peer:leaving").await;

    let document = json!([{"field": "_Subscription", "select": [
        {"field": "subscribe", "args": {"query": [
            {"field": "Person", "args": {"id": "HZ"}, "select": ["name"]}
        ]}}
    ]}]);
    let pending = tokio::spawn({
        let service = service.clone();
        let cid = cid.clone();
        async move {
            service
                .handle_on(&cid, &Request::new(document.to_string()))
                .await
        }
    });
    tokio::time::timeout(Duration::from_millis(500), entered.notified())
        .await
        .expect("standing query never evaluated");

    assert!(service.on_disconnect(&cid).await);
    release.notify_one();
    let response = pending.await.unwrap();

    assert_eq!(response.data, Some(json!({"_Subscription": {"subscribe": null}})));
    assert_eq!(
        response.errors[0].message,
        SubscriptionError::NoConnection.to_string()
    );
    assert!(service.registry().is_empty().await);
    assert!(service.registry().subscriptions_of(&cid).await.is_empty());

    // A returning peer with the same id inherits nothing.
    let (tx, mut rx_again) = mpsc::channel(16);
    service.on_connect(cid.clone(), Box::new(tx)).await.unwrap();
    let response = run(&service, rename_hz("Hans Z.")).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_quiet(&mut rx_again).await;
    assert!(rx.try_recv().is_err());
}

use super::*;
use crate::record::Operation;
use crate::store::{Document, MemoryStore, ReleaseGuard};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn doc(id: &str, fields: Value) -> Document {
    Document {
        id: id.to_string(),
        fields,
    }
}

fn create(id: &str, lat: f64, lon: f64) -> ChangeEvent {
    ChangeEvent {
        event_id: None,
        operation: Operation::Create,
        id: id.to_string(),
        payload: json!({"latitude": lat, "longitude": lon}),
    }
}

fn update(id: &str, lat: f64, lon: f64) -> ChangeEvent {
    ChangeEvent {
        operation: Operation::Update,
        ..create(id, lat, lon)
    }
}

fn delete(id: &str) -> ChangeEvent {
    ChangeEvent {
        event_id: None,
        operation: Operation::Delete,
        id: id.to_string(),
        payload: Value::Null,
    }
}

fn reconciler() -> Arc<Reconciler> {
    Arc::new(Reconciler::new(Arc::new(MemoryStore::new())))
}

async fn next_update(rx: &mut broadcast::Receiver<ViewUpdate>) -> ViewUpdate {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for view update")
        .expect("view channel closed")
}

#[test]
fn snapshot_drops_invalid_records() {
    let reconciler = reconciler();

    reconciler.load_snapshot(vec![
        doc("A", json!({"latitude": 27.7, "longitude": 85.3})),
        doc("B", json!({"latitude": "bad", "longitude": "bad"})),
    ]);

    let map = reconciler.current();
    assert_eq!(map.len(), 1);
    assert!(map.contains_key("A"));
    assert_eq!(reconciler.invalid_dropped(), 1);
}

#[test]
fn events_fold_in_arrival_order() {
    let reconciler = reconciler();
    reconciler.load_snapshot(vec![doc("A", json!({"latitude": 27.7, "longitude": 85.3}))]);

    reconciler.apply_event(&create("C", 28.0, 85.0));
    assert_eq!(reconciler.current().len(), 2);

    reconciler.apply_event(&update("C", 28.1, 85.1));
    let c = reconciler.get("C").unwrap();
    assert_eq!(c.latitude, 28.1);

    reconciler.apply_event(&delete("A"));
    let map = reconciler.current();
    assert_eq!(map.len(), 1);
    assert!(map.contains_key("C"));
}

#[test]
fn invalid_event_does_not_touch_existing_entry() {
    let reconciler = reconciler();
    reconciler.load_snapshot(vec![doc("A", json!({"latitude": 27.7, "longitude": 85.3}))]);

    let bad = ChangeEvent {
        event_id: None,
        operation: Operation::Update,
        id: "A".to_string(),
        payload: json!({"latitude": "bad", "longitude": 85.3}),
    };
    reconciler.apply_event(&bad);

    let a = reconciler.get("A").unwrap();
    assert_eq!(a.latitude, 27.7);
    assert_eq!(reconciler.invalid_dropped(), 1);
    assert_eq!(reconciler.events_applied(), 0);
}

#[test]
fn delete_of_absent_id_is_a_noop() {
    let reconciler = reconciler();
    let mut rx = reconciler.subscribe();

    reconciler.apply_event(&delete("ghost"));

    assert_eq!(reconciler.events_applied(), 0);
    // Nothing changed, nothing emitted
    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[test]
fn fold_is_deterministic_under_rechunking() {
    let snapshot = || {
        vec![
            doc("A", json!({"latitude": 27.7, "longitude": 85.3})),
            doc("B", json!({"latitude": 27.8, "longitude": 85.4})),
        ]
    };
    let events = vec![
        create("C", 28.0, 85.0),
        update("A", 27.75, 85.35),
        delete("B"),
        update("C", 28.1, 85.1),
        delete("missing"),
    ];

    // Apply in one pass
    let first = reconciler();
    first.load_snapshot(snapshot());
    for event in &events {
        first.apply_event(event);
    }

    // Apply the same sequence "chunked" with interleaved reads
    let second = reconciler();
    second.load_snapshot(snapshot());
    for chunk in events.chunks(2) {
        for event in chunk {
            second.apply_event(event);
        }
        let _ = second.current();
    }

    assert_eq!(first.current(), second.current());
}

#[test]
fn view_updates_carry_full_map_and_cause() {
    let reconciler = reconciler();
    let mut rx = reconciler.subscribe();

    reconciler.load_snapshot(vec![doc("A", json!({"latitude": 27.7, "longitude": 85.3}))]);
    let snapshot = rx.try_recv().unwrap();
    assert_eq!(snapshot.cause, UpdateCause::Snapshot);
    assert_eq!(snapshot.records.len(), 1);

    reconciler.apply_event(&create("C", 28.0, 85.0));
    let created = rx.try_recv().unwrap();
    assert_eq!(
        created.cause,
        UpdateCause::Event(Operation::Create, "C".to_string())
    );
    assert_eq!(created.records.len(), 2);
}

#[tokio::test]
async fn start_snapshots_then_tails_the_feed() {
    let store = Arc::new(MemoryStore::new());
    store.seed("locations", "A", json!({"latitude": 27.7, "longitude": 85.3}));
    store.seed("locations", "B", json!({"latitude": "bad", "longitude": "bad"}));

    let reconciler = Arc::new(Reconciler::new(Arc::clone(&store) as Arc<dyn DocumentStore>));
    let mut rx = reconciler.subscribe();

    reconciler.clone().start("locations").await.unwrap();
    assert!(reconciler.is_live());

    let snapshot = next_update(&mut rx).await;
    assert_eq!(snapshot.cause, UpdateCause::Snapshot);
    assert_eq!(snapshot.records.len(), 1);

    // A write after start arrives through the feed
    store
        .upsert("locations", "C", json!({"latitude": 28.0, "longitude": 85.0}))
        .await
        .unwrap();
    let created = next_update(&mut rx).await;
    assert_eq!(
        created.cause,
        UpdateCause::Event(Operation::Create, "C".to_string())
    );

    // Deletes flow through as well
    store.remove("locations", "A");
    let deleted = next_update(&mut rx).await;
    assert_eq!(
        deleted.cause,
        UpdateCause::Event(Operation::Delete, "A".to_string())
    );
    assert_eq!(deleted.records.len(), 1);
    assert!(deleted.records.contains_key("C"));

    reconciler.stop().await;
    assert!(!reconciler.is_live());
}

#[tokio::test]
async fn stopped_reconciler_ignores_later_writes() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Arc::new(Reconciler::new(Arc::clone(&store) as Arc<dyn DocumentStore>));

    reconciler.clone().start("locations").await.unwrap();
    reconciler.stop().await;
    reconciler.stop().await;

    // stop() waited for the consumer; the feed is already released
    store
        .upsert("locations", "A", json!({"latitude": 1.0, "longitude": 2.0}))
        .await
        .unwrap();

    assert!(reconciler.current().is_empty());
}

/// Store whose change feed is fed by hand from the test
struct HandFeedStore {
    feed: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ChangeEvent>>>,
}

impl HandFeedStore {
    fn new() -> (mpsc::UnboundedSender<ChangeEvent>, Arc<Self>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            feed: std::sync::Mutex::new(Some(rx)),
        });
        (tx, store)
    }
}

#[async_trait]
impl DocumentStore for HandFeedStore {
    async fn list(&self, _scope: &str) -> Result<Vec<Document>, StoreError> {
        Ok(Vec::new())
    }

    async fn upsert(
        &self,
        _scope: &str,
        _id: &str,
        _fields: Value,
    ) -> Result<Document, StoreError> {
        Err(StoreError::Rejected("read-only".to_string()))
    }

    fn subscribe(&self, _scope: &str) -> Result<Subscription, StoreError> {
        let rx = self
            .feed
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| StoreError::Rejected("feed already taken".to_string()))?;
        Ok(Subscription::new(rx, ReleaseGuard::noop()))
    }
}

#[tokio::test]
async fn no_events_fold_after_stop_returns() {
    let (feed, store) = HandFeedStore::new();
    let reconciler = Arc::new(Reconciler::new(store));

    reconciler.clone().start("locations").await.unwrap();

    // An event queued behind the shutdown signal loses to it
    feed.send(create("A", 27.7, 85.3)).unwrap();
    reconciler.stop().await;
    assert!(reconciler.current().is_empty());

    // The consumer has exited and dropped its subscription, so a
    // late event has nowhere to go
    assert!(feed.send(create("B", 28.0, 85.0)).is_err());
    assert!(reconciler.current().is_empty());
}

/// Store whose change feed closes immediately after subscribing
struct ClosingFeedStore;

#[async_trait]
impl DocumentStore for ClosingFeedStore {
    async fn list(&self, _scope: &str) -> Result<Vec<Document>, StoreError> {
        Ok(vec![doc("A", json!({"latitude": 27.7, "longitude": 85.3}))])
    }

    async fn upsert(
        &self,
        _scope: &str,
        _id: &str,
        _fields: Value,
    ) -> Result<Document, StoreError> {
        Err(StoreError::Rejected("read-only".to_string()))
    }

    fn subscribe(&self, _scope: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tx);
        Ok(Subscription::new(rx, ReleaseGuard::noop()))
    }
}

#[tokio::test]
async fn feed_closure_is_surfaced_and_goes_not_live() {
    let reconciler = Arc::new(Reconciler::new(Arc::new(ClosingFeedStore)));
    let mut rx = reconciler.subscribe();

    reconciler.clone().start("locations").await.unwrap();

    let snapshot = next_update(&mut rx).await;
    assert_eq!(snapshot.cause, UpdateCause::Snapshot);

    // No reconnect is attempted; the closure is surfaced and the
    // (now possibly stale) view is retained for the UI
    let closed = next_update(&mut rx).await;
    assert_eq!(closed.cause, UpdateCause::FeedClosed);
    assert_eq!(closed.records.len(), 1);
    assert!(!reconciler.is_live());
}

#[tokio::test]
async fn restart_refetches_a_fresh_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Arc::new(Reconciler::new(Arc::clone(&store) as Arc<dyn DocumentStore>));

    reconciler.clone().start("locations").await.unwrap();
    reconciler.stop().await;

    // State written while stopped is picked up by the new snapshot
    store
        .upsert("locations", "A", json!({"latitude": 1.0, "longitude": 2.0}))
        .await
        .unwrap();

    reconciler.clone().start("locations").await.unwrap();
    assert!(reconciler.is_live());
    assert!(reconciler.get("A").is_some());
}

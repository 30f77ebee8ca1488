use crate::record::{parse_record, ChangeEvent, LocationRecord, Operation};
use crate::store::{DocumentStore, StoreError, Subscription};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[cfg(test)]
mod tests;

/// Why a view update was emitted
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateCause {
    /// Initial snapshot was loaded
    Snapshot,
    /// A change event was applied
    Event(Operation, String),
    /// The change feed closed; the view may be stale until restart
    FeedClosed,
}

/// Full reconciled view, broadcast after every state change
#[derive(Clone, Debug)]
pub struct ViewUpdate {
    pub records: HashMap<String, LocationRecord>,
    pub cause: UpdateCause,
}

/// Maintains the authoritative in-memory map of "who is where".
///
/// State is a pure left-fold of the initial snapshot and the change
/// events in arrival order: replaying the same events against the same
/// snapshot always yields the same map. A single consumer task applies
/// events; every other component only reads.
///
/// There is no automatic re-subscribe when the feed drops: the
/// reconciler goes not-live, emits [`UpdateCause::FeedClosed`], and
/// waits for an explicit stop()/start() which refetches a fresh
/// snapshot.
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,

    /// Lock-free concurrent map for fast reads
    records: Arc<DashMap<String, LocationRecord>>,

    view_tx: broadcast::Sender<ViewUpdate>,

    /// False before start and after the feed closes
    live: AtomicBool,

    events_applied: AtomicU64,
    invalid_dropped: AtomicU64,

    /// Some while started; consumed by stop()
    shutdown: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (view_tx, _) = broadcast::channel(256);
        Self {
            store,
            records: Arc::new(DashMap::new()),
            view_tx,
            live: AtomicBool::new(false),
            events_applied: AtomicU64::new(0),
            invalid_dropped: AtomicU64::new(0),
            shutdown: Mutex::new(None),
        }
    }

    /// Subscribe to reconciled view updates
    pub fn subscribe(&self) -> broadcast::Receiver<ViewUpdate> {
        self.view_tx.subscribe()
    }

    /// Clone of the current reconciled map
    pub fn current(&self) -> HashMap<String, LocationRecord> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<LocationRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied.load(Ordering::Relaxed)
    }

    pub fn invalid_dropped(&self) -> u64 {
        self.invalid_dropped.load(Ordering::Relaxed)
    }

    /// Fetch the snapshot, open the change feed, and start folding.
    ///
    /// A failed listing is fatal for this attempt and returned to the
    /// caller; nothing is subscribed in that case. Idempotent while
    /// running.
    pub async fn start(self: Arc<Self>, scope: &str) -> Result<(), StoreError> {
        let mut slot = self.shutdown.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let documents = self.store.list(scope).await?;
        self.load_snapshot(documents);

        let subscription = self.store.subscribe(scope)?;
        let (tx, rx) = oneshot::channel();
        self.live.store(true, Ordering::SeqCst);

        let reconciler = Arc::clone(&self);
        let task = tokio::spawn(async move {
            reconciler.run(subscription, rx).await;
        });
        *slot = Some((tx, task));

        info!(scope = %scope, records = self.records.len(), "Reconciler started");
        Ok(())
    }

    /// Stop folding and release the change feed. Idempotent.
    ///
    /// Waits for the consumer task to exit: when this returns, the
    /// feed subscription has been released and no further events will
    /// fold into the map.
    pub async fn stop(&self) {
        if let Some((tx, task)) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
            let _ = task.await;
        }
        self.live.store(false, Ordering::SeqCst);
    }

    /// Replace the map with a validated snapshot.
    ///
    /// Invalid documents are dropped with a warning and never enter
    /// the map.
    pub fn load_snapshot(&self, documents: Vec<crate::store::Document>) {
        self.records.clear();

        for document in documents {
            match parse_record(&document.id, &document.fields) {
                Ok(record) => {
                    self.records.insert(record.id.clone(), record);
                }
                Err(e) => {
                    self.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(id = %document.id, error = %e, "Dropping invalid snapshot record");
                }
            }
        }

        info!(records = self.records.len(), "Snapshot loaded");
        self.emit(UpdateCause::Snapshot);
    }

    /// Fold one change event into the map, in arrival order.
    ///
    /// Invalid payloads never touch the existing entry for their id;
    /// deletes of absent ids are no-ops. A view update is emitted only
    /// when the map actually changed.
    pub fn apply_event(&self, event: &ChangeEvent) {
        match event.operation {
            Operation::Create | Operation::Update => {
                match parse_record(&event.id, &event.payload) {
                    Ok(record) => {
                        self.records.insert(record.id.clone(), record);
                        self.events_applied.fetch_add(1, Ordering::Relaxed);
                        self.emit(UpdateCause::Event(event.operation, event.id.clone()));
                    }
                    Err(e) => {
                        self.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            id = %event.id,
                            operation = ?event.operation,
                            error = %e,
                            "Dropping invalid change event"
                        );
                    }
                }
            }
            Operation::Delete => {
                if self.records.remove(&event.id).is_some() {
                    self.events_applied.fetch_add(1, Ordering::Relaxed);
                    info!(id = %event.id, "Record deleted");
                    self.emit(UpdateCause::Event(Operation::Delete, event.id.clone()));
                }
            }
        }
    }

    fn emit(&self, cause: UpdateCause) {
        let _ = self.view_tx.send(ViewUpdate {
            records: self.current(),
            cause,
        });
    }

    async fn run(self: Arc<Self>, mut subscription: Subscription, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                // Shutdown wins over a queued event
                biased;

                _ = &mut shutdown => break,

                event = subscription.next_event() => match event {
                    Some(event) => self.apply_event(&event),
                    None => {
                        // Fail closed: surface staleness, wait for a
                        // manual restart
                        warn!("Change feed closed; view is no longer live");
                        self.live.store(false, Ordering::SeqCst);
                        self.emit(UpdateCause::FeedClosed);
                        break;
                    }
                },
            }
        }
        // Dropping the subscription releases the change feed
    }
}

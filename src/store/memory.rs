use super::{Document, DocumentStore, ReleaseGuard, StoreError, Subscription};
use crate::record::{ChangeEvent, Operation};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;


/// In-process document store.
///
/// Backs the demo binary and the test suite; change events are fanned
/// out synchronously from the writing call, so delivery per subscriber
/// is FIFO in write order (the ordering guarantee the
/// [`DocumentStore`] contract requires).
pub struct MemoryStore {
    /// (scope, id) → fields
    documents: DashMap<(String, String), Value>,

    /// Active change-feed subscribers
    subscribers: Arc<DashMap<u64, FeedSubscriber>>,

    /// Serializes mutation + fan-out so event delivery order matches
    /// write order
    write_order: Mutex<()>,

    next_token: AtomicU64,
}

struct FeedSubscriber {
    scope: String,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            subscribers: Arc::new(DashMap::new()),
            write_order: Mutex::new(()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Insert a document without emitting a change event.
    ///
    /// Fixture path for pre-subscription state, including malformed
    /// documents the validation layer must reject.
    pub fn seed(&self, scope: &str, id: &str, fields: Value) {
        self.documents
            .insert((scope.to_string(), id.to_string()), fields);
    }

    /// Delete a document; observers see a delete event if it existed
    pub fn remove(&self, scope: &str, id: &str) -> Option<Value> {
        let _order = self
            .write_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = self
            .documents
            .remove(&(scope.to_string(), id.to_string()))
            .map(|(_, fields)| fields);

        if removed.is_some() {
            self.fan_out(
                scope,
                ChangeEvent {
                    event_id: Some(Uuid::now_v7().to_string()),
                    operation: Operation::Delete,
                    id: id.to_string(),
                    payload: Value::Null,
                },
            );
        }

        removed
    }

    fn fan_out(&self, scope: &str, event: ChangeEvent) {
        // Drop subscribers whose receiver is gone
        self.subscribers.retain(|_, sub| {
            if sub.scope != scope {
                return true;
            }
            sub.tx.send(event.clone()).is_ok()
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list(&self, scope: &str) -> Result<Vec<Document>, StoreError> {
        let mut documents: Vec<Document> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == scope)
            .map(|entry| Document {
                id: entry.key().1.clone(),
                fields: entry.value().clone(),
            })
            .collect();

        // Stable listing order for callers and tests
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    async fn upsert(
        &self,
        scope: &str,
        id: &str,
        fields: Value,
    ) -> Result<Document, StoreError> {
        if id.is_empty() {
            return Err(StoreError::Rejected("empty document id".to_string()));
        }

        let _order = self
            .write_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let existed = self
            .documents
            .insert((scope.to_string(), id.to_string()), fields.clone())
            .is_some();

        let operation = if existed {
            Operation::Update
        } else {
            Operation::Create
        };

        debug!(scope = %scope, id = %id, ?operation, "Document upserted");

        self.fan_out(
            scope,
            ChangeEvent {
                event_id: Some(Uuid::now_v7().to_string()),
                operation,
                id: id.to_string(),
                payload: fields.clone(),
            },
        );

        Ok(Document {
            id: id.to_string(),
            fields,
        })
    }

    fn subscribe(&self, scope: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);

        self.subscribers.insert(
            token,
            FeedSubscriber {
                scope: scope.to_string(),
                tx,
            },
        );

        let registry = Arc::clone(&self.subscribers);
        let release = ReleaseGuard::new(move || {
            registry.remove(&token);
        });

        debug!(scope = %scope, token = token, "Change feed subscribed");

        Ok(Subscription::new(rx, release))
    }
}

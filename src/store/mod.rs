use crate::record::ChangeEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

pub mod memory;

pub use memory::MemoryStore;

/// Store operation errors
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store could not be reached
    Unavailable(String),
    /// The store refused the operation
    Rejected(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(detail) => write!(f, "store unavailable: {}", detail),
            StoreError::Rejected(detail) => write!(f, "store rejected operation: {}", detail),
        }
    }
}

impl std::error::Error for StoreError {}

/// One stored document: a key and an opaque JSON object of fields
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

/// Runs a release closure exactly once, on drop.
///
/// Used to scope external acquisitions (change-feed subscriptions,
/// position watches) to the lifetime of the value that holds them.
pub struct ReleaseGuard(Option<Box<dyn FnOnce() + Send>>);

impl ReleaseGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(release)))
    }

    /// Guard with nothing to release (mock collaborators)
    pub fn noop() -> Self {
        Self(None)
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

/// Single-consumer change-feed subscription.
///
/// Dropping the subscription releases it at the store; no events are
/// delivered afterward.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    _release: ReleaseGuard,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<ChangeEvent>, release: ReleaseGuard) -> Self {
        Self { rx, _release: release }
    }

    /// Next event in arrival order; `None` when the feed closes
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

/// Document store collaborator.
///
/// Implementations must deliver change events for a scope in the order
/// the corresponding writes were applied (per-scope FIFO); the
/// reconciler folds events strictly in arrival order and has no other
/// ordering information.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Full listing of a collection scope
    async fn list(&self, scope: &str) -> Result<Vec<Document>, StoreError>;

    /// Insert-or-overwrite by key; observers see the write as a
    /// create or update event on the scope's change feed
    async fn upsert(&self, scope: &str, id: &str, fields: Value)
        -> Result<Document, StoreError>;

    /// Open the scope's change feed
    fn subscribe(&self, scope: &str) -> Result<Subscription, StoreError>;
}

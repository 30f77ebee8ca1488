use crate::identity::Identity;
use crate::store::{DocumentStore, ReleaseGuard};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};


/// One position fix from the position source
#[derive(Clone, Debug, PartialEq)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
}

/// Position source errors; none of these stop the watch
#[derive(Debug, Clone, PartialEq)]
pub enum PositionError {
    PermissionDenied,
    Unavailable(String),
    Timeout,
}

impl fmt::Display for PositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionError::PermissionDenied => write!(f, "position permission denied"),
            PositionError::Unavailable(detail) => {
                write!(f, "position unavailable: {}", detail)
            }
            PositionError::Timeout => write!(f, "position request timed out"),
        }
    }
}

impl std::error::Error for PositionError {}

/// Position source acquisition settings
#[derive(Clone, Debug, PartialEq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub timeout_ms: u64,
    pub maximum_age_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: 10_000,
            maximum_age_ms: 0,
        }
    }
}

/// Long-lived position subscription.
///
/// Dropping the watch clears it at the source; no samples are
/// delivered afterward.
pub struct PositionWatch {
    rx: mpsc::UnboundedReceiver<Result<PositionSample, PositionError>>,
    _release: ReleaseGuard,
}

impl PositionWatch {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Result<PositionSample, PositionError>>,
        release: ReleaseGuard,
    ) -> Self {
        Self { rx, _release: release }
    }

    pub async fn next_sample(&mut self) -> Option<Result<PositionSample, PositionError>> {
        self.rx.recv().await
    }
}

/// Position source collaborator
pub trait PositionSource: Send + Sync {
    /// Open a watch; fails only when the source cannot be acquired at
    /// all (sample-level errors arrive through the watch itself)
    fn watch(&self, options: &WatchOptions) -> Result<PositionWatch, PositionError>;
}

/// Publisher status, surfaced for the UI to render
#[derive(Clone, Debug)]
pub enum PublisherStatus {
    Started { owner_id: String },
    Published { owner_id: String, timestamp: DateTime<Utc> },
    SampleDropped { owner_id: String },
    Position(PositionError),
    WriteFailed(String),
    Stopped,
}

/// Samples a position watch and upserts each fix into the document
/// store.
///
/// Writes are bounded to one in flight per publisher: a sample that
/// arrives while the previous upsert is still pending is dropped, not
/// queued (drop-while-busy). The drop is counted and surfaced as
/// status. Failed writes are not retried; the next sample supersedes
/// them.
pub struct LocationPublisher {
    store: Arc<dyn DocumentStore>,
    source: Arc<dyn PositionSource>,
    scope: String,
    options: WatchOptions,

    /// Profile fields merged into every write, when configured
    profile: Option<ProfileFields>,

    status_tx: broadcast::Sender<PublisherStatus>,

    /// Single-flight write guard
    in_flight: AtomicBool,

    writes_issued: AtomicU64,
    samples_dropped: AtomicU64,

    /// Some while started; consumed by stop()
    shutdown: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

#[derive(Clone, Debug)]
struct ProfileFields {
    display_name: String,
    contact_identity: String,
    route_label: Option<String>,
}

impl LocationPublisher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        source: Arc<dyn PositionSource>,
        scope: impl Into<String>,
        options: WatchOptions,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(64);
        Self {
            store,
            source,
            scope: scope.into(),
            options,
            profile: None,
            status_tx,
            in_flight: AtomicBool::new(false),
            writes_issued: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            shutdown: Mutex::new(None),
        }
    }

    /// Attach the resolved identity so observers can label and
    /// self-match this agent's record
    pub fn with_profile(mut self, identity: &Identity, route_label: Option<String>) -> Self {
        self.profile = Some(ProfileFields {
            display_name: identity.display_name.clone(),
            contact_identity: identity.contact_identity.clone(),
            route_label,
        });
        self
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<PublisherStatus> {
        self.status_tx.subscribe()
    }

    pub fn writes_issued(&self) -> u64 {
        self.writes_issued.load(Ordering::Relaxed)
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    /// Open the position watch and begin publishing for `owner_id`.
    ///
    /// Idempotent: a second start while running is a no-op.
    pub async fn start(self: Arc<Self>, owner_id: String) -> Result<(), PositionError> {
        let mut slot = self.shutdown.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let watch = self.source.watch(&self.options)?;
        let (tx, rx) = oneshot::channel();
        self.in_flight.store(false, Ordering::SeqCst);

        let publisher = Arc::clone(&self);
        let task = tokio::spawn(async move {
            publisher.run(owner_id, watch, rx).await;
        });
        *slot = Some((tx, task));

        Ok(())
    }

    /// Stop publishing and release the position watch. Idempotent.
    ///
    /// Waits for the sampling task to exit: when this returns, the
    /// watch has been released and no new upsert will be issued. An
    /// upsert already in flight runs to completion or failure; it is
    /// never cancelled.
    pub async fn stop(&self) {
        if let Some((tx, task)) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
            let _ = task.await;
        }
    }

    async fn run(
        self: Arc<Self>,
        owner_id: String,
        mut watch: PositionWatch,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        info!(owner_id = %owner_id, scope = %self.scope, "Location publisher started");
        let _ = self.status_tx.send(PublisherStatus::Started {
            owner_id: owner_id.clone(),
        });

        loop {
            tokio::select! {
                // Shutdown wins over a queued sample
                biased;

                _ = &mut shutdown => break,

                next = watch.next_sample() => match next {
                    Some(Ok(sample)) => Self::handle_sample(&self, &owner_id, sample),
                    Some(Err(e)) => {
                        // Non-fatal: the source may recover on the
                        // next sample
                        warn!(owner_id = %owner_id, error = %e, "Position source error");
                        let _ = self.status_tx.send(PublisherStatus::Position(e));
                    }
                    None => {
                        warn!(owner_id = %owner_id, "Position watch closed");
                        break;
                    }
                },
            }
        }

        // Release the source subscription before reporting Stopped
        drop(watch);
        info!(owner_id = %owner_id, "Location publisher stopped");
        let _ = self.status_tx.send(PublisherStatus::Stopped);
    }

    fn handle_sample(this: &Arc<Self>, owner_id: &str, sample: PositionSample) {
        if this.in_flight.swap(true, Ordering::SeqCst) {
            this.samples_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(owner_id = %owner_id, "Write in flight, dropping sample");
            let _ = this.status_tx.send(PublisherStatus::SampleDropped {
                owner_id: owner_id.to_string(),
            });
            return;
        }

        this.writes_issued.fetch_add(1, Ordering::Relaxed);
        let fields = this.sample_fields(&sample);
        let publisher = Arc::clone(this);
        let owner = owner_id.to_string();

        tokio::spawn(async move {
            let result = publisher.store.upsert(&publisher.scope, &owner, fields).await;
            publisher.in_flight.store(false, Ordering::SeqCst);

            match result {
                Ok(_) => {
                    let _ = publisher.status_tx.send(PublisherStatus::Published {
                        owner_id: owner,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    // Not retried; the next sample supersedes it
                    warn!(owner_id = %owner, error = %e, "Upsert failed");
                    let _ = publisher
                        .status_tx
                        .send(PublisherStatus::WriteFailed(e.to_string()));
                }
            }
        });
    }

    fn sample_fields(&self, sample: &PositionSample) -> Value {
        let mut fields = json!({
            "latitude": sample.latitude,
            "longitude": sample.longitude,
            "timestamp": Utc::now().to_rfc3339(),
        });

        if let (Some(profile), Some(object)) = (&self.profile, fields.as_object_mut()) {
            object.insert(
                "displayName".to_string(),
                Value::String(profile.display_name.clone()),
            );
            object.insert(
                "contactIdentity".to_string(),
                Value::String(profile.contact_identity.clone()),
            );
            if let Some(route) = &profile.route_label {
                object.insert("routeLabel".to_string(), Value::String(route.clone()));
            }
        }

        fields
    }
}

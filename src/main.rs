use anyhow::Result;
use async_trait::async_trait;
use fleetsync::config::{load_config, FleetConfig};
use fleetsync::identity::{AuthProvider, IdentityError, IdentityResolver, Profile};
use fleetsync::markers::{Bounds, Coordinates, MapSurface, MarkerIcon, MarkerManager, Popup};
use fleetsync::publisher::{
    LocationPublisher, PositionError, PositionSample, PositionSource, PositionWatch, WatchOptions,
};
use fleetsync::reconciler::Reconciler;
use fleetsync::store::{DocumentStore, MemoryStore, ReleaseGuard};
use fleetsync::view::{find_self, ColorAssigner};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Demo position source: drifts northeast from a fixed origin, one
/// sample per second
struct SimulatedSource {
    origin: PositionSample,
}

impl PositionSource for SimulatedSource {
    fn watch(&self, _options: &WatchOptions) -> Result<PositionWatch, PositionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let origin = self.origin.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            let mut step: u64 = 0;
            loop {
                ticker.tick().await;
                let drift = step as f64 * 0.0005;
                let sample = PositionSample {
                    latitude: origin.latitude + drift,
                    longitude: origin.longitude + drift,
                };
                if tx.send(Ok(sample)).is_err() {
                    break;
                }
                step += 1;
            }
        });

        Ok(PositionWatch::new(
            rx,
            ReleaseGuard::new(move || task.abort()),
        ))
    }
}

/// Demo auth collaborator with a fixed session
struct DemoAuth;

#[async_trait]
impl AuthProvider for DemoAuth {
    async fn current_profile(&self) -> Result<Profile, IdentityError> {
        Ok(Profile {
            id: Some("driver-demo".to_string()),
            display_name: Some("Demo Driver".to_string()),
            contact_identity: Some("demo@fleet.example".to_string()),
        })
    }
}

/// Map surface that renders to the log
struct LogSurface;

impl MapSurface for LogSurface {
    fn add_marker(&mut self, id: &str, at: Coordinates, icon: MarkerIcon, popup: Popup) {
        info!(id = %id, lat = at.latitude, lon = at.longitude, color = %icon.color, title = %popup.title, "Marker added");
    }

    fn update_marker(&mut self, id: &str, at: Coordinates, _icon: MarkerIcon, _popup: Popup) {
        info!(id = %id, lat = at.latitude, lon = at.longitude, "Marker moved");
    }

    fn remove_marker(&mut self, id: &str) {
        info!(id = %id, "Marker removed");
    }

    fn fit_bounds(&mut self, bounds: Bounds) {
        info!(?bounds, "Viewport fit to bounds");
    }

    fn fly_to(&mut self, at: Coordinates, zoom: f64) {
        info!(lat = at.latitude, lon = at.longitude, zoom = zoom, "Viewport fly-to");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetsync=info".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => FleetConfig::default(),
    };

    info!(scope = %config.store.scope, "Fleetsync starting...");

    let store = Arc::new(MemoryStore::new());

    let reconciler = Arc::new(Reconciler::new(Arc::clone(&store) as Arc<dyn DocumentStore>));
    reconciler.clone().start(&config.store.scope).await?;

    let identity = IdentityResolver::new(Arc::new(DemoAuth))
        .resolve()
        .await?;

    let source = Arc::new(SimulatedSource {
        origin: PositionSample {
            latitude: 27.7172,
            longitude: 85.3240,
        },
    });
    let publisher = Arc::new(
        LocationPublisher::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            source,
            config.store.scope.clone(),
            config.position.watch_options(),
        )
        .with_profile(&identity, config.publisher.route_label.clone()),
    );
    publisher.clone().start(identity.id.clone()).await?;

    // Keep the "map" in sync with the reconciled view
    let mut updates = reconciler.subscribe();
    let mut markers = MarkerManager::new(LogSurface, config.map.fly_zoom);
    let colors = ColorAssigner::new();
    let contact = identity.contact_identity.clone();
    let render = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            markers.reconcile(&update.records, &colors);
            if let Some(me) = find_self(&update.records, &contact) {
                markers.fly_to(&me.id);
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    publisher.stop().await;
    reconciler.stop().await;
    render.abort();

    Ok(())
}

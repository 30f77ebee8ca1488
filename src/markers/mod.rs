use crate::record::LocationRecord;
use crate::view::ColorAssigner;
use std::collections::HashMap;
use tracing::debug;


/// A point on the map surface
#[derive(Clone, Debug, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Minimal region covering a set of coordinates
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    /// Bounding region over the given points; `None` for zero points
    pub fn covering<'a>(points: impl IntoIterator<Item = &'a Coordinates>) -> Option<Bounds> {
        let mut bounds: Option<Bounds> = None;
        for point in points {
            bounds = Some(match bounds {
                None => Bounds {
                    south: point.latitude,
                    west: point.longitude,
                    north: point.latitude,
                    east: point.longitude,
                },
                Some(b) => Bounds {
                    south: b.south.min(point.latitude),
                    west: b.west.min(point.longitude),
                    north: b.north.max(point.latitude),
                    east: b.east.max(point.longitude),
                },
            });
        }
        bounds
    }

    pub fn contains(&self, point: &Coordinates) -> bool {
        point.latitude >= self.south
            && point.latitude <= self.north
            && point.longitude >= self.west
            && point.longitude <= self.east
    }
}

/// Marker icon parameters
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerIcon {
    pub color: String,
}

/// Info popup content shown for a marker
#[derive(Clone, Debug, PartialEq)]
pub struct Popup {
    pub title: String,
    pub subtitle: Option<String>,
}

impl Popup {
    fn for_record(record: &LocationRecord) -> Self {
        let mut parts = Vec::new();
        if let Some(route) = &record.route_label {
            parts.push(route.clone());
        }
        if let Some(timestamp) = &record.timestamp {
            parts.push(timestamp.to_rfc3339());
        }

        Self {
            title: record.label(),
            subtitle: if parts.is_empty() {
                None
            } else {
                Some(parts.join(" · "))
            },
        }
    }
}

/// Map rendering surface collaborator
pub trait MapSurface {
    fn add_marker(&mut self, id: &str, at: Coordinates, icon: MarkerIcon, popup: Popup);
    fn update_marker(&mut self, id: &str, at: Coordinates, icon: MarkerIcon, popup: Popup);
    fn remove_marker(&mut self, id: &str);
    fn fit_bounds(&mut self, bounds: Bounds);
    fn fly_to(&mut self, at: Coordinates, zoom: f64);
}

/// Keeps the surface's marker set in sync with the reconciled map.
///
/// Each reconcile pass diffs rendered ids against incoming record ids:
/// new ids get a marker, surviving ids are updated in place (a marker
/// is never destroyed and recreated for a position change, which would
/// close an open popup), stale ids are removed. After every pass the
/// rendered id set equals the record id set.
pub struct MarkerManager<S: MapSurface> {
    surface: S,
    rendered: HashMap<String, Coordinates>,
    fly_zoom: f64,
}

impl<S: MapSurface> MarkerManager<S> {
    pub fn new(surface: S, fly_zoom: f64) -> Self {
        Self {
            surface,
            rendered: HashMap::new(),
            fly_zoom,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn rendered_ids(&self) -> Vec<&str> {
        self.rendered.keys().map(String::as_str).collect()
    }

    /// Reconcile the surface against the current record map
    pub fn reconcile(
        &mut self,
        records: &HashMap<String, LocationRecord>,
        colors: &ColorAssigner,
    ) {
        let stale: Vec<String> = self
            .rendered
            .keys()
            .filter(|id| !records.contains_key(*id))
            .cloned()
            .collect();

        for id in stale {
            debug!(id = %id, "Removing marker");
            self.surface.remove_marker(&id);
            self.rendered.remove(&id);
        }

        for (id, record) in records {
            let at = Coordinates {
                latitude: record.latitude,
                longitude: record.longitude,
            };
            let icon = MarkerIcon {
                color: colors.css_color(id),
            };
            let popup = Popup::for_record(record);

            if self.rendered.contains_key(id) {
                self.surface.update_marker(id, at.clone(), icon, popup);
            } else {
                debug!(id = %id, "Adding marker");
                self.surface.add_marker(id, at.clone(), icon, popup);
            }
            self.rendered.insert(id.clone(), at);
        }
    }

    /// Fit the viewport around every rendered marker; no-op with zero
    /// markers
    pub fn fit_to_all(&mut self) {
        if let Some(bounds) = Bounds::covering(self.rendered.values()) {
            self.surface.fit_bounds(bounds);
        }
    }

    /// Smooth transition centered on one marker; absent ids are a
    /// no-op, not an error
    pub fn fly_to(&mut self, id: &str) {
        if let Some(at) = self.rendered.get(id).cloned() {
            self.surface.fly_to(at, self.fly_zoom);
        }
    }
}

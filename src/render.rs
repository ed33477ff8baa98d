use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::geo::{Bounds, Position};

const TILE_SIZE_PX: f64 = 256.0;
const HEADLESS_MAX_ZOOM: u8 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MarkerHandle(pub u64);

/// Opaque widget options handed to the renderer before the first marker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderSetup {
    pub marker_clusterer_options: Value,
    pub info_window_options: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventSource {
    Map,
    MarkerClusterer,
    InfoWindow,
}

#[derive(Debug, Clone)]
pub struct MapEvent {
    pub source: EventSource,
    pub name: String,
    pub payload: Value,
}

pub type EventHandler = Arc<dyn Fn(&MapEvent) + Send + Sync>;

#[derive(Clone)]
pub struct ListenerRegistration {
    pub source: EventSource,
    pub event: String,
    pub handler: EventHandler,
}

impl ListenerRegistration {
    pub fn new(
        source: EventSource,
        event: impl Into<String>,
        handler: impl Fn(&MapEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            event: event.into(),
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("source", &self.source)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait MapRenderer: Send + Sync {
    fn prepare(&self, _setup: &RenderSetup) {}

    fn add_listener(&self, registration: &ListenerRegistration);

    fn place_marker(&self, position: Position, html_content: &str, icon: &str) -> MarkerHandle;

    /// Draws the thin line from where a marker was geocoded to where it was
    /// finally placed.
    fn trace_displacement(&self, from: Position, to: Position);

    fn set_center(&self, position: Position);

    fn set_zoom(&self, zoom: u8);

    fn zoom(&self) -> u8;

    /// Resolves once the viewport has settled on `bounds`.
    async fn fit_to_bounds(&self, bounds: Bounds);
}

pub trait ClusterSink: Send + Sync {
    fn add_marker(&self, marker: MarkerHandle);
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedMarker {
    pub handle: MarkerHandle,
    pub position: Position,
    pub html_content: String,
    pub icon: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MapState {
    pub center: Option<Position>,
    pub zoom: u8,
    pub fitted_bounds: Option<Bounds>,
    pub markers: Vec<RenderedMarker>,
    pub clustered: Vec<MarkerHandle>,
    pub displacement_traces: Vec<(Position, Position)>,
    pub listeners: Vec<(EventSource, String)>,
    pub setup: Option<RenderSetup>,
}

/// Map without a display surface. Keeps the viewport and marker state in
/// memory and logs every call; used by the command line runner and tests.
pub struct HeadlessMap {
    width_px: u32,
    height_px: u32,
    state: Mutex<MapState>,
    handlers: Mutex<Vec<ListenerRegistration>>,
}

impl HeadlessMap {
    pub fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            width_px: width_px.max(1),
            height_px: height_px.max(1),
            state: Mutex::new(MapState::default()),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> MapState {
        self.state.lock().clone()
    }

    /// Delivers `name` to every handler registered for `source`.
    pub fn emit(&self, source: EventSource, name: &str, payload: Value) -> usize {
        let event = MapEvent {
            source,
            name: name.to_string(),
            payload,
        };
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .iter()
            .filter(|reg| reg.source == source && reg.event == name)
            .map(|reg| Arc::clone(&reg.handler))
            .collect();
        for handler in &handlers {
            handler(&event);
        }
        handlers.len()
    }

    fn zoom_for_bounds(&self, bounds: &Bounds) -> u8 {
        let lng_fraction = (bounds.north_east.lng - bounds.south_west.lng) / 360.0;
        let lat_fraction =
            (mercator_y(bounds.north_east.lat) - mercator_y(bounds.south_west.lat)) / (2.0 * PI);

        let zoom_x = (f64::from(self.width_px) / TILE_SIZE_PX / lng_fraction).log2();
        let zoom_y = (f64::from(self.height_px) / TILE_SIZE_PX / lat_fraction).log2();
        let zoom = zoom_x.min(zoom_y).floor();

        if !zoom.is_finite() || zoom >= f64::from(HEADLESS_MAX_ZOOM) {
            HEADLESS_MAX_ZOOM
        } else if zoom <= 0.0 {
            0
        } else {
            zoom as u8
        }
    }
}

impl Default for HeadlessMap {
    fn default() -> Self {
        Self::new(1024, 768)
    }
}

fn mercator_y(lat: f64) -> f64 {
    lat.clamp(-85.051_128_78, 85.051_128_78)
        .to_radians()
        .tan()
        .asinh()
}

#[async_trait]
impl MapRenderer for HeadlessMap {
    fn prepare(&self, setup: &RenderSetup) {
        debug!(?setup, "headless map prepared");
        self.state.lock().setup = Some(setup.clone());
    }

    fn add_listener(&self, registration: &ListenerRegistration) {
        debug!(source = ?registration.source, event = %registration.event, "listener registered");
        self.state
            .lock()
            .listeners
            .push((registration.source, registration.event.clone()));
        self.handlers.lock().push(registration.clone());
    }

    fn place_marker(&self, position: Position, html_content: &str, icon: &str) -> MarkerHandle {
        let mut state = self.state.lock();
        let handle = MarkerHandle(state.markers.len() as u64);
        trace!(?handle, lat = position.lat, lng = position.lng, "marker placed");
        state.markers.push(RenderedMarker {
            handle,
            position,
            html_content: html_content.to_string(),
            icon: icon.to_string(),
        });
        handle
    }

    fn trace_displacement(&self, from: Position, to: Position) {
        self.state.lock().displacement_traces.push((from, to));
    }

    fn set_center(&self, position: Position) {
        debug!(lat = position.lat, lng = position.lng, "map centered");
        self.state.lock().center = Some(position);
    }

    fn set_zoom(&self, zoom: u8) {
        debug!(zoom, "map zoom set");
        self.state.lock().zoom = zoom;
    }

    fn zoom(&self) -> u8 {
        self.state.lock().zoom
    }

    async fn fit_to_bounds(&self, bounds: Bounds) {
        let zoom = self.zoom_for_bounds(&bounds);
        debug!(?bounds, zoom, "map fitted to bounds");
        let mut state = self.state.lock();
        state.center = Some(bounds.center());
        state.zoom = zoom;
        state.fitted_bounds = Some(bounds);
    }
}

impl ClusterSink for HeadlessMap {
    fn add_marker(&self, marker: MarkerHandle) {
        self.state.lock().clustered.push(marker);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn single_point_fit_zooms_all_the_way_in() {
        let map = HeadlessMap::default();
        let p = Position::new(51.5, -0.12);
        map.fit_to_bounds(Bounds {
            south_west: p,
            north_east: p,
        })
        .await;

        let state = map.snapshot();
        assert_eq!(state.zoom, HEADLESS_MAX_ZOOM);
        assert_eq!(state.center, Some(p));
    }

    #[tokio::test]
    async fn continent_sized_fit_zooms_out() {
        let map = HeadlessMap::default();
        map.fit_to_bounds(Bounds {
            south_west: Position::new(35.0, -10.0),
            north_east: Position::new(60.0, 30.0),
        })
        .await;

        let zoom = map.zoom();
        assert!((2..=5).contains(&zoom), "unexpected zoom {zoom}");
    }

    #[test]
    fn dispatches_events_to_matching_listeners() {
        let map = HeadlessMap::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        map.add_listener(&ListenerRegistration::new(
            EventSource::Map,
            "idle",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        assert_eq!(map.emit(EventSource::Map, "idle", json!({})), 1);
        assert_eq!(map.emit(EventSource::Map, "click", json!({})), 0);
        assert_eq!(map.emit(EventSource::InfoWindow, "idle", json!({})), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            map.snapshot().listeners,
            vec![(EventSource::Map, "idle".to_string())]
        );
    }
}

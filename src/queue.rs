use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::dedup::PositionDeduplicator;
use crate::entries::AddressEntry;
use crate::geo::{Bounds, BoundsAccumulator, Position};
use crate::geocoder::{GeocodeResult, GeocodeStatus, GeocodingProvider};
use crate::render::{ClusterSink, MapRenderer, MarkerHandle};
use crate::telemetry::TelemetryClient;

// Caps the throttle backoff at 2^7 times the throttle interval.
const MAX_BACKOFF_EXPONENT: u32 = 7;

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub delay_base: Duration,
    pub delay_throttle: Duration,
    /// `None` retries a throttled entry until it resolves or the run is
    /// cancelled.
    pub max_throttle_retries: Option<u32>,
    /// Where an entry lands when neither its address nor its country
    /// geocodes.
    pub fallback_center: Position,
    pub dedup: PositionDeduplicator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueState {
    pub cursor: usize,
    pub delay: Duration,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedMarker {
    pub entry_index: usize,
    pub position: Position,
    pub geocoded: Position,
    pub html_content: String,
    pub icon: String,
    pub handle: MarkerHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlacementIssue {
    /// Offline mode could not read the address as a `lat,lng` pair. No
    /// marker was placed for the entry.
    MalformedCoordinate { entry_index: usize, address: String },
    /// The provider kept throttling past the configured retry limit. No
    /// marker was placed for the entry.
    RateLimitExhausted { entry_index: usize, address: String },
    /// De-duplication gave up; the marker may overlap another one.
    PlacementDegraded {
        entry_index: usize,
        position: Position,
    },
}

impl PlacementIssue {
    pub fn is_error(&self) -> bool {
        !matches!(self, PlacementIssue::PlacementDegraded { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueProgress {
    pub total: usize,
    pub processed: usize,
    pub placed: usize,
}

pub type ProgressObserver = Arc<dyn Fn(QueueProgress) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct QueueOutcome {
    pub placed: Vec<PlacedMarker>,
    pub bounds: Option<Bounds>,
    pub issues: Vec<PlacementIssue>,
    pub cancelled: bool,
}

/// Walks the entries in order with a single request in flight, pacing each
/// request by the outcome of the previous one.
pub struct GeocodeQueue {
    entries: Vec<AddressEntry>,
    settings: QueueSettings,
    state: QueueState,
    throttle_streak: u32,
    provider: Option<Arc<dyn GeocodingProvider>>,
    map: Arc<dyn MapRenderer>,
    clusters: Arc<dyn ClusterSink>,
    occupied: Vec<Position>,
    placed: Vec<PlacedMarker>,
    bounds: BoundsAccumulator,
    issues: Vec<PlacementIssue>,
    telemetry: Option<TelemetryClient>,
    observer: Option<ProgressObserver>,
}

impl GeocodeQueue {
    pub fn new(
        entries: Vec<AddressEntry>,
        settings: QueueSettings,
        provider: Option<Arc<dyn GeocodingProvider>>,
        map: Arc<dyn MapRenderer>,
        clusters: Arc<dyn ClusterSink>,
    ) -> Self {
        let state = QueueState {
            cursor: 0,
            delay: settings.delay_base,
            done: entries.is_empty(),
        };
        Self {
            entries,
            settings,
            state,
            throttle_streak: 0,
            provider,
            map,
            clusters,
            occupied: Vec::new(),
            placed: Vec::new(),
            bounds: BoundsAccumulator::new(),
            issues: Vec::new(),
            telemetry: None,
            observer: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Option<TelemetryClient>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_observer(mut self, observer: Option<ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    pub fn entries(&self) -> &[AddressEntry] {
        &self.entries
    }

    /// Drives the queue to completion. Cancellation is observed before each
    /// request and interrupts the pending delay.
    pub async fn run(mut self, cancel: &CancellationToken) -> QueueOutcome {
        let mut cancelled = false;
        while !self.state.done {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                _ = sleep(self.state.delay) => {}
            }
            self.step().await;
        }

        if cancelled {
            warn!(
                cursor = self.state.cursor,
                total = self.entries.len(),
                "geocoding queue cancelled"
            );
        }

        QueueOutcome {
            placed: self.placed,
            bounds: self.bounds.snapshot(),
            issues: self.issues,
            cancelled,
        }
    }

    /// Issues one request for the entry under the cursor and applies its
    /// outcome. Does nothing once the queue is done.
    pub async fn step(&mut self) {
        if self.state.done {
            return;
        }
        let index = self.state.cursor;
        let Some(provider) = self.provider.clone() else {
            self.place_literal(index);
            return;
        };

        let address = self.entries[index].address.clone();
        debug!(index, address = %address, "geocoding entry");
        let result = match provider.geocode(&address).await {
            Ok(result) => result,
            Err(err) => {
                warn!(?err, index, "geocoding request failed");
                GeocodeResult::with_status(GeocodeStatus::Error)
            }
        };

        match (result.status, result.location) {
            (GeocodeStatus::Ok, Some(location)) => {
                self.place(index, location);
                self.advance();
            }
            (GeocodeStatus::OverQueryLimit, _) => self.handle_throttled(index),
            (GeocodeStatus::ZeroResults, _) => self.handle_zero_results(index),
            (GeocodeStatus::Ok, None) | (GeocodeStatus::Error, _) => self.place_literal(index),
        }
    }

    fn handle_throttled(&mut self, index: usize) {
        self.throttle_streak = self.throttle_streak.saturating_add(1);
        if let Some(limit) = self
            .settings
            .max_throttle_retries
            .filter(|limit| self.throttle_streak > *limit)
        {
            warn!(
                index,
                retries = limit,
                "provider still throttling; skipping entry"
            );
            self.issues.push(PlacementIssue::RateLimitExhausted {
                entry_index: index,
                address: self.entries[index].address.clone(),
            });
            self.advance();
            return;
        }

        let exponent = (self.throttle_streak - 1).min(MAX_BACKOFF_EXPONENT);
        self.state.delay = self
            .settings
            .delay_throttle
            .saturating_mul(1_u32 << exponent);
        warn!(
            index,
            attempt = self.throttle_streak,
            "geocoding throttled; retrying after {:?}",
            self.state.delay
        );
        self.record(
            "geocode_throttled",
            json!({
                "entry_index": index,
                "attempt": self.throttle_streak,
                "delay_ms": self.state.delay.as_millis() as u64,
            }),
        );
    }

    fn handle_zero_results(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        if !entry.is_country_level() {
            debug!(index, country = %entry.country, "no results; retrying with country");
            entry.address = entry.country.clone();
            self.state.delay = self.settings.delay_base;
            self.record("geocode_country_fallback", json!({ "entry_index": index }));
            return;
        }

        let center = self.settings.fallback_center;
        debug!(index, "country has no results; placing at fallback center");
        self.record("geocode_center_fallback", json!({ "entry_index": index }));
        self.place(index, center);
        self.advance();
    }

    fn place_literal(&mut self, index: usize) {
        match Position::parse_literal(&self.entries[index].address) {
            Ok(position) => self.place(index, position),
            Err(err) => {
                warn!(?err, index, "entry is not a literal coordinate; skipping");
                self.issues.push(PlacementIssue::MalformedCoordinate {
                    entry_index: index,
                    address: self.entries[index].address.clone(),
                });
            }
        }
        self.advance();
    }

    fn place(&mut self, index: usize, candidate: Position) {
        let resolution = self.settings.dedup.resolve(candidate, &self.occupied);
        if resolution.degraded {
            warn!(
                index,
                iterations = resolution.iterations,
                "could not find a free position; marker may overlap"
            );
            self.issues.push(PlacementIssue::PlacementDegraded {
                entry_index: index,
                position: resolution.position,
            });
            self.record(
                "placement_degraded",
                json!({ "entry_index": index, "iterations": resolution.iterations }),
            );
        }

        let position = resolution.position;
        self.map.trace_displacement(resolution.origin, position);
        self.bounds.extend(position);

        let entry = &self.entries[index];
        let handle = self
            .map
            .place_marker(position, &entry.html_content, &entry.icon);
        self.clusters.add_marker(handle);
        trace!(index, lat = position.lat, lng = position.lng, "entry placed");

        self.occupied.push(position);
        self.placed.push(PlacedMarker {
            entry_index: index,
            position,
            geocoded: resolution.origin,
            html_content: entry.html_content.clone(),
            icon: entry.icon.clone(),
            handle,
        });
    }

    fn advance(&mut self) {
        self.state.cursor += 1;
        self.state.delay = self.settings.delay_base;
        self.throttle_streak = 0;
        if self.state.cursor >= self.entries.len() {
            self.state.done = true;
        }

        if let Some(observer) = &self.observer {
            observer(QueueProgress {
                total: self.entries.len(),
                processed: self.state.cursor,
                placed: self.placed.len(),
            });
        }
    }

    fn record(&self, name: &str, payload: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.record(name, payload) {
                warn!(?err, event = name, "failed to record telemetry event");
            }
        }
    }
}

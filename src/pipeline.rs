use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::completion::{CompletionPolicy, FinalView};
use crate::config::PipelineConfig;
use crate::dedup::PositionDeduplicator;
use crate::entries::AddressEntry;
use crate::geo::Position;
use crate::geocoder::GeocodingProvider;
use crate::queue::{GeocodeQueue, PlacedMarker, PlacementIssue, ProgressObserver, QueueSettings};
use crate::render::{ClusterSink, ListenerRegistration, MapRenderer, RenderSetup};
use crate::telemetry::TelemetryClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GeocoderMode {
    Enabled,
    /// Addresses are read as literal `lat,lng` pairs.
    Disabled,
}

#[derive(Clone)]
pub struct PipelineOptions {
    pub geocoder: GeocoderMode,
    pub explicit_center: Option<Position>,
    pub default_center: Position,
    pub marker_clusterer_options: Value,
    pub info_window_options: Value,
    pub delay_base: Duration,
    pub delay_throttle: Duration,
    pub max_throttle_retries: Option<u32>,
    pub zoom_ceiling: u8,
    pub dedup_max_iterations: u32,
    pub listeners: Vec<ListenerRegistration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("geocoder", &self.geocoder)
            .field("explicit_center", &self.explicit_center)
            .field("default_center", &self.default_center)
            .field("delay_base", &self.delay_base)
            .field("delay_throttle", &self.delay_throttle)
            .field("zoom_ceiling", &self.zoom_ceiling)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl PipelineOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            geocoder: if config.geocoder_enabled {
                GeocoderMode::Enabled
            } else {
                GeocoderMode::Disabled
            },
            explicit_center: None,
            default_center: config.default_center,
            marker_clusterer_options: Value::Object(Default::default()),
            info_window_options: Value::Object(Default::default()),
            delay_base: config.delay_base(),
            delay_throttle: config.delay_throttle(),
            max_throttle_retries: config.max_throttle_retries,
            zoom_ceiling: config.zoom_ceiling,
            dedup_max_iterations: config.dedup_max_iterations,
            listeners: Vec::new(),
        }
    }

    /// The explicit center doubles as the landing spot for entries that
    /// cannot be geocoded at all.
    pub fn fallback_center(&self) -> Position {
        self.explicit_center.unwrap_or(self.default_center)
    }

    /// The throttle interval is raised above the base delay so a throttled
    /// retry always waits longer than a normal request.
    fn queue_settings(&self) -> QueueSettings {
        let floor = self.delay_base.saturating_add(Duration::from_millis(1));
        QueueSettings {
            delay_base: self.delay_base,
            delay_throttle: self.delay_throttle.max(floor),
            max_throttle_retries: self.max_throttle_retries,
            fallback_center: self.fallback_center(),
            dedup: PositionDeduplicator::new(self.dedup_max_iterations),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub total_entries: usize,
    pub placed: Vec<PlacedMarker>,
    pub issues: Vec<PlacementIssue>,
    pub final_view: FinalView,
    pub cancelled: bool,
}

impl PipelineReport {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(PlacementIssue::is_error)
    }
}

pub type CompletionCallback = Box<dyn FnOnce(&PipelineReport) + Send>;

/// One bulk placement run. Built per invocation with its own provider, map
/// and options; consumed by [`MarkerPipeline::start`].
pub struct MarkerPipeline {
    options: PipelineOptions,
    provider: Option<Arc<dyn GeocodingProvider>>,
    map: Arc<dyn MapRenderer>,
    clusters: Arc<dyn ClusterSink>,
    telemetry: Option<TelemetryClient>,
    observer: Option<ProgressObserver>,
    on_complete: Option<CompletionCallback>,
    cancel: CancellationToken,
}

impl MarkerPipeline {
    pub fn new(
        options: PipelineOptions,
        provider: Option<Arc<dyn GeocodingProvider>>,
        map: Arc<dyn MapRenderer>,
        clusters: Arc<dyn ClusterSink>,
    ) -> Self {
        Self {
            options,
            provider,
            map,
            clusters,
            telemetry: None,
            observer: None,
            on_complete: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryClient) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn on_complete(
        mut self,
        callback: impl FnOnce(&PipelineReport) + Send + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Cancelling the returned token stops the run at the next scheduling
    /// boundary, cutting short any pending delay. The viewport is still
    /// finalized over what was placed.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn start(self, entries: Vec<AddressEntry>) -> PipelineReport {
        let Self {
            options,
            provider,
            map,
            clusters,
            telemetry,
            observer,
            on_complete,
            cancel,
        } = self;

        map.prepare(&RenderSetup {
            marker_clusterer_options: options.marker_clusterer_options.clone(),
            info_window_options: options.info_window_options.clone(),
        });
        for registration in &options.listeners {
            map.add_listener(registration);
        }

        let provider = match options.geocoder {
            GeocoderMode::Enabled => provider,
            GeocoderMode::Disabled => None,
        };
        let total_entries = entries.len();
        info!(
            total_entries,
            geocoder = provider.is_some(),
            "starting marker placement"
        );

        let outcome = GeocodeQueue::new(
            entries,
            options.queue_settings(),
            provider,
            Arc::clone(&map),
            clusters,
        )
        .with_telemetry(telemetry.clone())
        .with_observer(observer)
        .run(&cancel)
        .await;

        let policy = CompletionPolicy::new(
            options.explicit_center,
            options.default_center,
            options.zoom_ceiling,
        );
        let final_view = policy.finalize(outcome.bounds, map.as_ref()).await;

        let report = PipelineReport {
            total_entries,
            placed: outcome.placed,
            issues: outcome.issues,
            final_view,
            cancelled: outcome.cancelled,
        };
        info!(
            placed = report.placed.len(),
            issues = report.issues.len(),
            cancelled = report.cancelled,
            "marker placement complete"
        );

        if let Some(telemetry) = &telemetry {
            let recorded = telemetry
                .record(
                    "pipeline_complete",
                    json!({
                        "total_entries": report.total_entries,
                        "placed": report.placed.len(),
                        "issues": report.issues.len(),
                        "cancelled": report.cancelled,
                    }),
                )
                .and_then(|_| telemetry.flush());
            if let Err(err) = recorded {
                warn!(?err, "failed to flush pipeline telemetry");
            }
        }

        if let Some(callback) = on_complete {
            callback(&report);
        }
        report
    }
}

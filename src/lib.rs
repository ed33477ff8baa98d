mod completion;
mod config;
mod dedup;
mod entries;
mod errors;
mod geo;
mod geocoder;
mod pipeline;
mod queue;
mod render;
mod telemetry;

#[cfg(test)]
mod test_support;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use completion::{CompletionPolicy, FinalView};
pub use config::{PipelineConfig, PublicPipelineConfig};
pub use dedup::{PositionDeduplicator, Resolution};
pub use entries::{load_entries, parse_csv, parse_json, AddressEntry};
pub use errors::{AppError, AppResult};
pub use geo::{Bounds, BoundsAccumulator, Position};
pub use geocoder::{
    provider_from_config, GeocodeResult, GeocodeStatus, GeocodingProvider, HttpGeocoder,
};
pub use pipeline::{
    CompletionCallback, GeocoderMode, MarkerPipeline, PipelineOptions, PipelineReport,
};
pub use queue::{
    GeocodeQueue, PlacedMarker, PlacementIssue, ProgressObserver, QueueOutcome, QueueProgress,
    QueueSettings, QueueState,
};
pub use render::{
    ClusterSink, EventHandler, EventSource, HeadlessMap, ListenerRegistration, MapEvent,
    MapRenderer, MapState, MarkerHandle, RenderSetup, RenderedMarker,
};
pub use telemetry::{TelemetryClient, TelemetryEvent};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,map_marker_pipeline=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use map_marker_pipeline::{
    init_tracing, load_entries, provider_from_config, HeadlessMap, MarkerPipeline,
    PipelineConfig, PipelineOptions, Position, ProgressObserver, QueueProgress, TelemetryClient,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "map-marker-pipeline")]
#[command(about = "Geocode an address list and place markers on a headless map", long_about = None)]
struct Args {
    /// Address list (.csv with a country,address,html_content,icon header, or .json)
    entries: PathBuf,

    /// Explicit map center as `lat,lng`; overrides the bounds fit
    #[arg(value_parser = parse_center)]
    center: Option<Position>,
}

fn parse_center(value: &str) -> Result<Position, String> {
    Position::parse_literal(value).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = PipelineConfig::from_env();
    info!(config = ?config.public_profile(), "loaded configuration");

    let entries = load_entries(&args.entries)
        .with_context(|| format!("failed to read {}", args.entries.display()))?;
    let provider = provider_from_config(&config)?;
    let map = Arc::new(HeadlessMap::default());
    let options = PipelineOptions {
        explicit_center: args.center,
        ..PipelineOptions::from_config(&config)
    };

    let progress: ProgressObserver = Arc::new(|progress: QueueProgress| {
        info!(
            processed = progress.processed,
            total = progress.total,
            placed = progress.placed,
            "progress"
        );
    });
    let mut pipeline = MarkerPipeline::new(options, provider, map.clone(), map.clone())
        .with_progress(progress)
        .on_complete(|report| info!(placed = report.placed.len(), "markers loaded"));

    let data_dir = std::env::temp_dir().join("map-marker-pipeline");
    match TelemetryClient::new(&data_dir, &config) {
        Ok(telemetry) => pipeline = pipeline.with_telemetry(telemetry),
        Err(err) => warn!(?err, "telemetry unavailable"),
    }

    let report = pipeline.start(entries).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, warn};

use crate::dedup::DEFAULT_MAX_ITERATIONS;
use crate::geo::Position;

pub const DEFAULT_GEOCODING_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";
pub const DEFAULT_DELAY_BASE_MS: u64 = 300;
pub const DEFAULT_DELAY_THROTTLE_MS: u64 = 2_000;
pub const DEFAULT_ZOOM_CEILING: u8 = 17;
pub const DEFAULT_CENTER: Position = Position::new(53.666464, -2.686693);
const DEFAULT_TELEMETRY_BUFFER_MAX_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub geocoder_enabled: bool,
    pub google_geocoding_api_key: Option<SecretString>,
    pub geocoding_endpoint: String,
    pub delay_base_ms: u64,
    pub delay_throttle_ms: u64,
    /// Unset means a throttled entry is retried until it resolves.
    pub max_throttle_retries: Option<u32>,
    pub zoom_ceiling: u8,
    pub default_center: Position,
    pub dedup_max_iterations: u32,
    pub telemetry_enabled: bool,
    pub telemetry_buffer_max_bytes: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicPipelineConfig {
    pub geocoder_enabled: bool,
    pub has_google_geocoding_key: bool,
    pub geocoding_endpoint: String,
    pub delay_base_ms: u64,
    pub delay_throttle_ms: u64,
    pub max_throttle_retries: Option<u32>,
    pub zoom_ceiling: u8,
    pub default_center: Position,
    pub dedup_max_iterations: u32,
    pub telemetry_enabled: bool,
    pub telemetry_buffer_max_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            geocoder_enabled: true,
            google_geocoding_api_key: None,
            geocoding_endpoint: DEFAULT_GEOCODING_ENDPOINT.to_string(),
            delay_base_ms: DEFAULT_DELAY_BASE_MS,
            delay_throttle_ms: DEFAULT_DELAY_THROTTLE_MS,
            max_throttle_retries: None,
            zoom_ceiling: DEFAULT_ZOOM_CEILING,
            default_center: DEFAULT_CENTER,
            dedup_max_iterations: DEFAULT_MAX_ITERATIONS,
            telemetry_enabled: true,
            telemetry_buffer_max_bytes: DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let delay_base_ms = parse_u64("GEOCODE_DELAY_BASE_MS", DEFAULT_DELAY_BASE_MS);
        Self {
            geocoder_enabled: parse_bool("GEOCODER_ENABLED", true),
            google_geocoding_api_key: env::var("GOOGLE_GEOCODING_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            geocoding_endpoint: env::var("GEOCODING_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEOCODING_ENDPOINT.to_string()),
            delay_base_ms,
            // The throttle interval must stay above the base delay.
            delay_throttle_ms: parse_u64("GEOCODE_DELAY_THROTTLE_MS", DEFAULT_DELAY_THROTTLE_MS)
                .max(delay_base_ms.saturating_add(1)),
            max_throttle_retries: env::var("GEOCODE_MAX_THROTTLE_RETRIES")
                .ok()
                .and_then(|v| v.trim().parse::<u32>().ok()),
            zoom_ceiling: parse_u8("MAP_ZOOM_CEILING", DEFAULT_ZOOM_CEILING),
            default_center: parse_position("MAP_DEFAULT_CENTER", DEFAULT_CENTER),
            dedup_max_iterations: parse_u32("DEDUP_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS),
            telemetry_enabled: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_buffer_max_bytes: parse_u64(
                "TELEMETRY_BUFFER_MAX_BYTES",
                DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
            ),
        }
    }

    pub fn delay_base(&self) -> Duration {
        Duration::from_millis(self.delay_base_ms)
    }

    pub fn delay_throttle(&self) -> Duration {
        Duration::from_millis(self.delay_throttle_ms)
    }

    pub fn public_profile(&self) -> PublicPipelineConfig {
        PublicPipelineConfig {
            geocoder_enabled: self.geocoder_enabled,
            has_google_geocoding_key: self.google_geocoding_api_key.is_some(),
            geocoding_endpoint: self.geocoding_endpoint.clone(),
            delay_base_ms: self.delay_base_ms,
            delay_throttle_ms: self.delay_throttle_ms,
            max_throttle_retries: self.max_throttle_retries,
            zoom_ceiling: self.zoom_ceiling,
            default_center: self.default_center,
            dedup_max_iterations: self.dedup_max_iterations,
            telemetry_enabled: self.telemetry_enabled,
            telemetry_buffer_max_bytes: self.telemetry_buffer_max_bytes,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_u8(key: &str, default: u8) -> u8 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u8>().ok())
        .unwrap_or(default)
}

fn parse_position(key: &str, default: Position) -> Position {
    let Ok(value) = env::var(key) else {
        return default;
    };
    match Position::parse_literal(&value) {
        Ok(position) => position,
        Err(err) => {
            warn!(?err, key, "ignoring invalid coordinate in environment");
            default
        }
    }
}

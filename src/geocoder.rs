use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::errors::{AppError, AppResult};
use crate::geo::Position;

const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeocodeStatus {
    Ok,
    OverQueryLimit,
    ZeroResults,
    Error,
}

impl GeocodeStatus {
    /// Maps the provider's textual status. Anything that is not one of the
    /// three recognised outcomes is treated as an error.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "OK" => Self::Ok,
            "OVER_QUERY_LIMIT" => Self::OverQueryLimit,
            "ZERO_RESULTS" => Self::ZeroResults,
            _ => Self::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeocodeResult {
    pub status: GeocodeStatus,
    pub location: Option<Position>,
}

impl GeocodeResult {
    pub fn found(location: Position) -> Self {
        Self {
            status: GeocodeStatus::Ok,
            location: Some(location),
        }
    }

    pub fn with_status(status: GeocodeStatus) -> Self {
        Self {
            status,
            location: None,
        }
    }
}

#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    async fn geocode(&self, address: &str) -> AppResult<GeocodeResult>;
}

/// Builds the configured provider, or `None` when geocoding is switched off
/// and addresses should be read as literal coordinates.
pub fn provider_from_config(
    config: &PipelineConfig,
) -> AppResult<Option<Arc<dyn GeocodingProvider>>> {
    if !config.geocoder_enabled {
        return Ok(None);
    }
    let Some(api_key) = config.google_geocoding_api_key.clone() else {
        warn!("geocoder enabled but no API key configured; using literal coordinates");
        return Ok(None);
    };
    let client = HttpGeocoder::new(&config.geocoding_endpoint, api_key)?;
    Ok(Some(Arc::new(client)))
}

pub struct HttpGeocoder {
    http: Client,
    endpoint: Url,
    api_key: SecretString,
}

impl HttpGeocoder {
    pub fn new(endpoint: &str, api_key: SecretString) -> AppResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| AppError::Config(format!("invalid geocoding endpoint: {err}")))?;
        let http = Client::builder()
            .user_agent(concat!("map-marker-pipeline/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl GeocodingProvider for HttpGeocoder {
    async fn geocode(&self, address: &str) -> AppResult<GeocodeResult> {
        #[derive(Deserialize)]
        struct Response {
            status: String,
            #[serde(default)]
            results: Vec<ResponseResult>,
            error_message: Option<String>,
        }

        #[derive(Deserialize)]
        struct ResponseResult {
            geometry: ResponseGeometry,
        }

        #[derive(Deserialize)]
        struct ResponseGeometry {
            location: ResponseLocation,
        }

        #[derive(Deserialize)]
        struct ResponseLocation {
            lat: f64,
            lng: f64,
        }

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("address", address)
            .append_pair("key", self.api_key.expose_secret());

        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Ok(GeocodeResult::with_status(GeocodeStatus::OverQueryLimit));
        }
        let parsed: Response = response.error_for_status()?.json().await?;

        let status = GeocodeStatus::from_wire(&parsed.status);
        debug!(address, status = %parsed.status, "geocode response");
        match status {
            GeocodeStatus::Ok => {
                let Some(first) = parsed.results.into_iter().next() else {
                    return Ok(GeocodeResult::with_status(GeocodeStatus::ZeroResults));
                };
                let location = first.geometry.location;
                Ok(GeocodeResult::found(Position::new(location.lat, location.lng)))
            }
            GeocodeStatus::Error => {
                warn!(
                    status = %parsed.status,
                    message = parsed.error_message.as_deref().unwrap_or(""),
                    "geocoding provider rejected request"
                );
                Ok(GeocodeResult::with_status(status))
            }
            _ => Ok(GeocodeResult::with_status(status)),
        }
    }
}

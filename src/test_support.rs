use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{AppError, AppResult};
use crate::geocoder::{GeocodeResult, GeocodeStatus, GeocodingProvider};
use crate::geo::Position;

/// Replays queued responses in order, then answers `OK` at a position
/// derived from the number of calls made so far.
pub struct ScriptedGeocoder {
    responses: Mutex<VecDeque<AppResult<GeocodeResult>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGeocoder {
    pub fn new(responses: Vec<AppResult<GeocodeResult>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn statuses(statuses: &[GeocodeStatus]) -> Self {
        Self::new(
            statuses
                .iter()
                .map(|status| Ok(GeocodeResult::with_status(*status)))
                .collect(),
        )
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GeocodingProvider for ScriptedGeocoder {
    async fn geocode(&self, address: &str) -> AppResult<GeocodeResult> {
        let call_index = {
            let mut calls = self.calls.lock();
            calls.push(address.to_string());
            calls.len()
        };
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Ok(GeocodeResult::found(Position::new(
                call_index as f64,
                call_index as f64,
            )))
        })
    }
}

pub fn transport_error() -> AppResult<GeocodeResult> {
    Err(AppError::Config("connection reset".into()))
}

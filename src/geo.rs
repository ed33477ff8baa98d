use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Parses a literal `"lat,lng"` pair, as used when no geocoder is
    /// available. A single space after the comma is accepted.
    pub fn parse_literal(text: &str) -> AppResult<Self> {
        let malformed = || AppError::MalformedCoordinate(text.to_string());
        let (lat, lng) = text.split_once(',').ok_or_else(malformed)?;
        let lat = lat.trim().parse::<f64>().map_err(|_| malformed())?;
        let lng = lng.trim().parse::<f64>().map_err(|_| malformed())?;

        let position = Self::new(lat, lng);
        if !position.is_valid() {
            return Err(malformed());
        }
        Ok(position)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub south_west: Position,
    pub north_east: Position,
}

impl Bounds {
    pub fn contains(&self, position: Position) -> bool {
        (self.south_west.lat..=self.north_east.lat).contains(&position.lat)
            && (self.south_west.lng..=self.north_east.lng).contains(&position.lng)
    }

    pub fn center(&self) -> Position {
        Position::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }
}

/// Running viewport over every placed position. Positions are never removed.
#[derive(Debug, Default, Clone)]
pub struct BoundsAccumulator {
    bounds: Option<Bounds>,
}

impl BoundsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, position: Position) {
        self.bounds = Some(match self.bounds {
            None => Bounds {
                south_west: position,
                north_east: position,
            },
            Some(current) => Bounds {
                south_west: Position::new(
                    current.south_west.lat.min(position.lat),
                    current.south_west.lng.min(position.lng),
                ),
                north_east: Position::new(
                    current.north_east.lat.max(position.lat),
                    current.north_east.lng.max(position.lng),
                ),
            },
        });
    }

    /// `None` until the first position is extended.
    pub fn snapshot(&self) -> Option<Bounds> {
        self.bounds
    }
}

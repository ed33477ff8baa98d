use serde::Serialize;

use crate::geo::Position;

const METERS_PER_DEGREE: f64 = 111_111.0;
const DEFAULT_STEP_METERS: f64 = 5.0;
const LATITUDE_NUDGE: f64 = 0.00001;
// Keeps the longitude step non-zero near the poles.
const MIN_COS_LATITUDE: f64 = 0.01;
pub const DEFAULT_MAX_ITERATIONS: u32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub origin: Position,
    pub position: Position,
    pub iterations: u32,
    /// Set when the iteration ceiling was hit and `position` may still
    /// collide with an existing marker.
    pub degraded: bool,
}

impl Resolution {
    pub fn displaced(&self) -> bool {
        self.origin != self.position
    }
}

/// Moves colliding positions sideways until they no longer overlap an
/// already placed marker.
///
/// Only the longitude walks: each attempt steps further out from the
/// original candidate, alternating west and east, while the latitude is
/// nudged by a fixed amount so displaced markers sit just above the
/// original.
#[derive(Debug, Clone)]
pub struct PositionDeduplicator {
    step_meters: f64,
    latitude_nudge: f64,
    max_iterations: u32,
}

impl Default for PositionDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl PositionDeduplicator {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            step_meters: DEFAULT_STEP_METERS,
            latitude_nudge: LATITUDE_NUDGE,
            max_iterations,
        }
    }

    pub fn resolve(&self, candidate: Position, existing: &[Position]) -> Resolution {
        if !existing.contains(&candidate) {
            return Resolution {
                origin: candidate,
                position: candidate,
                iterations: 0,
                degraded: false,
            };
        }

        let step = self.step_degrees(candidate.lat);
        let lat = (candidate.lat + self.latitude_nudge).min(90.0);
        let mut sign = -1.0;
        let mut position = candidate;
        for iteration in 1..=self.max_iterations {
            position = Position::new(lat, candidate.lng + sign * step * f64::from(iteration));
            if !existing.contains(&position) {
                return Resolution {
                    origin: candidate,
                    position,
                    iterations: iteration,
                    degraded: false,
                };
            }
            sign = -sign;
        }

        Resolution {
            origin: candidate,
            position,
            iterations: self.max_iterations,
            degraded: true,
        }
    }

    fn step_degrees(&self, latitude: f64) -> f64 {
        let scale = latitude.to_radians().cos().abs().max(MIN_COS_LATITUDE);
        scale / METERS_PER_DEGREE * self.step_meters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_unique_positions_untouched() {
        let dedup = PositionDeduplicator::default();
        let p = Position::new(53.666464, -2.686693);

        let resolved = dedup.resolve(p, &[]);
        assert_eq!(resolved.position, p);
        assert!(!resolved.displaced());

        let resolved = dedup.resolve(p, &[Position::new(1.0, 1.0)]);
        assert_eq!(resolved.position, p);
        assert_eq!(resolved.iterations, 0);
    }

    #[test]
    fn shifts_longitude_on_collision() {
        let dedup = PositionDeduplicator::default();
        let p = Position::new(40.0, -73.0);

        let resolved = dedup.resolve(p, &[p]);
        assert!(resolved.displaced());
        assert!(!resolved.degraded);
        assert_eq!(resolved.iterations, 1);
        assert_eq!(resolved.position.lat, 40.0 + LATITUDE_NUDGE);
        assert!(resolved.position.lng < p.lng);
    }

    #[test]
    fn many_identical_inputs_terminate_with_distinct_outputs() {
        let dedup = PositionDeduplicator::default();
        let p = Position::new(0.0, 0.0);
        let mut placed: Vec<Position> = Vec::new();

        for _ in 0..500 {
            let resolved = dedup.resolve(p, &placed);
            assert!(!resolved.degraded);
            placed.push(resolved.position);
        }

        for (i, a) in placed.iter().enumerate() {
            for b in &placed[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn polar_latitudes_still_move() {
        let dedup = PositionDeduplicator::default();
        let pole = Position::new(90.0, 0.0);

        let resolved = dedup.resolve(pole, &[pole]);
        assert!(!resolved.degraded);
        assert_ne!(resolved.position, pole);
    }

    #[test]
    fn reports_degraded_placement_when_ceiling_is_hit() {
        let p = Position::new(12.0, 34.0);
        let first = PositionDeduplicator::new(1).resolve(p, &[p]);

        let resolved = PositionDeduplicator::new(1).resolve(p, &[p, first.position]);
        assert!(resolved.degraded);
        assert_eq!(resolved.iterations, 1);
        assert_eq!(resolved.position, first.position);

        let none = PositionDeduplicator::new(0).resolve(p, &[p]);
        assert!(none.degraded);
        assert_eq!(none.position, p);
    }
}

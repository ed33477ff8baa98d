use serde::Serialize;
use tracing::debug;

use crate::geo::{Bounds, Position};
use crate::render::MapRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalView {
    ExplicitCenter { center: Position },
    FittedBounds { bounds: Bounds, zoom: u8, clamped: bool },
    DefaultCenter { center: Position },
}

/// Chooses the viewport once every entry has been placed.
#[derive(Debug, Clone)]
pub struct CompletionPolicy {
    explicit_center: Option<Position>,
    default_center: Position,
    zoom_ceiling: u8,
}

impl CompletionPolicy {
    pub fn new(
        explicit_center: Option<Position>,
        default_center: Position,
        zoom_ceiling: u8,
    ) -> Self {
        Self {
            explicit_center,
            default_center,
            zoom_ceiling,
        }
    }

    pub async fn finalize(&self, bounds: Option<Bounds>, map: &dyn MapRenderer) -> FinalView {
        if let Some(center) = self.explicit_center {
            map.set_center(center);
            return FinalView::ExplicitCenter { center };
        }

        // Nothing was placed, so there is nothing to fit.
        let Some(bounds) = bounds else {
            map.set_center(self.default_center);
            return FinalView::DefaultCenter {
                center: self.default_center,
            };
        };

        map.fit_to_bounds(bounds).await;
        let fitted = map.zoom();
        let clamped = fitted > self.zoom_ceiling;
        if clamped {
            debug!(fitted, ceiling = self.zoom_ceiling, "clamping zoom after fit");
            map.set_zoom(self.zoom_ceiling);
        }
        FinalView::FittedBounds {
            bounds,
            zoom: fitted.min(self.zoom_ceiling),
            clamped,
        }
    }
}

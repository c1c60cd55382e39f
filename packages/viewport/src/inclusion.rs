//! Per-parcel inclusion tests for a viewport.

use parcel_map_config::ViewportConfig;
use parcel_map_geometry::any_vertex_within;
use parcel_map_parcel_models::{BoundingBox, Parcel};
use strum_macros::{AsRefStr, Display};

/// How parcels are tested against a viewport rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum InclusionStrategy {
    /// Small viewports: any vertex inside the rectangle, or the parcel
    /// envelope overlapping it. Catches slivers a centroid test misses.
    Exact,
    /// Large viewports: centroid inside the rectangle grown by a buffer.
    Centroid {
        /// Slack in degrees added on every side.
        buffer: f64,
    },
}

impl InclusionStrategy {
    /// Picks the strategy for a viewport: exact when either side is
    /// narrower than the small-viewport threshold.
    #[must_use]
    pub fn for_bbox(bbox: &BoundingBox, config: &ViewportConfig) -> Self {
        if bbox.width() < config.small_viewport_degrees
            || bbox.height() < config.small_viewport_degrees
        {
            Self::Exact
        } else {
            Self::Centroid {
                buffer: config.centroid_buffer_degrees,
            }
        }
    }

    /// Whether `parcel` belongs in a viewport over `bbox`.
    #[must_use]
    pub fn includes(&self, bbox: &BoundingBox, parcel: &Parcel) -> bool {
        match self {
            Self::Exact => {
                any_vertex_within(&parcel.geometry, bbox)
                    || (parcel.bbox.is_well_formed() && parcel.bbox.intersects(bbox))
            }
            Self::Centroid { buffer } => bbox.expand(*buffer).contains(parcel.centroid),
        }
    }
}

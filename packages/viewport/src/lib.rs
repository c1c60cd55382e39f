#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Viewport query engine.
//!
//! [`ParcelStore`] is the read-side facade over a chunked data directory:
//! `get(id)`, `count()`, and `viewport(bbox, limit)`. A viewport query asks
//! the chunk index for candidate chunks, loads them in index order, and
//! filters parcels with an [`InclusionStrategy`] chosen by viewport size
//! and an optional [`ViewportFilter`] over parcel attributes, stopping as
//! soon as `limit` parcels have passed both.

pub mod filter;
pub mod inclusion;
pub mod store;

use parcel_map_chunks::ChunkError;
use parcel_map_parcel_models::BoundingBox;

pub use filter::ViewportFilter;
pub use inclusion::InclusionStrategy;
pub use store::{ParcelStore, ViewportResult};

/// Errors from parcel store queries.
#[derive(Debug, thiserror::Error)]
pub enum ViewportError {
    /// The caller passed a bad bounding box or limit.
    #[error("Invalid query: {message}")]
    InvalidQuery {
        /// What is wrong with the query.
        message: String,
    },

    /// A whole-dataset load found features it could not parse. Passes that
    /// republish the store refuse to run rather than drop them.
    #[error("{features} malformed feature(s) in {chunks} chunk(s) would be lost on republish")]
    MalformedFeatures {
        /// Chunks with at least one malformed feature.
        chunks: usize,
        /// Malformed features across those chunks.
        features: usize,
    },

    /// The store could not be opened or reloaded.
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

impl ViewportError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }
}

/// Parses `"west,south,east,north"`.
///
/// # Errors
///
/// Returns [`ViewportError::InvalidQuery`] unless there are exactly four
/// numeric parts forming a valid, non-degenerate rectangle.
pub fn parse_bbox(s: &str) -> Result<BoundingBox, ViewportError> {
    let parts = s
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<f64>()
                .map_err(|_| ViewportError::invalid(format!("non-numeric bbox value {p:?}")))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let [west, south, east, north] = parts[..] else {
        return Err(ViewportError::invalid(format!(
            "bbox needs 4 values (west,south,east,north), got {}",
            parts.len()
        )));
    };

    let bbox = BoundingBox::new(west, south, east, north);
    validate_bbox(&bbox)?;
    Ok(bbox)
}

/// Rejects non-finite, out-of-range, inverted, and zero-area rectangles.
///
/// # Errors
///
/// Returns [`ViewportError::InvalidQuery`] describing the first problem.
pub fn validate_bbox(bbox: &BoundingBox) -> Result<(), ViewportError> {
    let values = [bbox.west, bbox.south, bbox.east, bbox.north];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ViewportError::invalid("bbox values must be finite"));
    }
    if !(-180.0..=180.0).contains(&bbox.west)
        || !(-180.0..=180.0).contains(&bbox.east)
        || !(-90.0..=90.0).contains(&bbox.south)
        || !(-90.0..=90.0).contains(&bbox.north)
    {
        return Err(ViewportError::invalid(format!(
            "bbox {bbox:?} is outside the geographic range"
        )));
    }
    if bbox.west >= bbox.east || bbox.south >= bbox.north {
        return Err(ViewportError::invalid(format!(
            "bbox {bbox:?} is empty or inverted"
        )));
    }
    Ok(())
}

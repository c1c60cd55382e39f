#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial join / enrichment engine.
//!
//! Backfills missing parcel site addresses from an independent address
//! point dataset. [`matcher::Matcher`] decides which point (if any) belongs
//! to a parcel; [`pass::EnrichmentPass`] drives the matcher over a whole
//! parcel set in throttled batches against an [`AddressPointSource`],
//! tolerating failed batches.

pub mod matcher;
pub mod pass;
pub mod points;
pub mod throttle;

use async_trait::async_trait;
use parcel_map_parcel_models::{AddressPoint, BoundingBox};

pub use matcher::Matcher;
pub use pass::{EnrichmentPass, EnrichmentReport};
pub use points::AddressPointIndex;
pub use throttle::Throttle;

/// Errors from the enrichment engine.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    /// The address point source failed to answer a lookup. Transient:
    /// the batch is skipped and the pass continues.
    #[error("Address source {source_name} unavailable: {message}")]
    EnrichmentSourceUnavailable {
        /// Name of the source.
        source_name: String,
        /// What went wrong.
        message: String,
    },

    /// The parcel already has a site address; enrichment never
    /// overwrites one.
    #[error("Parcel {parcel_id} already has a site address")]
    TargetAlreadyPopulated {
        /// Parcel identifier.
        parcel_id: String,
    },

    /// An address point file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// An address point file is not usable `GeoJSON`.
    #[error("Invalid address point source {path}: {message}")]
    InvalidSource {
        /// File path.
        path: String,
        /// What is wrong with it.
        message: String,
    },
}

/// A dataset of address points that can be queried by rectangle.
#[async_trait]
pub trait AddressPointSource: Send + Sync {
    /// Human-readable source name for logs and errors.
    fn name(&self) -> &str;

    /// Every point inside `bbox`, in the dataset's own order.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichmentError::EnrichmentSourceUnavailable`] if the
    /// lookup fails.
    async fn points_within(&self, bbox: &BoundingBox) -> Result<Vec<AddressPoint>, EnrichmentError>;
}

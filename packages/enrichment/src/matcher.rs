//! Matching a single parcel against candidate address points.

use parcel_map_config::ScoringConfig;
use parcel_map_geometry::contains_point;
use parcel_map_parcel_models::{AddressPoint, Enrichment, Parcel, ParcelGeometry};

use crate::EnrichmentError;

/// Picks the address point that belongs to a parcel.
///
/// Polygon parcels match by containment: the first candidate inside the
/// polygon (boundary included) wins, so callers wanting determinism pass
/// candidates in a stable order. Point parcels match by proximity: the
/// strictly nearest candidate within `tolerance` degrees wins, and ties
/// keep the earlier candidate.
#[derive(Debug, Clone)]
pub struct Matcher {
    tolerance: f64,
    scoring: ScoringConfig,
}

impl Matcher {
    /// `tolerance` is the proximity radius in degrees.
    #[must_use]
    pub const fn new(tolerance: f64, scoring: ScoringConfig) -> Self {
        Self { tolerance, scoring }
    }

    /// Proximity radius in degrees.
    #[must_use]
    pub const fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// The matching candidate, if any, without touching the parcel.
    #[must_use]
    pub fn find<'a>(&self, parcel: &Parcel, candidates: &'a [AddressPoint]) -> Option<&'a AddressPoint> {
        match &parcel.geometry {
            ParcelGeometry::Polygon(_) => candidates.iter().find(|point| {
                parcel.bbox.contains(point.location)
                    && contains_point(&parcel.geometry, point.location)
            }),
            ParcelGeometry::Point(_) => {
                let mut best: Option<(f64, &AddressPoint)> = None;
                for point in candidates {
                    let distance = parcel.centroid.planar_distance(point.location);
                    if distance > self.tolerance {
                        continue;
                    }
                    if best.is_none_or(|(d, _)| distance < d) {
                        best = Some((distance, point));
                    }
                }
                best.map(|(_, point)| point)
            }
        }
    }

    /// Returns the parcel with its site address filled from the matching
    /// candidate and `stamp` recorded, or `None` when nothing matches.
    /// Derived attributes are recomputed since the site state feeds the
    /// absentee signal.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichmentError::TargetAlreadyPopulated`] if the parcel
    /// already has a site address.
    pub fn match_parcel(
        &self,
        parcel: &Parcel,
        candidates: &[AddressPoint],
        stamp: &Enrichment,
    ) -> Result<Option<Parcel>, EnrichmentError> {
        if parcel.attributes.has_site_address() {
            return Err(EnrichmentError::TargetAlreadyPopulated {
                parcel_id: parcel.id.clone(),
            });
        }

        let Some(point) = self.find(parcel, candidates) else {
            return Ok(None);
        };

        let mut enriched = parcel.clone();
        enriched.attributes.site = Some(point.to_site_address());
        enriched.attributes.enrichment = Some(stamp.clone());
        enriched.derived = parcel_map_scoring::derive(&enriched.attributes, &self.scoring);

        log::debug!("Parcel {}: matched address {}", parcel.id, point.address);

        Ok(Some(enriched))
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parcel geometry normalization and spatial summaries.
//!
//! Source geometries are converted to [`ParcelGeometry`] in WGS84 exactly
//! once, at load time. The cheap summaries every query relies on (the
//! vertex-mean centroid and the envelope) are computed here, along with
//! the two exact tests the rest of the system needs: point containment
//! and "any vertex inside a rectangle".

pub mod feature;
pub mod morton;
pub mod projection;

use geo::{BoundingRect, CoordsIter, Intersects, MapCoords};
use parcel_map_parcel_models::{BoundingBox, LngLat, ParcelGeometry};

use projection::{CoordinateSystem, from_web_mercator};

/// Errors raised while turning a source feature into a parcel.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// Geometry is missing, of an unsupported type, empty, or outside
    /// the valid geographic range after normalization.
    #[error("Malformed geometry for parcel {parcel_id}: {message}")]
    MalformedGeometry {
        /// Identifier of the offending feature.
        parcel_id: String,
        /// What is wrong with it.
        message: String,
    },

    /// The feature carries no usable parcel identifier.
    #[error("Feature has no parcel identifier")]
    MissingId,
}

impl GeometryError {
    fn malformed(parcel_id: &str, message: impl Into<String>) -> Self {
        Self::MalformedGeometry {
            parcel_id: parcel_id.to_string(),
            message: message.into(),
        }
    }
}

/// Converts a source geometry into WGS84 [`ParcelGeometry`].
///
/// `crs` is an explicit annotation when the source has one; otherwise the
/// coordinate magnitudes decide whether the inverse Web Mercator transform
/// is applied.
///
/// # Errors
///
/// Returns [`GeometryError::MalformedGeometry`] for unsupported geometry
/// types, empty rings, non-finite coordinates, or coordinates that are
/// still outside the geographic range after normalization.
pub fn normalize(
    parcel_id: &str,
    geometry: geo::Geometry<f64>,
    crs: Option<CoordinateSystem>,
) -> Result<ParcelGeometry, GeometryError> {
    if geometry
        .coords_iter()
        .any(|c| !c.x.is_finite() || !c.y.is_finite())
    {
        return Err(GeometryError::malformed(parcel_id, "non-finite coordinate"));
    }

    let system =
        crs.unwrap_or_else(|| CoordinateSystem::detect(geometry.coords_iter().map(|c| (c.x, c.y))));

    let geometry = match system {
        CoordinateSystem::Geographic => geometry,
        CoordinateSystem::WebMercator => geometry.map_coords(|c| {
            let p = from_web_mercator(c.x, c.y);
            geo::coord! { x: p.lng, y: p.lat }
        }),
    };

    let normalized = match geometry {
        geo::Geometry::Polygon(polygon) => ParcelGeometry::Polygon(geo::MultiPolygon(vec![polygon])),
        geo::Geometry::MultiPolygon(multi) => ParcelGeometry::Polygon(multi),
        geo::Geometry::Point(point) => ParcelGeometry::Point(point),
        other => {
            return Err(GeometryError::malformed(
                parcel_id,
                format!("unsupported geometry type {}", geometry_type_name(&other)),
            ));
        }
    };

    if let ParcelGeometry::Polygon(multi) = &normalized {
        if multi.0.is_empty() || multi.0.iter().any(|p| p.exterior().0.len() < 3) {
            return Err(GeometryError::malformed(
                parcel_id,
                "polygon has fewer than three vertices",
            ));
        }
    }

    if !coords(&normalized).all(|c| c.is_geographic()) {
        return Err(GeometryError::malformed(
            parcel_id,
            "coordinates outside the geographic range after normalization",
        ));
    }

    Ok(normalized)
}

const fn geometry_type_name(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

/// Iterates every vertex of the geometry, holes included.
pub fn coords(geometry: &ParcelGeometry) -> Box<dyn Iterator<Item = LngLat> + '_> {
    match geometry {
        ParcelGeometry::Polygon(multi) => {
            Box::new(multi.coords_iter().map(|c| LngLat::new(c.x, c.y)))
        }
        ParcelGeometry::Point(point) => Box::new(std::iter::once(LngLat::new(point.x(), point.y()))),
    }
}

/// Arithmetic mean of the outer ring vertices of every member polygon,
/// or the point itself.
///
/// This is deliberately not an area-weighted centroid. The closing vertex
/// of each ring is not double-counted.
#[must_use]
pub fn centroid(geometry: &ParcelGeometry) -> LngLat {
    match geometry {
        ParcelGeometry::Point(point) => LngLat::new(point.x(), point.y()),
        ParcelGeometry::Polygon(multi) => {
            let mut sum_lng = 0.0;
            let mut sum_lat = 0.0;
            let mut count = 0_u32;

            for polygon in &multi.0 {
                let ring = polygon.exterior();
                let vertices = if ring.is_closed() && ring.0.len() > 1 {
                    &ring.0[..ring.0.len() - 1]
                } else {
                    &ring.0[..]
                };
                for c in vertices {
                    sum_lng += c.x;
                    sum_lat += c.y;
                    count += 1;
                }
            }

            if count == 0 {
                return LngLat::new(f64::NAN, f64::NAN);
            }
            let n = f64::from(count);
            LngLat::new(sum_lng / n, sum_lat / n)
        }
    }
}

/// Envelope of the geometry.
#[must_use]
pub fn envelope(geometry: &ParcelGeometry) -> BoundingBox {
    match geometry {
        ParcelGeometry::Point(point) => BoundingBox::from_point(LngLat::new(point.x(), point.y())),
        ParcelGeometry::Polygon(multi) => multi.bounding_rect().map_or_else(
            || BoundingBox::new(f64::NAN, f64::NAN, f64::NAN, f64::NAN),
            |rect| BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y),
        ),
    }
}

/// Exact containment test. Points on a polygon boundary count as inside;
/// a point geometry contains only an identical point.
#[must_use]
pub fn contains_point(geometry: &ParcelGeometry, point: LngLat) -> bool {
    let target = geo::Point::new(point.lng, point.lat);
    match geometry {
        ParcelGeometry::Polygon(multi) => multi.intersects(&target),
        ParcelGeometry::Point(p) => *p == target,
    }
}

/// Returns `true` if any vertex of the geometry lies inside `bbox`.
#[must_use]
pub fn any_vertex_within(geometry: &ParcelGeometry, bbox: &BoundingBox) -> bool {
    coords(geometry).any(|c| bbox.contains(c))
}

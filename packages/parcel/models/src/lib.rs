#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parcel record types shared across the parcel map system.
//!
//! A [`Parcel`] pairs an immutable geometry (already normalized to WGS84)
//! with typed tabular attributes and the derived investment signals
//! computed from them. Everything here is plain data: no I/O, no scoring
//! logic, no geometry algorithms beyond the rectangle arithmetic that
//! every other crate needs.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A longitude/latitude pair in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    /// Longitude.
    pub lng: f64,
    /// Latitude.
    pub lat: f64,
}

impl LngLat {
    /// Creates a new coordinate pair.
    #[must_use]
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Returns `true` if both components are finite and inside the valid
    /// geographic range.
    #[must_use]
    pub fn is_geographic(self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }

    /// Euclidean distance in coordinate space (degrees).
    #[must_use]
    pub fn planar_distance(self, other: Self) -> f64 {
        (self.lng - other.lng).hypot(self.lat - other.lat)
    }
}

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// A zero-area box around a single point.
    #[must_use]
    pub const fn from_point(point: LngLat) -> Self {
        Self::new(point.lng, point.lat, point.lng, point.lat)
    }

    /// Smallest box covering every point, or `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = LngLat>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| {
            Some(acc.map_or_else(|| Self::from_point(p), |b: Self| b.extend_to(p)))
        })
    }

    /// Returns `true` if all four bounds are finite and the box is not
    /// inverted (zero width or height is allowed).
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.west.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.north.is_finite()
            && self.west <= self.east
            && self.south <= self.north
    }

    /// Width in degrees of longitude.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Height in degrees of latitude.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Standard rectangle-overlap test: two boxes intersect unless one is
    /// entirely to the left, right, above, or below the other. Touching
    /// edges count as intersecting.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        !(self.east < other.west
            || self.west > other.east
            || self.north < other.south
            || self.south > other.north)
    }

    /// Returns `true` if the point lies inside the box or on its edge.
    #[must_use]
    pub fn contains(&self, point: LngLat) -> bool {
        point.lng >= self.west
            && point.lng <= self.east
            && point.lat >= self.south
            && point.lat <= self.north
    }

    /// Grows the box by `buffer` degrees on every side.
    #[must_use]
    pub fn expand(&self, buffer: f64) -> Self {
        Self::new(
            self.west - buffer,
            self.south - buffer,
            self.east + buffer,
            self.north + buffer,
        )
    }

    /// Smallest box covering both `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(
            self.west.min(other.west),
            self.south.min(other.south),
            self.east.max(other.east),
            self.north.max(other.north),
        )
    }

    /// Smallest box covering both `self` and `point`.
    #[must_use]
    pub fn extend_to(&self, point: LngLat) -> Self {
        self.union(&Self::from_point(point))
    }
}

/// Parcel geometry after coordinate normalization.
///
/// Polygons are always held as a [`geo::MultiPolygon`] so single and
/// multi-part parcels go through the same code paths.
#[derive(Debug, Clone, PartialEq)]
pub enum ParcelGeometry {
    /// One or more polygons (outer ring plus optional holes each).
    Polygon(geo::MultiPolygon<f64>),
    /// A bare point, used when the source only has a location.
    Point(geo::Point<f64>),
}

impl ParcelGeometry {
    /// Returns `true` for polygonal geometry.
    #[must_use]
    pub const fn is_polygon(&self) -> bool {
        matches!(self, Self::Polygon(_))
    }
}

/// Street address of the parcel itself (as opposed to the owner's
/// mailing address).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteAddress {
    /// Street line (e.g., `"1100 CONGRESS AVE"`).
    pub address: String,
    /// City or postal community.
    pub city: Option<String>,
    /// Two-letter state abbreviation.
    pub state: Option<String>,
    /// Five-digit ZIP code.
    pub zip: Option<String>,
}

/// Provenance of a site address filled in by a spatial join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    /// When the address was written.
    pub enriched_at: DateTime<Utc>,
    /// Tag of the dataset that supplied it (e.g., `"ADDRESS_POINTS"`).
    pub source: String,
}

/// Raw tabular attributes of a parcel, validated and typed at load time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelAttributes {
    /// Owner of record.
    pub owner: Option<String>,
    /// Owner mailing address, usually `"STREET, CITY, ST ZIP"`.
    pub mailing_address: Option<String>,
    /// Owner mailing city when the source provides it separately.
    pub mailing_city: Option<String>,
    /// Site (situs) address. Absent until imported or enriched.
    pub site: Option<SiteAddress>,
    /// Assessed (taxable) value.
    pub assessed_value: Option<f64>,
    /// Appraised market value.
    pub market_value: Option<f64>,
    /// Land-only value.
    pub land_value: Option<f64>,
    /// Improvement (structure) value.
    pub improvement_value: Option<f64>,
    /// Lot size in acres.
    pub acres: Option<f64>,
    /// Tax amount billed for the year.
    pub total_tax: Option<f64>,
    /// Tax amount currently due.
    pub total_due: Option<f64>,
    /// Legal description from the appraisal roll.
    pub legal_description: Option<String>,
    /// Year the primary structure was built.
    pub year_built: Option<i32>,
    /// Assessor state classification code (e.g., `"A1"`, `"F1"`).
    pub state_code: Option<String>,
    /// Set when [`Self::site`] was filled by enrichment.
    pub enrichment: Option<Enrichment>,
}

impl ParcelAttributes {
    /// Returns `true` if a non-blank site address is present.
    #[must_use]
    pub fn has_site_address(&self) -> bool {
        self.site
            .as_ref()
            .is_some_and(|site| !site.address.trim().is_empty())
    }
}

/// Broad property use classification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PropertyType {
    /// No improvements on the lot
    VacantLand,
    /// Single-family and other default improved residential use
    Residential,
    /// Apartments, duplexes, and other multi-unit residential
    MultiFamily,
    /// Condominium units
    Condo,
    /// Retail, office, and other commercial use
    Commercial,
    /// Industrial and warehouse use
    Industrial,
    /// Mixed commercial/residential use
    MixedUse,
    /// Farm and ranch land
    Agricultural,
    /// Mobile or manufactured homes
    MobileHome,
    /// Utilities, exempt, and other special-purpose property
    SpecialPurpose,
}

impl PropertyType {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::VacantLand,
            Self::Residential,
            Self::MultiFamily,
            Self::Condo,
            Self::Commercial,
            Self::Industrial,
            Self::MixedUse,
            Self::Agricultural,
            Self::MobileHome,
            Self::SpecialPurpose,
        ]
    }
}

/// An investment-relevance signal attached to a parcel.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OpportunityTag {
    /// Tax due exceeds tax billed
    TaxDelinquent,
    /// Owner mails from outside the parcel's jurisdiction
    AbsenteeOwner,
    /// No improvement value
    VacantLand,
    /// More than one acre
    LargeLot,
    /// Owned by an LLC, trust, corporation, or estate
    EntityOwned,
    /// Market value per acre below the undervaluation threshold
    PotentiallyUndervalued,
}

impl OpportunityTag {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::TaxDelinquent,
            Self::AbsenteeOwner,
            Self::VacantLand,
            Self::LargeLot,
            Self::EntityOwned,
            Self::PotentiallyUndervalued,
        ]
    }
}

/// Attributes computed from [`ParcelAttributes`]; never stored as truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedAttributes {
    /// Property use classification.
    pub property_type: PropertyType,
    /// Motivated-seller score, 0-100.
    pub motivation_score: u8,
    /// Every signal that evaluated true.
    pub opportunity_tags: BTreeSet<OpportunityTag>,
    /// No improvement value.
    pub is_vacant: bool,
    /// Owner mails from outside the home jurisdiction.
    pub is_absentee: bool,
    /// Tax due exceeds tax billed.
    pub is_tax_delinquent: bool,
}

/// A land parcel with normalized geometry and cached spatial summaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Parcel {
    /// Stable external parcel identifier, unique within a dataset.
    pub id: String,
    /// Geometry in WGS84. Immutable once loaded.
    pub geometry: ParcelGeometry,
    /// Mean of the outer ring vertices (or the point itself).
    pub centroid: LngLat,
    /// Envelope of the geometry.
    pub bbox: BoundingBox,
    /// Tabular attributes.
    pub attributes: ParcelAttributes,
    /// Derived signals, recomputed from [`Self::attributes`].
    pub derived: DerivedAttributes,
}

/// An address point from an external dataset, consumed by spatial joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressPoint {
    /// Point location in WGS84.
    pub location: LngLat,
    /// Full street line.
    pub address: String,
    /// Postal community.
    pub city: Option<String>,
    /// Five-digit ZIP code.
    pub zip: Option<String>,
    /// Two-letter state abbreviation.
    pub state: Option<String>,
}

impl AddressPoint {
    /// Converts this point into the [`SiteAddress`] it would fill in.
    #[must_use]
    pub fn to_site_address(&self) -> SiteAddress {
        SiteAddress {
            address: self.address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip: self.zip.clone(),
        }
    }
}

//! Web Mercator (EPSG:3857) projection and coordinate system detection.
//!
//! Parcel exports frequently arrive in Web Mercator meters instead of
//! WGS84 degrees. Detection prefers an explicit CRS annotation and falls
//! back to a magnitude check: geographic coordinates never exceed 180 in
//! absolute value, so anything beyond [`PROJECTED_MAGNITUDE`] must be
//! projected.

use std::f64::consts::PI;

use parcel_map_parcel_models::LngLat;

/// Half the Web Mercator world width in meters (`π × 6378137`).
pub const HALF_CIRCUMFERENCE_M: f64 = 20_037_508.34;

/// Coordinates with an absolute value above this are treated as
/// projected rather than geographic.
pub const PROJECTED_MAGNITUDE: f64 = 1000.0;

/// Coordinate reference system of a source geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSystem {
    /// WGS84 longitude/latitude degrees (EPSG:4326).
    Geographic,
    /// Spherical Web Mercator meters (EPSG:3857).
    WebMercator,
}

impl CoordinateSystem {
    /// Interprets a CRS annotation such as `"EPSG:3857"`, `3857`,
    /// `"urn:ogc:def:crs:OGC:1.3:CRS84"`, or a GeoJSON 2008 named CRS
    /// object. Returns `None` for anything unrecognized.
    #[must_use]
    pub fn from_annotation(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_u64().and_then(Self::from_srid),
            serde_json::Value::String(s) => Self::from_name(s),
            serde_json::Value::Object(obj) => obj
                .get("properties")
                .and_then(|p| p.get("name"))
                .or_else(|| obj.get("name"))
                .and_then(Self::from_annotation),
            _ => None,
        }
    }

    const fn from_srid(srid: u64) -> Option<Self> {
        match srid {
            4326 | 4269 => Some(Self::Geographic),
            3857 | 900_913 | 102_100 | 102_113 => Some(Self::WebMercator),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_uppercase();
        if upper.ends_with("CRS84") {
            return Some(Self::Geographic);
        }
        let digits: String = upper
            .rsplit(|c: char| !c.is_ascii_digit())
            .find(|part| !part.is_empty())?
            .to_string();
        digits.parse().ok().and_then(Self::from_srid)
    }

    /// Guesses the system from raw coordinate magnitudes.
    #[must_use]
    pub fn detect(coords: impl IntoIterator<Item = (f64, f64)>) -> Self {
        if coords
            .into_iter()
            .any(|(x, y)| x.abs() > PROJECTED_MAGNITUDE || y.abs() > PROJECTED_MAGNITUDE)
        {
            Self::WebMercator
        } else {
            Self::Geographic
        }
    }
}

/// Projects a WGS84 coordinate to Web Mercator meters.
#[must_use]
pub fn to_web_mercator(point: LngLat) -> (f64, f64) {
    let x = point.lng * HALF_CIRCUMFERENCE_M / 180.0;
    let y = ((90.0 + point.lat) * PI / 360.0).tan().ln() / (PI / 180.0);
    (x, y * HALF_CIRCUMFERENCE_M / 180.0)
}

/// Inverse-projects Web Mercator meters back to WGS84 degrees.
#[must_use]
pub fn from_web_mercator(x: f64, y: f64) -> LngLat {
    let lng = (x / HALF_CIRCUMFERENCE_M) * 180.0;
    let lat = (y / HALF_CIRCUMFERENCE_M) * 180.0;
    let lat = 180.0 / PI * (2.0 * (lat * PI / 180.0).exp().atan() - PI / 2.0);
    LngLat::new(lng, lat)
}

//! In-memory address point dataset backed by an R-tree.

use std::path::Path;

use async_trait::async_trait;
use geojson::{GeoJson, JsonObject, JsonValue};
use parcel_map_geometry::feature::collection_crs;
use parcel_map_geometry::normalize;
use parcel_map_parcel_models::{AddressPoint, BoundingBox, LngLat, ParcelGeometry};
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};

use crate::{AddressPointSource, EnrichmentError};

const ADDRESS_KEYS: &[&str] = &["Full_Addr", "FULL_ADDR", "fullAddress", "address"];
const CITY_KEYS: &[&str] = &["Post_Comm", "POST_COMM", "city"];
const ZIP_KEYS: &[&str] = &["Post_Code", "POST_CODE", "zip"];
const STATE_KEYS: &[&str] = &["State", "STATE", "state"];

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Counts from loading an address point file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Features in the file.
    pub features: usize,
    /// Points kept.
    pub loaded: usize,
    /// Features dropped for a missing address or unusable geometry.
    pub skipped: usize,
}

/// Address points with a spatial index for rectangle lookups.
///
/// Lookups return points in dataset order so that "first match wins" is
/// stable across runs.
pub struct AddressPointIndex {
    name: String,
    points: Vec<AddressPoint>,
    tree: RTree<IndexedPoint>,
}

impl AddressPointIndex {
    /// Indexes `points`, keeping their order.
    #[must_use]
    pub fn new(name: impl Into<String>, points: Vec<AddressPoint>) -> Self {
        let entries = points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new([p.location.lng, p.location.lat], i))
            .collect();

        Self {
            name: name.into(),
            points,
            tree: RTree::bulk_load(entries),
        }
    }

    /// Loads a `GeoJSON` `FeatureCollection` of address points.
    ///
    /// Coordinates in Web Mercator are converted to WGS84. Points without
    /// a state take `default_state`.
    ///
    /// # Errors
    ///
    /// * [`EnrichmentError::Io`] if the file cannot be read
    /// * [`EnrichmentError::InvalidSource`] if it is not a `FeatureCollection`
    pub fn load(path: &Path, default_state: &str) -> Result<(Self, LoadReport), EnrichmentError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| EnrichmentError::Io {
            path: display.clone(),
            source: e,
        })?;

        let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| {
            EnrichmentError::InvalidSource {
                path: display.clone(),
                message: e.to_string(),
            }
        })?;
        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(EnrichmentError::InvalidSource {
                path: display,
                message: "expected a FeatureCollection".to_string(),
            });
        };

        let crs = collection_crs(&collection);
        let mut report = LoadReport {
            features: collection.features.len(),
            ..LoadReport::default()
        };
        let mut points = Vec::with_capacity(collection.features.len());

        for (i, feature) in collection.features.iter().enumerate() {
            let empty = JsonObject::new();
            let props = feature.properties.as_ref().unwrap_or(&empty);

            let Some(address) = text_value(props, ADDRESS_KEYS) else {
                report.skipped += 1;
                continue;
            };

            let location = feature
                .geometry
                .clone()
                .and_then(|g| geo::Geometry::<f64>::try_from(g).ok())
                .and_then(|g| normalize(&format!("address point {i}"), g, crs).ok());

            let Some(ParcelGeometry::Point(point)) = location else {
                log::debug!("{display}: skipping address point {i} ({address}) without usable point geometry");
                report.skipped += 1;
                continue;
            };

            points.push(AddressPoint {
                location: LngLat::new(point.x(), point.y()),
                address,
                city: text_value(props, CITY_KEYS),
                zip: text_value(props, ZIP_KEYS).map(|z| z.chars().take(5).collect()),
                state: Some(
                    text_value(props, STATE_KEYS)
                        .map_or_else(|| default_state.to_string(), |s| s.to_uppercase()),
                ),
            });
        }

        report.loaded = points.len();
        log::info!(
            "Loaded {} address points from {display} ({} skipped)",
            report.loaded,
            report.skipped
        );

        Ok((Self::new(display, points), report))
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points inside `bbox` (edges inclusive), in dataset order.
    #[must_use]
    pub fn within(&self, bbox: &BoundingBox) -> Vec<AddressPoint> {
        let envelope = AABB::from_corners([bbox.west, bbox.south], [bbox.east, bbox.north]);
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope(&envelope)
            .map(|entry| entry.data)
            .collect();
        hits.sort_unstable();
        hits.into_iter().map(|i| self.points[i].clone()).collect()
    }
}

#[async_trait]
impl AddressPointSource for AddressPointIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn points_within(&self, bbox: &BoundingBox) -> Result<Vec<AddressPoint>, EnrichmentError> {
        Ok(self.within(bbox))
    }
}

fn text_value(props: &JsonObject, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| props.get(*key))
        .find_map(|value| match value {
            JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

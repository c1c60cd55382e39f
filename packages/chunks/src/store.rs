//! Loading chunk bodies into [`Parcel`] records.

use std::path::{Path, PathBuf};

use geojson::GeoJson;
use parcel_map_config::ScoringConfig;
use parcel_map_geometry::feature::{collection_crs, parse_feature};
use parcel_map_parcel_models::Parcel;

use crate::{ChunkError, ChunkId, ChunkIndexEntry, Generation, chunk_relative_path};

/// The parcels of one chunk.
#[derive(Debug, Clone)]
pub struct LoadedChunk {
    /// Chunk identifier.
    pub id: ChunkId,
    /// Parcels that parsed, in file order, with derived attributes
    /// freshly computed.
    pub parcels: Vec<Parcel>,
    /// Features skipped because their identity or geometry was unusable.
    pub malformed: usize,
}

/// Reads chunk files from a data directory.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
    scoring: ScoringConfig,
}

impl ChunkStore {
    /// Creates a store over `dir`. Derived attributes are recomputed on
    /// every load with `scoring`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, scoring: ScoringConfig) -> Self {
        Self {
            dir: dir.into(),
            scoring,
        }
    }

    /// Data directory this store reads from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Loads a chunk by id from its conventional path within
    /// `generation`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::ChunkNotFound`] if the file is missing or is
    /// not a readable `GeoJSON` feature collection.
    pub fn load_chunk(
        &self,
        generation: Option<Generation>,
        id: ChunkId,
    ) -> Result<LoadedChunk, ChunkError> {
        self.load_file(id, &chunk_relative_path(generation, id))
    }

    /// Loads the chunk an index entry points at.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load_chunk`].
    pub fn load_entry(&self, entry: &ChunkIndexEntry) -> Result<LoadedChunk, ChunkError> {
        self.load_file(entry.id, &entry.file)
    }

    fn load_file(&self, id: ChunkId, relative: &Path) -> Result<LoadedChunk, ChunkError> {
        let path = self.dir.join(relative);
        let not_found = |reason: String| ChunkError::ChunkNotFound {
            id,
            path: path.display().to_string(),
            reason,
        };

        let text = std::fs::read_to_string(&path).map_err(|e| not_found(e.to_string()))?;
        let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| not_found(e.to_string()))?;
        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(not_found("not a FeatureCollection".to_string()));
        };

        let crs = collection_crs(&collection);
        let mut parcels = Vec::with_capacity(collection.features.len());
        let mut malformed = 0_usize;

        for feature in &collection.features {
            match parse_feature(feature, crs) {
                Ok(parsed) => {
                    let derived = parcel_map_scoring::derive(&parsed.attributes, &self.scoring);
                    parcels.push(parsed.into_parcel(derived));
                }
                Err(e) => {
                    log::warn!("Chunk {id}: skipping feature: {e}");
                    malformed += 1;
                }
            }
        }

        log::debug!(
            "Loaded chunk {id} from {}: {} parcels, {malformed} skipped",
            path.display(),
            parcels.len()
        );

        Ok(LoadedChunk {
            id,
            parcels,
            malformed,
        })
    }
}

#[cfg(test)]
mod tests {
    use parcel_map_parcel_models::{OpportunityTag, PropertyType};
    use serde_json::json;

    use super::*;
    use crate::test_support::scratch_dir;

    fn write_chunk(dir: &Path, id: ChunkId, body: &serde_json::Value) {
        let path = dir.join(chunk_relative_path(None, id));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body.to_string()).unwrap();
    }

    #[test]
    fn skips_malformed_features_and_derives_the_rest() {
        let dir = scratch_dir("store_malformed");
        write_chunk(
            &dir,
            0,
            &json!({
                "type": "FeatureCollection",
                "features": [
                    {
                        "type": "Feature",
                        "id": "good",
                        "geometry": {
                            "type": "Polygon",
                            "coordinates": [[[-97.75, 30.25], [-97.74, 30.25], [-97.74, 30.26], [-97.75, 30.25]]]
                        },
                        "properties": {
                            "owner": "Smith Family Trust",
                            "totalDue": 500, "totalTax": 300, "impValue": 0, "acres": 2,
                            "motivationScore": 3
                        }
                    },
                    {
                        "type": "Feature",
                        "id": "line",
                        "geometry": { "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]] },
                        "properties": {}
                    },
                    {
                        "type": "Feature",
                        "geometry": { "type": "Point", "coordinates": [-97.7, 30.3] },
                        "properties": {}
                    }
                ]
            }),
        );

        let store = ChunkStore::new(&dir, ScoringConfig::default());
        let chunk = store.load_chunk(None, 0).unwrap();
        assert_eq!(chunk.malformed, 2);
        assert_eq!(chunk.parcels.len(), 1);

        let parcel = &chunk.parcels[0];
        assert_eq!(parcel.id, "good");
        assert_eq!(parcel.derived.motivation_score, 95);
        assert_eq!(parcel.derived.property_type, PropertyType::VacantLand);
        assert!(parcel.derived.opportunity_tags.contains(&OpportunityTag::EntityOwned));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_chunk_is_not_found() {
        let dir = scratch_dir("store_missing");
        let store = ChunkStore::new(&dir, ScoringConfig::default());
        assert!(matches!(
            store.load_chunk(Some(4), 7),
            Err(ChunkError::ChunkNotFound { id: 7, .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unreadable_chunk_is_not_found() {
        let dir = scratch_dir("store_garbage");
        let path = dir.join(chunk_relative_path(Some(2), 1));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"type\": \"Featu").unwrap();

        let store = ChunkStore::new(&dir, ScoringConfig::default());
        assert!(matches!(
            store.load_chunk(Some(2), 1),
            Err(ChunkError::ChunkNotFound { id: 1, .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn projected_collection_is_normalized() {
        let dir = scratch_dir("store_projected");
        write_chunk(
            &dir,
            0,
            &json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "id": "m1",
                    "geometry": { "type": "Point", "coordinates": [-10_880_712.1, 3_537_942.4] },
                    "properties": {}
                }]
            }),
        );

        let chunk = ChunkStore::new(&dir, ScoringConfig::default())
            .load_chunk(None, 0)
            .unwrap();
        let c = chunk.parcels[0].centroid;
        assert!((c.lng - -97.7431).abs() < 1e-4);
        assert!((c.lat - 30.2672).abs() < 1e-4);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

//! The chunk index: per-chunk bounds and counts, resident in memory.
//!
//! The index never holds geometry, so scanning every entry per query is
//! cheap. Bounds are read leniently because older exports wrote them under
//! several key conventions. Entries whose bounds are missing or unusable
//! match every query rather than being dropped.

use std::path::{Path, PathBuf};

use parcel_map_parcel_models::BoundingBox;
use serde::{Deserialize, Serialize};

use crate::{
    ChunkError, ChunkId, Generation, INDEX_FILE, INDEX_VERSION, chunk_relative_path,
    directory_relative_path,
};

/// Summary of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkIndexEntry {
    /// Chunk identifier.
    pub id: ChunkId,
    /// Chunk body path, relative to the data directory.
    pub file: PathBuf,
    /// Union of member envelopes. `None` when missing or malformed.
    pub bounds: Option<BoundingBox>,
    /// Number of parcels in the chunk.
    pub count: usize,
}

impl ChunkIndexEntry {
    /// Conservative overlap test: unknown bounds always intersect.
    #[must_use]
    pub fn intersects(&self, bbox: &BoundingBox) -> bool {
        self.bounds.is_none_or(|b| b.intersects(bbox))
    }
}

/// On-disk index layout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<Generation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub total_parcels: Option<usize>,
    #[serde(default)]
    pub total_chunks: Option<usize>,
    pub chunks: Vec<IndexFileEntry>,
}

const fn default_version() -> u32 {
    INDEX_VERSION
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexFileEntry {
    #[serde(alias = "chunkId", alias = "chunk_id")]
    pub id: ChunkId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub bounds: serde_json::Value,
    #[serde(default, alias = "featureCount", alias = "feature_count")]
    pub count: usize,
}

impl IndexFile {
    pub(crate) fn from_entries(
        generation: Generation,
        chunk_size: usize,
        entries: &[ChunkIndexEntry],
    ) -> Self {
        Self {
            version: INDEX_VERSION,
            generation: Some(generation),
            directory: Some(slash_path(&directory_relative_path(Some(generation)))),
            chunk_size: Some(chunk_size),
            total_parcels: Some(entries.iter().map(|e| e.count).sum()),
            total_chunks: Some(entries.len()),
            chunks: entries
                .iter()
                .map(|e| IndexFileEntry {
                    id: e.id,
                    file: Some(slash_path(&e.file)),
                    bounds: e.bounds.map_or(serde_json::Value::Null, |b| {
                        serde_json::json!({
                            "west": b.west,
                            "south": b.south,
                            "east": b.east,
                            "north": b.north,
                        })
                    }),
                    count: e.count,
                })
                .collect(),
        }
    }
}

fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Reads bounds written as `{west,south,east,north}`,
/// `{minLng,minLat,maxLng,maxLat}`, `{min_lng,...}`, or `[w,s,e,n]`.
/// Anything else, including non-finite or inverted values, is `None`.
fn parse_bounds(value: &serde_json::Value) -> Option<BoundingBox> {
    const KEY_SETS: [[&str; 4]; 3] = [
        ["west", "south", "east", "north"],
        ["minLng", "minLat", "maxLng", "maxLat"],
        ["min_lng", "min_lat", "max_lng", "max_lat"],
    ];

    let [west, south, east, north] = match value {
        serde_json::Value::Array(items) if items.len() == 4 => [
            items[0].as_f64()?,
            items[1].as_f64()?,
            items[2].as_f64()?,
            items[3].as_f64()?,
        ],
        serde_json::Value::Object(obj) => KEY_SETS.iter().find_map(|keys| {
            Some([
                obj.get(keys[0])?.as_f64()?,
                obj.get(keys[1])?.as_f64()?,
                obj.get(keys[2])?.as_f64()?,
                obj.get(keys[3])?.as_f64()?,
            ])
        })?,
        _ => return None,
    };

    let bbox = BoundingBox::new(west, south, east, north);
    bbox.is_well_formed().then_some(bbox)
}

/// In-memory chunk index for one data directory.
#[derive(Debug, Clone)]
pub struct ChunkIndex {
    dir: PathBuf,
    generation: Option<Generation>,
    directory_file: PathBuf,
    chunk_size: Option<usize>,
    total_parcels: usize,
    entries: Vec<ChunkIndexEntry>,
}

impl ChunkIndex {
    /// Loads `chunk_index.json` from `dir`.
    ///
    /// # Errors
    ///
    /// * [`ChunkError::IndexNotFound`] if the file does not exist
    /// * [`ChunkError::InvalidIndex`] if it cannot be parsed
    /// * [`ChunkError::Io`] for other read failures
    pub fn load(dir: &Path) -> Result<Self, ChunkError> {
        let path = dir.join(INDEX_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChunkError::IndexNotFound(path.display().to_string()));
            }
            Err(e) => {
                return Err(ChunkError::Io {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        let file: IndexFile =
            serde_json::from_str(&text).map_err(|e| ChunkError::InvalidIndex {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        if file.version > INDEX_VERSION {
            return Err(ChunkError::InvalidIndex {
                path: path.display().to_string(),
                message: format!(
                    "unsupported version {} (newest known is {INDEX_VERSION})",
                    file.version
                ),
            });
        }

        let generation = file.generation;
        let mut malformed_bounds = 0_usize;
        let entries: Vec<ChunkIndexEntry> = file
            .chunks
            .into_iter()
            .map(|raw| {
                let bounds = parse_bounds(&raw.bounds);
                if bounds.is_none() {
                    malformed_bounds += 1;
                }
                ChunkIndexEntry {
                    id: raw.id,
                    file: raw
                        .file
                        .map_or_else(|| chunk_relative_path(generation, raw.id), PathBuf::from),
                    bounds,
                    count: raw.count,
                }
            })
            .collect();

        if malformed_bounds > 0 {
            log::warn!(
                "{malformed_bounds} chunk(s) in {} have missing or malformed bounds; \
                 they will be scanned for every query",
                path.display()
            );
        }

        let total_parcels = file
            .total_parcels
            .unwrap_or_else(|| entries.iter().map(|e| e.count).sum());

        log::info!(
            "Loaded chunk index {} (generation {generation:?}): {} chunks, {total_parcels} parcels",
            path.display(),
            entries.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            generation,
            directory_file: file
                .directory
                .map_or_else(|| directory_relative_path(generation), PathBuf::from),
            chunk_size: file.chunk_size,
            total_parcels,
            entries,
        })
    }

    /// Re-reads the index from the same directory, replacing this one
    /// only if the new file loads cleanly.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`]; on error `self` is left unchanged.
    pub fn reload(&mut self) -> Result<(), ChunkError> {
        *self = Self::load(&self.dir)?;
        Ok(())
    }

    /// Ids of every chunk whose bounds intersect `bbox`, in index order.
    #[must_use]
    pub fn query(&self, bbox: &BoundingBox) -> Vec<ChunkId> {
        self.entries
            .iter()
            .filter(|e| e.intersects(bbox))
            .map(|e| e.id)
            .collect()
    }

    /// Entries whose bounds intersect `bbox`, in index order.
    pub fn query_entries<'a>(
        &'a self,
        bbox: &'a BoundingBox,
    ) -> impl Iterator<Item = &'a ChunkIndexEntry> + 'a {
        self.entries.iter().filter(move |e| e.intersects(bbox))
    }

    /// Looks up one entry.
    #[must_use]
    pub fn entry(&self, id: ChunkId) -> Option<&ChunkIndexEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Every entry, in index order.
    #[must_use]
    pub fn entries(&self) -> &[ChunkIndexEntry] {
        &self.entries
    }

    /// Data directory this index was loaded from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generation this index publishes, or `None` for a flat layout.
    #[must_use]
    pub const fn generation(&self) -> Option<Generation> {
        self.generation
    }

    /// Path of the parcel directory written with this index.
    #[must_use]
    pub fn directory_path(&self) -> PathBuf {
        self.dir.join(&self.directory_file)
    }

    /// Chunk size recorded at build time, if any.
    #[must_use]
    pub const fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    /// Total parcel count across all chunks.
    #[must_use]
    pub const fn total_parcels(&self) -> usize {
        self.total_parcels
    }

    /// Number of chunks.
    #[must_use]
    pub fn total_chunks(&self) -> usize {
        self.entries.len()
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Chunked parcel storage.
//!
//! A data directory holds fixed-size `GeoJSON` chunk files, a small index
//! of per-chunk bounds and counts, and a parcel-id directory. Each publish
//! writes a new generation next to the previous one:
//!
//! ```text
//! data/parcels/
//!   chunk_index.json
//!   chunks/g2/parcel_directory.json
//!   chunks/g2/chunk_00000.geojson
//!   chunks/g2/chunk_00001.geojson
//!   chunks/g3/...
//! ```
//!
//! Chunks are written once by [`builder::ChunkBuilder`] and never touched
//! again. Renaming the index into place is the only step that changes what
//! a freshly opened reader sees. The generation the index replaced stays on
//! disk until the next publish, so a reader still holding the old index
//! keeps getting that generation's answers. Data directories written
//! before generations existed (flat `chunks/chunk_NNNNN.geojson` plus a
//! top-level `parcel_directory.json`) still load.

pub mod builder;
pub mod directory;
pub mod index;
pub mod store;

use std::path::{Path, PathBuf};

pub use builder::{BuildReport, ChunkBuilder};
pub use directory::ParcelDirectory;
pub use index::{ChunkIndex, ChunkIndexEntry};
pub use store::{ChunkStore, LoadedChunk};

/// Identifier of a chunk within one data directory.
pub type ChunkId = u32;

/// Sequence number of one publish into a data directory.
pub type Generation = u64;

/// Index file name inside the data directory.
pub const INDEX_FILE: &str = "chunk_index.json";

/// Parcel directory file name.
pub const DIRECTORY_FILE: &str = "parcel_directory.json";

/// Subdirectory holding chunk bodies.
pub const CHUNKS_DIR: &str = "chunks";

/// Current index format version.
pub const INDEX_VERSION: u32 = 1;

/// Errors from reading or writing chunk storage.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// The chunk file is missing or could not be read as `GeoJSON`.
    #[error("Chunk {id} not found at {path}: {reason}")]
    ChunkNotFound {
        /// Chunk identifier.
        id: ChunkId,
        /// Resolved chunk file path.
        path: String,
        /// Why it could not be loaded.
        reason: String,
    },

    /// No index file exists in the data directory.
    #[error("Chunk index not found: {0}")]
    IndexNotFound(String),

    /// The index file exists but cannot be interpreted.
    #[error("Invalid chunk index {path}: {message}")]
    InvalidIndex {
        /// Index file path.
        path: String,
        /// What is wrong with it.
        message: String,
    },

    /// A source file could not be read as a `GeoJSON` feature collection.
    #[error("Invalid source {path}: {message}")]
    InvalidSource {
        /// Source file path.
        path: String,
        /// What is wrong with it.
        message: String,
    },

    /// A parcel id was added to a build twice.
    #[error("Duplicate parcel id {0}")]
    DuplicateParcel(String),

    /// Filesystem error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being read or written.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Serialization error while writing.
    #[error("JSON error at {path}: {source}")]
    Json {
        /// Path being written.
        path: String,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Directory holding one generation, relative to the data directory.
#[must_use]
pub fn generation_dir(generation: Generation) -> PathBuf {
    Path::new(CHUNKS_DIR).join(format!("g{generation}"))
}

/// Relative path of a chunk body. `None` is the flat layout used before
/// generations.
#[must_use]
pub fn chunk_relative_path(generation: Option<Generation>, id: ChunkId) -> PathBuf {
    let name = format!("chunk_{id:05}.geojson");
    generation.map_or_else(
        || Path::new(CHUNKS_DIR).join(&name),
        |g| generation_dir(g).join(&name),
    )
}

/// Relative path of the parcel directory file for a generation.
#[must_use]
pub fn directory_relative_path(generation: Option<Generation>) -> PathBuf {
    generation.map_or_else(
        || PathBuf::from(DIRECTORY_FILE),
        |g| generation_dir(g).join(DIRECTORY_FILE),
    )
}

/// Parses a generation directory name such as `g12`.
pub(crate) fn parse_generation_dir(name: &str) -> Option<Generation> {
    name.strip_prefix('g')?.parse().ok()
}

/// Writes `bytes` to `path` through a sibling temporary file and a rename,
/// so readers see either the old file or the complete new one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ChunkError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, bytes).map_err(|e| ChunkError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| ChunkError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    use parcel_map_config::ScoringConfig;
    use parcel_map_geometry::feature::parse_feature;
    use parcel_map_parcel_models::Parcel;
    use serde_json::json;

    /// Fresh scratch directory under the system temp dir, unique per
    /// test process.
    pub fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "parcel_map_chunks_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// A small square parcel with its south-west corner at `(lng, lat)`.
    pub fn square_parcel(id: &str, lng: f64, lat: f64) -> Parcel {
        let d = 0.001;
        let feature: geojson::Feature = serde_json::from_value(json!({
            "type": "Feature",
            "id": id,
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [lng, lat], [lng + d, lat], [lng + d, lat + d], [lng, lat + d], [lng, lat]
                ]]
            },
            "properties": { "owner": format!("OWNER {id}"), "impValue": 1000 }
        }))
        .unwrap();
        let parsed = parse_feature(&feature, None).unwrap();
        let derived = parcel_map_scoring::derive(&parsed.attributes, &ScoringConfig::default());
        parsed.into_parcel(derived)
    }
}

//! Parcel id to chunk id lookup, written once per generation.

use std::collections::BTreeMap;
use std::path::Path;

use crate::{ChunkError, ChunkId, ChunkIndex, write_atomic};

/// Maps every parcel id to the chunk that holds it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParcelDirectory {
    chunks_by_parcel: BTreeMap<String, ChunkId>,
}

impl ParcelDirectory {
    /// Loads the directory published with `index`, so the pair always
    /// describes the same generation.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`].
    pub fn load_for(index: &ChunkIndex) -> Result<Option<Self>, ChunkError> {
        Self::load(&index.directory_path())
    }

    /// Loads the directory file at `path`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Io`] if the file exists but cannot be read,
    /// or [`ChunkError::InvalidIndex`] if it is not a JSON object of ids.
    pub fn load(path: &Path) -> Result<Option<Self>, ChunkError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ChunkError::Io {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        let chunks_by_parcel = serde_json::from_str(&text).map_err(|e| ChunkError::InvalidIndex {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        Ok(Some(Self { chunks_by_parcel }))
    }

    /// Records that `parcel_id` lives in `chunk`.
    pub fn insert(&mut self, parcel_id: String, chunk: ChunkId) {
        self.chunks_by_parcel.insert(parcel_id, chunk);
    }

    /// Chunk holding `parcel_id`.
    #[must_use]
    pub fn get(&self, parcel_id: &str) -> Option<ChunkId> {
        self.chunks_by_parcel.get(parcel_id).copied()
    }

    /// Number of parcels listed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks_by_parcel.len()
    }

    /// Whether no parcels are listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks_by_parcel.is_empty()
    }

    /// Atomically writes the directory to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Io`] or [`ChunkError::Json`] on write failure.
    pub fn write(&self, path: &Path) -> Result<(), ChunkError> {
        let bytes = serde_json::to_vec(&self.chunks_by_parcel).map_err(|e| ChunkError::Json {
            path: path.display().to_string(),
            source: e,
        })?;
        write_atomic(path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DIRECTORY_FILE;
    use crate::test_support::scratch_dir;

    #[test]
    fn absent_directory_is_none() {
        let dir = scratch_dir("directory_absent");
        assert_eq!(ParcelDirectory::load(&dir.join(DIRECTORY_FILE)).unwrap(), None);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn written_directory_loads_back() {
        let dir = scratch_dir("directory_write");
        let path = dir.join(DIRECTORY_FILE);
        let mut directory = ParcelDirectory::default();
        directory.insert("A-1".to_string(), 0);
        directory.insert("B-2".to_string(), 3);
        directory.write(&path).unwrap();

        let loaded = ParcelDirectory::load(&path).unwrap().unwrap();
        assert_eq!(loaded.get("B-2"), Some(3));
        assert_eq!(loaded.get("C-3"), None);
        assert!(!dir.join(format!("{DIRECTORY_FILE}.tmp")).exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

//! Building a chunk set from parcels.
//!
//! Parcels are ordered along a Z-order curve of their centroids before
//! being cut into fixed-size chunks, so neighbours land in the same chunk
//! and each chunk's bounds stay compact. That keeps the number of chunks a
//! viewport touches close to the number it actually needs.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use parcel_map_config::ScoringConfig;
use parcel_map_geometry::feature::{collection_crs, parcel_to_feature, parse_feature};
use parcel_map_geometry::morton::morton_key;
use parcel_map_parcel_models::{BoundingBox, Parcel};
use parcel_map_progress::ProgressCallback;

use crate::directory::ParcelDirectory;
use crate::index::IndexFile;
use crate::{
    CHUNKS_DIR, ChunkError, ChunkId, ChunkIndex, ChunkIndexEntry, Generation, INDEX_FILE,
    chunk_relative_path, directory_relative_path, generation_dir, parse_generation_dir,
    write_atomic,
};

/// Outcome of reading one source file into a builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceReport {
    /// Features in the file.
    pub features: usize,
    /// Parcels accepted.
    pub added: usize,
    /// Features skipped for missing ids or bad geometry.
    pub malformed: usize,
    /// Features skipped because their id was already present.
    pub duplicates: usize,
}

/// Outcome of publishing a chunk set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Parcels written.
    pub parcels: usize,
    /// Chunk files written.
    pub chunks: usize,
    /// Duplicate ids rejected while collecting parcels.
    pub duplicates: usize,
    /// Malformed source features skipped while collecting parcels.
    pub malformed: usize,
}

/// Collects parcels and publishes them as a chunk set.
pub struct ChunkBuilder {
    out_dir: PathBuf,
    chunk_size: usize,
    parcels: Vec<Parcel>,
    seen: BTreeSet<String>,
    duplicates: usize,
    malformed: usize,
}

impl ChunkBuilder {
    /// Creates a builder that will publish into `out_dir`. A
    /// `chunk_size` of zero is treated as one.
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            out_dir: out_dir.into(),
            chunk_size: chunk_size.max(1),
            parcels: Vec::new(),
            seen: BTreeSet::new(),
            duplicates: 0,
            malformed: 0,
        }
    }

    /// Number of parcels collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    /// Whether no parcels have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    /// Adds a parcel. The first parcel with a given id wins.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::DuplicateParcel`] if the id was already added.
    pub fn add(&mut self, parcel: Parcel) -> Result<(), ChunkError> {
        if !self.seen.insert(parcel.id.clone()) {
            self.duplicates += 1;
            return Err(ChunkError::DuplicateParcel(parcel.id));
        }
        self.parcels.push(parcel);
        Ok(())
    }

    /// Reads a raw `GeoJSON` export (a `FeatureCollection` or a single
    /// `Feature`) and adds every usable parcel in it.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Io`] if the file cannot be read or
    /// [`ChunkError::InvalidSource`] if it is not feature `GeoJSON`.
    /// Individual bad features are skipped and counted, not errors.
    pub fn add_source_file(
        &mut self,
        path: &Path,
        scoring: &ScoringConfig,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<SourceReport, ChunkError> {
        let collection = read_source(path)?;
        let crs = collection_crs(&collection);
        let mut report = SourceReport {
            features: collection.features.len(),
            ..SourceReport::default()
        };

        log::info!(
            "Reading {} features from {}",
            report.features,
            path.display()
        );
        progress.set_total(report.features as u64);
        progress.set_message(format!("Reading {}", path.display()));

        for feature in &collection.features {
            progress.inc(1);

            let parsed = match parse_feature(feature, crs) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("{}: skipping feature: {e}", path.display());
                    report.malformed += 1;
                    continue;
                }
            };

            let derived = parcel_map_scoring::derive(&parsed.attributes, scoring);
            match self.add(parsed.into_parcel(derived)) {
                Ok(()) => report.added += 1,
                Err(e) => {
                    log::debug!("{}: {e}", path.display());
                    report.duplicates += 1;
                }
            }
        }

        self.malformed += report.malformed;

        if report.duplicates > 0 {
            log::warn!(
                "{}: rejected {} duplicate parcel id(s)",
                path.display(),
                report.duplicates
            );
        }

        progress.finish(format!(
            "{}: {} added, {} malformed, {} duplicate",
            path.display(),
            report.added,
            report.malformed,
            report.duplicates
        ));

        Ok(report)
    }

    /// Sorts, chunks, and writes everything collected as a new
    /// generation of the output directory.
    ///
    /// Chunk files and the parcel directory go into a fresh
    /// `chunks/g<N>/` directory that no reader has seen yet. Renaming the
    /// index into place publishes them. Only after that are generations
    /// older than the one just replaced removed, so a reader that has not
    /// reloaded keeps a complete, unchanged chunk set.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Io`] or [`ChunkError::Json`] if any file
    /// cannot be written. The published index is untouched until the last
    /// step, so a failed publish leaves readers on the previous generation.
    pub fn publish(mut self, progress: &Arc<dyn ProgressCallback>) -> Result<BuildReport, ChunkError> {
        let chunks_dir = self.out_dir.join(CHUNKS_DIR);
        std::fs::create_dir_all(&chunks_dir).map_err(|e| ChunkError::Io {
            path: chunks_dir.display().to_string(),
            source: e,
        })?;

        let previous = ChunkIndex::load(&self.out_dir).ok();
        let replaced = previous.as_ref().and_then(ChunkIndex::generation);
        let generation = next_generation(&chunks_dir, replaced);
        let generation_path = self.out_dir.join(generation_dir(generation));
        std::fs::create_dir_all(&generation_path).map_err(|e| ChunkError::Io {
            path: generation_path.display().to_string(),
            source: e,
        })?;

        self.parcels
            .sort_by(|a, b| {
                morton_key(a.centroid)
                    .cmp(&morton_key(b.centroid))
                    .then_with(|| a.id.cmp(&b.id))
            });

        let total_chunks = self.parcels.len().div_ceil(self.chunk_size);
        log::info!(
            "Publishing {} parcels as {total_chunks} chunks of up to {} into {} (generation {generation})",
            self.parcels.len(),
            self.chunk_size,
            self.out_dir.display()
        );
        progress.set_total(total_chunks as u64);
        progress.set_message("Writing chunks".to_string());

        let mut entries = Vec::with_capacity(total_chunks);
        let mut directory = ParcelDirectory::default();

        for (i, members) in self.parcels.chunks(self.chunk_size).enumerate() {
            let id = ChunkId::try_from(i).map_err(|_| ChunkError::InvalidIndex {
                path: self.out_dir.join(INDEX_FILE).display().to_string(),
                message: format!("too many chunks ({total_chunks})"),
            })?;

            let entry = write_chunk(&self.out_dir, generation, id, members)?;
            for parcel in members {
                directory.insert(parcel.id.clone(), id);
            }
            entries.push(entry);
            progress.inc(1);
        }

        directory.write(&self.out_dir.join(directory_relative_path(Some(generation))))?;

        let index_path = self.out_dir.join(INDEX_FILE);
        let index = IndexFile::from_entries(generation, self.chunk_size, &entries);
        let bytes = serde_json::to_vec_pretty(&index).map_err(|e| ChunkError::Json {
            path: index_path.display().to_string(),
            source: e,
        })?;
        write_atomic(&index_path, &bytes)?;

        let keep_flat = previous.is_some() && replaced.is_none();
        remove_retired_generations(&self.out_dir, generation, replaced, keep_flat);

        let report = BuildReport {
            parcels: self.parcels.len(),
            chunks: entries.len(),
            duplicates: self.duplicates,
            malformed: self.malformed,
        };
        progress.finish(format!(
            "Published {} parcels in {} chunks",
            report.parcels, report.chunks
        ));
        log::info!("Build complete (generation {generation}): {report:?}");

        Ok(report)
    }
}

fn read_source(path: &Path) -> Result<FeatureCollection, ChunkError> {
    let text = std::fs::read_to_string(path).map_err(|e| ChunkError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let invalid = |message: String| ChunkError::InvalidSource {
        path: path.display().to_string(),
        message,
    };

    match text.parse::<GeoJson>().map_err(|e| invalid(e.to_string()))? {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        GeoJson::Feature(feature) => Ok(FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        }),
        GeoJson::Geometry(_) => Err(invalid("bare geometry has no parcel attributes".to_string())),
    }
}

fn write_chunk(
    out_dir: &Path,
    generation: Generation,
    id: ChunkId,
    members: &[Parcel],
) -> Result<ChunkIndexEntry, ChunkError> {
    let bounds = members
        .iter()
        .map(|p| p.bbox)
        .filter(BoundingBox::is_well_formed)
        .reduce(|a, b| a.union(&b));

    let features: Vec<Feature> = members.iter().map(parcel_to_feature).collect();

    let mut foreign = JsonObject::new();
    foreign.insert("chunkId".to_string(), id.into());
    foreign.insert("count".to_string(), members.len().into());

    let collection = FeatureCollection {
        bbox: bounds.map(|b| vec![b.west, b.south, b.east, b.north]),
        features,
        foreign_members: Some(foreign),
    };

    let relative = chunk_relative_path(Some(generation), id);
    let path = out_dir.join(&relative);
    let bytes = serde_json::to_vec(&collection).map_err(|e| ChunkError::Json {
        path: path.display().to_string(),
        source: e,
    })?;
    write_atomic(&path, &bytes)?;

    Ok(ChunkIndexEntry {
        id,
        file: relative,
        bounds,
        count: members.len(),
    })
}

/// One past the highest generation on disk or in the replaced index.
/// Directories left by a failed publish are never reused.
fn next_generation(chunks_dir: &Path, replaced: Option<Generation>) -> Generation {
    let on_disk = std::fs::read_dir(chunks_dir)
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| parse_generation_dir(&entry.file_name().to_string_lossy()))
        .max();

    on_disk.max(replaced).map_or(1, |g| g + 1)
}

/// Removes every generation except `current` and the one it replaced.
/// Flat-layout chunk files and the top-level parcel directory go too,
/// unless the replaced index still points at them.
fn remove_retired_generations(
    out_dir: &Path,
    current: Generation,
    replaced: Option<Generation>,
    keep_flat: bool,
) {
    let chunks_dir = out_dir.join(CHUNKS_DIR);
    let Ok(listing) = std::fs::read_dir(&chunks_dir) else {
        return;
    };

    for entry in listing.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        let result = match parse_generation_dir(&name) {
            Some(g) if g == current || Some(g) == replaced => continue,
            Some(_) if path.is_dir() => std::fs::remove_dir_all(&path),
            _ if keep_flat || path.is_dir() => continue,
            _ if name.ends_with(".geojson") || name.ends_with(".tmp") => std::fs::remove_file(&path),
            _ => continue,
        };

        match result {
            Ok(()) => log::debug!("Removed retired {}", path.display()),
            Err(e) => log::warn!("Failed to remove retired {}: {e}", path.display()),
        }
    }

    if !keep_flat {
        let flat_directory = out_dir.join(directory_relative_path(None));
        match std::fs::remove_file(&flat_directory) {
            Ok(()) => log::debug!("Removed retired {}", flat_directory.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove retired {}: {e}", flat_directory.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use parcel_map_progress::null_progress;
    use serde_json::json;

    use super::*;
    use crate::test_support::{scratch_dir, square_parcel};
    use crate::ChunkStore;

    #[test]
    fn rejects_duplicate_ids_first_wins() {
        let mut builder = ChunkBuilder::new(std::env::temp_dir(), 10);
        builder.add(square_parcel("a", -97.7, 30.3)).unwrap();
        let err = builder.add(square_parcel("a", -90.0, 35.0)).unwrap_err();
        assert!(matches!(err, ChunkError::DuplicateParcel(id) if id == "a"));
        assert_eq!(builder.len(), 1);
        assert!((builder.parcels[0].centroid.lng - -97.6995).abs() < 1e-9);
    }

    #[test]
    fn publishes_chunks_index_and_directory() {
        let dir = scratch_dir("builder_publish");
        let mut builder = ChunkBuilder::new(&dir, 2);
        for (i, (lng, lat)) in [(-97.75, 30.25), (-97.74, 30.26), (-96.0, 32.0), (-96.01, 32.01), (-97.76, 30.24)]
            .into_iter()
            .enumerate()
        {
            builder.add(square_parcel(&format!("p{i}"), lng, lat)).unwrap();
        }

        let report = builder.publish(&null_progress()).unwrap();
        assert_eq!(report.parcels, 5);
        assert_eq!(report.chunks, 3);

        let index = ChunkIndex::load(&dir).unwrap();
        assert_eq!(index.total_parcels(), 5);
        assert_eq!(index.chunk_size(), Some(2));
        assert!(index.entries().iter().all(|e| e.bounds.is_some()));

        let store = ChunkStore::new(&dir, ScoringConfig::default());
        let mut ids: Vec<String> = index
            .entries()
            .iter()
            .flat_map(|e| store.load_entry(e).unwrap().parcels)
            .map(|p| p.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["p0", "p1", "p2", "p3", "p4"]);

        assert_eq!(index.generation(), Some(1));
        assert!(index.entries().iter().all(|e| e.file.starts_with(generation_dir(1))));

        let directory = ParcelDirectory::load_for(&index).unwrap().unwrap();
        assert_eq!(directory.len(), 5);
        let chunk = directory.get("p2").unwrap();
        assert!(store
            .load_chunk(index.generation(), chunk)
            .unwrap()
            .parcels
            .iter()
            .any(|p| p.id == "p2"));

        // Each chunk's bounds cover its own members.
        for entry in index.entries() {
            let bounds = entry.bounds.unwrap();
            for parcel in store.load_entry(entry).unwrap().parcels {
                assert!(bounds.contains(parcel.centroid));
            }
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    fn publish_row(dir: &Path, ids: &[&str], chunk_size: usize) -> ChunkIndex {
        let mut builder = ChunkBuilder::new(dir, chunk_size);
        for (i, id) in ids.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let lng = (i as f64).mul_add(0.01, -97.7);
            builder.add(square_parcel(id, lng, 30.3)).unwrap();
        }
        builder.publish(&null_progress()).unwrap();
        ChunkIndex::load(dir).unwrap()
    }

    #[test]
    fn republish_writes_a_new_generation_and_leaves_the_old_one_intact() {
        let dir = scratch_dir("builder_generations");
        let first = publish_row(&dir, &["p0", "p1", "p2"], 1);
        let first_bodies: Vec<Vec<u8>> = first
            .entries()
            .iter()
            .map(|e| std::fs::read(dir.join(&e.file)).unwrap())
            .collect();

        let second = publish_row(&dir, &["p0"], 10);
        assert_eq!(second.generation(), Some(2));
        assert_eq!(second.total_parcels(), 1);

        // The replaced generation is byte-for-byte what its index promised.
        for (entry, body) in first.entries().iter().zip(&first_bodies) {
            assert_eq!(&std::fs::read(dir.join(&entry.file)).unwrap(), body);
        }
        assert_eq!(ParcelDirectory::load_for(&first).unwrap().unwrap().len(), 3);

        // A third publish retires the first generation only.
        let third = publish_row(&dir, &["p0", "p1"], 10);
        assert_eq!(third.generation(), Some(3));
        assert!(!dir.join(generation_dir(1)).exists());
        assert!(dir.join(generation_dir(2)).exists());
        assert!(dir.join(generation_dir(3)).exists());
        assert!(!dir.join(format!("{INDEX_FILE}.tmp")).exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn abandoned_generation_directory_is_skipped_and_retired() {
        let dir = scratch_dir("builder_abandoned");
        publish_row(&dir, &["p0"], 1);
        std::fs::create_dir_all(dir.join(generation_dir(7))).unwrap();
        let leftover = dir.join(chunk_relative_path(Some(7), 0));
        std::fs::write(leftover.with_extension("geojson.tmp"), "{").unwrap();

        let index = publish_row(&dir, &["p0", "p1"], 1);
        assert_eq!(index.generation(), Some(8));
        assert!(!dir.join(generation_dir(7)).exists());
        assert!(dir.join(generation_dir(1)).exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn publishing_over_a_flat_layout_keeps_it_until_the_next_publish() {
        let dir = scratch_dir("builder_flat");
        std::fs::create_dir_all(dir.join(CHUNKS_DIR)).unwrap();
        std::fs::write(
            dir.join(chunk_relative_path(None, 0)),
            r#"{"type":"FeatureCollection","features":[]}"#,
        )
        .unwrap();
        std::fs::write(dir.join(directory_relative_path(None)), "{}").unwrap();
        std::fs::write(dir.join(INDEX_FILE), r#"{"chunks":[{"id":0,"count":0}]}"#).unwrap();

        publish_row(&dir, &["p0"], 1);
        assert!(dir.join(chunk_relative_path(None, 0)).exists());
        assert!(dir.join(directory_relative_path(None)).exists());

        publish_row(&dir, &["p0"], 1);
        assert!(!dir.join(chunk_relative_path(None, 0)).exists());
        assert!(!dir.join(directory_relative_path(None)).exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn reads_raw_source_with_aliases_and_bad_features() {
        let dir = scratch_dir("builder_source");
        let source = dir.join("parcels.geojson");
        std::fs::write(
            &source,
            json!({
                "type": "FeatureCollection",
                "features": [
                    {
                        "type": "Feature",
                        "geometry": { "type": "Point", "coordinates": [-97.7, 30.3] },
                        "properties": { "PROP_ID": "100", "imprv_val": "125,000" }
                    },
                    {
                        "type": "Feature",
                        "geometry": { "type": "Point", "coordinates": [-97.8, 30.4] },
                        "properties": { "PROP_ID": "100" }
                    },
                    {
                        "type": "Feature",
                        "geometry": null,
                        "properties": { "PROP_ID": "101" }
                    }
                ]
            })
            .to_string(),
        )
        .unwrap();

        let mut builder = ChunkBuilder::new(dir.join("out"), 100);
        let report = builder
            .add_source_file(&source, &ScoringConfig::default(), &null_progress())
            .unwrap();
        assert_eq!(
            report,
            SourceReport {
                features: 3,
                added: 1,
                malformed: 1,
                duplicates: 1,
            }
        );
        assert_eq!(builder.parcels[0].attributes.improvement_value, Some(125_000.0));

        let build = builder.publish(&null_progress()).unwrap();
        assert_eq!(build.duplicates, 1);
        assert_eq!(build.malformed, 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn bare_geometry_source_is_invalid() {
        let dir = scratch_dir("builder_geometry");
        let source = dir.join("geom.geojson");
        std::fs::write(&source, r#"{"type":"Point","coordinates":[0.0,0.0]}"#).unwrap();
        let mut builder = ChunkBuilder::new(dir.join("out"), 100);
        assert!(matches!(
            builder.add_source_file(&source, &ScoringConfig::default(), &null_progress()),
            Err(ChunkError::InvalidSource { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

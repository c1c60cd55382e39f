//! The parcel store facade.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use parcel_map_chunks::{
    ChunkError, ChunkIndex, ChunkIndexEntry, ChunkStore, LoadedChunk, ParcelDirectory,
};
use parcel_map_config::{Config, ScoringConfig, ViewportConfig};
use parcel_map_parcel_models::{BoundingBox, Parcel};
use parcel_map_progress::ProgressCallback;

use crate::{InclusionStrategy, ViewportError, ViewportFilter, validate_bbox};

/// Parcels matching a viewport, plus how the query went.
#[derive(Debug, Clone)]
pub struct ViewportResult {
    /// Matching parcels, at most the effective limit.
    pub parcels: Vec<Parcel>,
    /// Chunks loaded and filtered.
    pub chunks_scanned: usize,
    /// Candidate chunks that could not be loaded and were skipped.
    pub chunks_failed: usize,
    /// Parcels inside the viewport rejected by the attribute filter.
    pub filtered_out: usize,
    /// Inclusion test used.
    pub strategy: InclusionStrategy,
    /// Limit actually applied after capping.
    pub limit: usize,
}

/// Read-side access to a chunked parcel data directory.
///
/// The index and parcel directory are loaded once and held until
/// [`Self::reload`]; chunk bodies are read on demand. Published chunk sets
/// are never modified in place, so a store that has not reloaded keeps
/// answering from the generation it opened.
pub struct ParcelStore {
    index: RwLock<ChunkIndex>,
    directory: RwLock<Option<ParcelDirectory>>,
    chunks: ChunkStore,
    config: ViewportConfig,
}

impl ParcelStore {
    /// Opens the data directory named by `config.chunks.data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ViewportError::Chunk`] if the index is missing or invalid.
    pub fn open(config: &Config) -> Result<Self, ViewportError> {
        Self::open_dir(
            &config.chunks.data_dir,
            config.viewport.clone(),
            config.scoring.clone(),
        )
    }

    /// Opens a data directory with explicit settings.
    ///
    /// # Errors
    ///
    /// Returns [`ViewportError::Chunk`] if the index is missing or invalid.
    pub fn open_dir(
        dir: &Path,
        config: ViewportConfig,
        scoring: ScoringConfig,
    ) -> Result<Self, ViewportError> {
        let index = ChunkIndex::load(dir)?;
        let directory = ParcelDirectory::load_for(&index)?;
        if directory.is_none() {
            log::info!(
                "No parcel directory in {}; lookups by id will scan chunks",
                dir.display()
            );
        }

        Ok(Self {
            index: RwLock::new(index),
            directory: RwLock::new(directory),
            chunks: ChunkStore::new(dir, scoring),
            config,
        })
    }

    /// Re-reads the index and the parcel directory it names, e.g. after
    /// a rebuild. On error the previously loaded state stays in use.
    ///
    /// # Errors
    ///
    /// Returns [`ViewportError::Chunk`] if either file fails to load.
    pub fn reload(&self) -> Result<(), ViewportError> {
        let mut fresh = self.index_snapshot();
        fresh.reload()?;
        let directory = ParcelDirectory::load_for(&fresh)?;

        *self.index.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        *self.directory.write().unwrap_or_else(PoisonError::into_inner) = directory;
        log::info!("Reloaded parcel store from {}", self.chunks.dir().display());
        Ok(())
    }

    fn index_snapshot(&self) -> ChunkIndex {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Total parcels, answered from the index alone.
    #[must_use]
    pub fn count(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .total_parcels()
    }

    /// Number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .total_chunks()
    }

    /// Chunk size the loaded generation was built with, if recorded.
    #[must_use]
    pub fn chunk_size(&self) -> Option<usize> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .chunk_size()
    }

    /// Index entries, in index order.
    #[must_use]
    pub fn entries(&self) -> Vec<ChunkIndexEntry> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .to_vec()
    }

    /// Looks up one parcel by id.
    ///
    /// Uses the parcel directory to load exactly one chunk; without one,
    /// scans chunks in index order. Unloadable chunks are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ViewportError::InvalidQuery`] for a blank id.
    pub fn get(&self, id: &str) -> Result<Option<Parcel>, ViewportError> {
        if id.trim().is_empty() {
            return Err(ViewportError::InvalidQuery {
                message: "parcel id must not be empty".to_string(),
            });
        }

        let entries = self.entries();
        let located = self
            .directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|d| d.get(id));

        let candidates: Vec<&ChunkIndexEntry> = match located {
            Some(Some(chunk_id)) => entries.iter().filter(|e| e.id == chunk_id).collect(),
            Some(None) => Vec::new(),
            None => entries.iter().collect(),
        };

        for entry in candidates {
            match self.chunks.load_entry(entry) {
                Ok(chunk) => {
                    if let Some(parcel) = chunk.parcels.into_iter().find(|p| p.id == id) {
                        return Ok(Some(parcel));
                    }
                }
                Err(e) => log::warn!("Skipping chunk during lookup of {id}: {e}"),
            }
        }

        Ok(None)
    }

    /// Parcels inside `bbox`, at most `limit` (default from config, capped
    /// at the configured maximum).
    ///
    /// Candidate chunks load in index order, in waves of
    /// `parallel_chunk_loads`; no further wave starts once the limit is
    /// reached. Chunks that fail to load are logged, counted, and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ViewportError::InvalidQuery`] for an invalid bbox or a
    /// zero limit.
    pub fn viewport(
        &self,
        bbox: &BoundingBox,
        limit: Option<usize>,
    ) -> Result<ViewportResult, ViewportError> {
        self.viewport_filtered(bbox, limit, &ViewportFilter::default())
    }

    /// Like [`Self::viewport`], but only parcels that also pass `filter`
    /// are returned and counted toward the limit.
    ///
    /// # Errors
    ///
    /// Returns [`ViewportError::InvalidQuery`] for an invalid bbox, a zero
    /// limit, or an invalid filter.
    pub fn viewport_filtered(
        &self,
        bbox: &BoundingBox,
        limit: Option<usize>,
        filter: &ViewportFilter,
    ) -> Result<ViewportResult, ViewportError> {
        validate_bbox(bbox)?;
        filter.validate()?;
        let limit = self.effective_limit(limit)?;
        let strategy = InclusionStrategy::for_bbox(bbox, &self.config);

        let candidates: Vec<ChunkIndexEntry> = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .query_entries(bbox)
            .cloned()
            .collect();

        log::debug!(
            "Viewport {bbox:?}: {} candidate chunks, strategy {strategy}, limit {limit}",
            candidates.len()
        );

        let mut result = ViewportResult {
            parcels: Vec::new(),
            chunks_scanned: 0,
            chunks_failed: 0,
            filtered_out: 0,
            strategy,
            limit,
        };

        'waves: for wave in candidates.chunks(self.config.parallel_chunk_loads.max(1)) {
            for loaded in self.load_wave(wave) {
                let chunk = match loaded {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        log::warn!("Skipping chunk in viewport query: {e}");
                        result.chunks_failed += 1;
                        continue;
                    }
                };

                result.chunks_scanned += 1;
                for parcel in chunk.parcels {
                    if !strategy.includes(bbox, &parcel) {
                        continue;
                    }
                    if !filter.matches(&parcel) {
                        result.filtered_out += 1;
                        continue;
                    }
                    result.parcels.push(parcel);
                    if result.parcels.len() >= limit {
                        break 'waves;
                    }
                }
            }
        }

        Ok(result)
    }

    fn effective_limit(&self, requested: Option<usize>) -> Result<usize, ViewportError> {
        match requested {
            Some(0) => Err(ViewportError::InvalidQuery {
                message: "limit must be at least 1".to_string(),
            }),
            Some(n) => Ok(n.min(self.config.max_limit)),
            None => Ok(self.config.default_limit.min(self.config.max_limit)),
        }
    }

    /// Loads one wave of chunks, concurrently when the wave has more than
    /// one. Results come back in wave order.
    fn load_wave(&self, wave: &[ChunkIndexEntry]) -> Vec<Result<LoadedChunk, ChunkError>> {
        if wave.len() <= 1 {
            return wave.iter().map(|e| self.chunks.load_entry(e)).collect();
        }

        std::thread::scope(|scope| {
            let handles: Vec<_> = wave
                .iter()
                .map(|entry| (entry.id, scope.spawn(move || self.chunks.load_entry(entry))))
                .collect();

            handles
                .into_iter()
                .map(|(id, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(ChunkError::ChunkNotFound {
                            id,
                            path: self.chunks.dir().display().to_string(),
                            reason: "chunk loader panicked".to_string(),
                        })
                    })
                })
                .collect()
        })
    }

    /// Loads every parcel in every chunk, in index order. Used for
    /// whole-dataset passes such as enrichment, which republish what they
    /// load.
    ///
    /// # Errors
    ///
    /// * [`ViewportError::Chunk`] for the first chunk that fails to load
    /// * [`ViewportError::MalformedFeatures`] if any chunk holds features
    ///   that do not parse, since republishing would drop them
    pub fn load_all(
        &self,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<Vec<Parcel>, ViewportError> {
        let entries = self.entries();
        progress.set_total(entries.len() as u64);
        progress.set_message("Loading chunks".to_string());

        let mut parcels = Vec::with_capacity(self.count());
        let mut malformed_chunks = 0_usize;
        let mut malformed_features = 0_usize;
        for entry in &entries {
            let chunk = self.chunks.load_entry(entry)?;
            if chunk.malformed > 0 {
                log::error!(
                    "Chunk {} ({}) has {} malformed feature(s)",
                    chunk.id,
                    entry.file.display(),
                    chunk.malformed
                );
                malformed_chunks += 1;
                malformed_features += chunk.malformed;
            }
            parcels.extend(chunk.parcels);
            progress.inc(1);
        }

        if malformed_features > 0 {
            progress.finish(format!("{malformed_features} malformed feature(s) found"));
            return Err(ViewportError::MalformedFeatures {
                chunks: malformed_chunks,
                features: malformed_features,
            });
        }

        progress.finish(format!("Loaded {} parcels", parcels.len()));
        Ok(parcels)
    }
}

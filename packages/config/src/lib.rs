#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Configuration for the parcel map toolchain.
//!
//! Defaults are embedded at compile time from `config/default.toml`. A
//! user-supplied TOML file is merged over them key by key, so an override
//! file only needs the values it changes:
//!
//! ```toml
//! [viewport]
//! max_limit = 500
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_TOML: &str = include_str!("../config/default.toml");

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The override file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Path of the override file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML could not be parsed or did not match the schema.
    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("Invalid config value for {key}: {message}")]
    Invalid {
        /// Dotted key (e.g., `"viewport.max_limit"`).
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Chunk store layout.
    pub chunks: ChunksConfig,
    /// Viewport query tuning.
    pub viewport: ViewportConfig,
    /// Address enrichment pass.
    pub enrichment: EnrichmentConfig,
    /// Derived attribute thresholds.
    pub scoring: ScoringConfig,
}

/// Chunk store layout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChunksConfig {
    /// Directory holding `chunk_index.json` and `chunks/`.
    pub data_dir: PathBuf,
    /// Parcels per chunk at build time.
    pub chunk_size: usize,
}

/// Viewport query tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewportConfig {
    /// Limit applied when a caller does not pass one.
    pub default_limit: usize,
    /// Hard cap on any requested limit.
    pub max_limit: usize,
    /// Viewports with either side below this many degrees use exact
    /// geometry inclusion instead of centroids.
    pub small_viewport_degrees: f64,
    /// Slack added around large viewports for centroid inclusion.
    pub centroid_buffer_degrees: f64,
    /// Chunks loaded concurrently per wave within one query.
    pub parallel_chunk_loads: usize,
}

/// Address enrichment pass.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrichmentConfig {
    /// Maximum centroid-to-point distance for proximity matches, in
    /// degrees.
    pub proximity_tolerance_degrees: f64,
    /// Parcels per lookup batch.
    pub batch_size: usize,
    /// Minimum spacing between batch lookups.
    pub batch_delay_ms: u64,
    /// Extra delay inserted after a failed batch.
    pub failure_backoff_ms: u64,
    /// Batches in flight at once.
    pub concurrency: usize,
    /// Tag recorded on every enriched parcel.
    pub source_tag: String,
    /// State assumed for address points that do not carry one.
    pub default_state: String,
}

/// Derived attribute thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoringConfig {
    /// Two-letter state treated as the home jurisdiction when a parcel
    /// has no site state.
    pub home_state: String,
    /// Market value per acre below which a parcel is flagged as
    /// potentially undervalued.
    pub undervalued_value_per_acre: f64,
    /// Lots strictly larger than this are "large".
    pub large_lot_acres: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Config::default().scoring
    }
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Config::default().viewport
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Config::default().enrichment
    }
}

impl Default for Config {
    /// Parses the embedded defaults.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML is malformed (a build-time guarantee
    /// covered by the tests below).
    fn default() -> Self {
        toml::from_str(DEFAULT_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded default config: {e}"))
    }
}

impl Config {
    /// Loads the embedded defaults, merging `path` over them when given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the override cannot be read or parsed,
    /// or if the merged result fails [`Self::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        };

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loading config overrides from {}", path.display());
        Self::from_override_str(&text)
    }

    /// Merges the given TOML text over the embedded defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not valid TOML, a value has
    /// the wrong type, or validation fails.
    pub fn from_override_str(text: &str) -> Result<Self, ConfigError> {
        let mut base: toml::Table = toml::from_str(DEFAULT_TOML)?;
        let overrides: toml::Table = toml::from_str(text)?;
        merge_tables(&mut base, overrides);

        let config: Self = toml::Value::Table(base).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that sizes and tolerances are positive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(key: &'static str, ok: bool) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    key,
                    message: "must be greater than zero".to_string(),
                })
            }
        }

        positive("chunks.chunk_size", self.chunks.chunk_size > 0)?;
        positive("viewport.max_limit", self.viewport.max_limit > 0)?;
        positive("viewport.default_limit", self.viewport.default_limit > 0)?;
        positive(
            "viewport.small_viewport_degrees",
            self.viewport.small_viewport_degrees > 0.0,
        )?;
        positive(
            "viewport.parallel_chunk_loads",
            self.viewport.parallel_chunk_loads > 0,
        )?;
        positive(
            "enrichment.proximity_tolerance_degrees",
            self.enrichment.proximity_tolerance_degrees > 0.0,
        )?;
        positive("enrichment.batch_size", self.enrichment.batch_size > 0)?;
        positive("enrichment.concurrency", self.enrichment.concurrency > 0)?;
        positive(
            "scoring.undervalued_value_per_acre",
            self.scoring.undervalued_value_per_acre > 0.0,
        )?;

        if !(self.viewport.centroid_buffer_degrees >= 0.0) {
            return Err(ConfigError::Invalid {
                key: "viewport.centroid_buffer_degrees",
                message: "must not be negative".to_string(),
            });
        }

        if self.viewport.default_limit > self.viewport.max_limit {
            return Err(ConfigError::Invalid {
                key: "viewport.default_limit",
                message: format!(
                    "{} exceeds viewport.max_limit {}",
                    self.viewport.default_limit, self.viewport.max_limit
                ),
            });
        }

        Ok(())
    }
}

/// Recursively overlays `overrides` onto `base`. Nested tables merge;
/// every other value replaces.
fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

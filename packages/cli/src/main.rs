#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the parcel map toolchain.
//!
//! Builds chunk sets from raw `GeoJSON` exports, answers id and viewport
//! queries against a published data directory, runs address enrichment
//! passes, and explains motivation scores.
//!
//! Uses `indicatif-log-bridge` (via [`parcel_map_cli_utils::init_logger`])
//! so that log lines and progress bars share the terminal cleanly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use geojson::FeatureCollection;
use parcel_map_chunks::{ChunkBuilder, ChunkIndex, ParcelDirectory};
use parcel_map_cli_utils::{IndicatifProgress, MultiProgress};
use parcel_map_config::Config;
use parcel_map_enrichment::{AddressPointIndex, EnrichmentPass};
use parcel_map_geometry::feature::parcel_to_feature;
use parcel_map_parcel_models::{BoundingBox, OpportunityTag, Parcel, PropertyType};
use parcel_map_viewport::{ParcelStore, ViewportFilter, parse_bbox};

#[derive(Parser)]
#[command(name = "parcel_map", about = "Parcel chunk store toolchain")]
struct Cli {
    /// TOML file overriding the built-in configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Data directory (overrides `[chunks] data_dir`)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a chunk set from one or more `GeoJSON` parcel exports
    Build {
        /// Source `GeoJSON` file(s)
        #[arg(long = "input", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        /// Output directory (defaults to the data directory)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Parcels per chunk (defaults to `[chunks] chunk_size`)
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Print totals from the chunk index
    Stats,
    /// Print one parcel as a `GeoJSON` feature
    Get {
        /// Parcel identifier
        id: String,
    },
    /// Print the parcels in a viewport as a `GeoJSON` `FeatureCollection`
    Viewport {
        /// Rectangle as `west,south,east,north`
        #[arg(long, allow_hyphen_values = true)]
        bbox: String,
        /// Maximum parcels to return
        #[arg(long)]
        limit: Option<usize>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Fill missing site addresses from an address point dataset and
    /// republish the chunk set
    Enrich {
        /// Address point `GeoJSON` file
        #[arg(long)]
        points: PathBuf,
        /// Maximum number of parcels to try
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the derived attributes and score factors for a parcel
    Score {
        /// Parcel identifier
        id: String,
    },
}

/// Attribute filters for the `viewport` command.
#[derive(Args)]
struct FilterArgs {
    /// Property type to include (repeatable, e.g. `vacant-land`)
    #[arg(long = "type", value_name = "TYPE")]
    property_types: Vec<PropertyType>,
    /// Opportunity tag every result must carry (repeatable, e.g. `large-lot`)
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<OpportunityTag>,
    /// Minimum market value
    #[arg(long)]
    min_value: Option<f64>,
    /// Maximum market value
    #[arg(long)]
    max_value: Option<f64>,
    /// Minimum lot size in acres
    #[arg(long)]
    min_acres: Option<f64>,
    /// Maximum lot size in acres
    #[arg(long)]
    max_acres: Option<f64>,
    /// Only (`true`) or never (`false`) tax-delinquent parcels
    #[arg(long)]
    tax_delinquent: Option<bool>,
    /// Only (`true`) or never (`false`) absentee-owned parcels
    #[arg(long)]
    absentee: Option<bool>,
    /// Only tax-delinquent or vacant parcels
    #[arg(long)]
    distressed: bool,
    /// Minimum motivation score
    #[arg(long)]
    min_score: Option<u8>,
    /// ZIP code
    #[arg(long)]
    zip: Option<String>,
}

impl From<FilterArgs> for ViewportFilter {
    fn from(args: FilterArgs) -> Self {
        Self {
            property_types: args.property_types.into_iter().collect(),
            tags: args.tags.into_iter().collect(),
            min_market_value: args.min_value,
            max_market_value: args.max_value,
            min_acres: args.min_acres,
            max_acres: args.max_acres,
            tax_delinquent: args.tax_delinquent,
            absentee: args.absentee,
            distressed: args.distressed,
            min_score: args.min_score,
            zip: args.zip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = parcel_map_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.chunks.data_dir = dir;
    }

    match cli.command {
        Commands::Build {
            inputs,
            out,
            chunk_size,
        } => {
            let out = out.unwrap_or_else(|| config.chunks.data_dir.clone());
            let chunk_size = chunk_size.unwrap_or(config.chunks.chunk_size);
            if chunk_size == 0 {
                return Err("--chunk-size must be positive".into());
            }
            build(&multi, &config, &inputs, &out, chunk_size)?;
        }
        Commands::Stats => stats(&config)?,
        Commands::Get { id } => {
            let store = ParcelStore::open(&config)?;
            let parcel = find(&store, &id)?;
            println!("{}", serde_json::to_string_pretty(&parcel_to_feature(&parcel))?);
        }
        Commands::Viewport {
            bbox,
            limit,
            filter,
        } => {
            let bbox = parse_bbox(&bbox)?;
            let filter = ViewportFilter::from(filter);
            let store = ParcelStore::open(&config)?;
            let result = store.viewport_filtered(&bbox, limit, &filter)?;

            log::info!(
                "{} parcels from {} chunks ({} failed, {} filtered out) using {} inclusion, limit {}",
                result.parcels.len(),
                result.chunks_scanned,
                result.chunks_failed,
                result.filtered_out,
                result.strategy,
                result.limit
            );

            let collection = FeatureCollection {
                bbox: None,
                features: result.parcels.iter().map(parcel_to_feature).collect(),
                foreign_members: None,
            };
            println!("{}", serde_json::to_string(&collection)?);
        }
        Commands::Enrich { points, limit } => enrich(&multi, &config, &points, limit).await?,
        Commands::Score { id } => {
            let store = ParcelStore::open(&config)?;
            let parcel = find(&store, &id)?;
            print_score(&parcel, &config);
        }
    }

    Ok(())
}

fn find(store: &ParcelStore, id: &str) -> Result<Parcel, Box<dyn std::error::Error>> {
    store
        .get(id)?
        .ok_or_else(|| format!("Parcel {id} not found").into())
}

fn build(
    multi: &MultiProgress,
    config: &Config,
    inputs: &[PathBuf],
    out: &Path,
    chunk_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut builder = ChunkBuilder::new(out, chunk_size);

    let files = IndicatifProgress::files_bar(multi, "Source files", inputs.len() as u64);
    for input in inputs {
        let progress = IndicatifProgress::parcels_bar(multi, &format!("Reading {}", input.display()));
        let report = builder.add_source_file(input, &config.scoring, &progress)?;
        log::info!(
            "{}: {} features, {} added, {} malformed, {} duplicate",
            input.display(),
            report.features,
            report.added,
            report.malformed,
            report.duplicates
        );
        files.inc(1);
    }
    files.finish(format!("Read {} parcels", builder.len()));

    if builder.is_empty() {
        return Err("No usable parcels in the input files".into());
    }

    let report = builder.publish(&IndicatifProgress::batches_bar(multi, "Writing chunks"))?;

    println!(
        "Published {} parcels in {} chunks to {} ({} duplicate, {} malformed) in {:.1}s",
        report.parcels,
        report.chunks,
        out.display(),
        report.duplicates,
        report.malformed,
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

fn stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let dir = &config.chunks.data_dir;
    let index = ChunkIndex::load(dir)?;
    let directory = ParcelDirectory::load_for(&index)?;

    let bounds = index
        .entries()
        .iter()
        .filter_map(|entry| entry.bounds)
        .reduce(|a: BoundingBox, b| a.union(&b));

    println!("Data directory: {}", dir.display());
    println!("Parcels:        {}", index.total_parcels());
    println!("Chunks:         {}", index.total_chunks());
    match index.generation() {
        Some(generation) => println!("Generation:     {generation}"),
        None => println!("Generation:     none (flat layout)"),
    }
    match index.chunk_size() {
        Some(size) => println!("Chunk size:     {size}"),
        None => println!("Chunk size:     unknown"),
    }
    match bounds {
        Some(b) => println!(
            "Bounds:         {:.6},{:.6},{:.6},{:.6}",
            b.west, b.south, b.east, b.north
        ),
        None => println!("Bounds:         unknown"),
    }
    match directory {
        Some(directory) => println!("Directory:      {} parcel ids", directory.len()),
        None => println!("Directory:      missing (lookups scan chunks)"),
    }

    Ok(())
}

async fn enrich(
    multi: &MultiProgress,
    config: &Config,
    points: &Path,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let (index, load_report) = AddressPointIndex::load(points, &config.enrichment.default_state)?;
    if index.is_empty() {
        return Err(format!(
            "No usable address points in {} ({} skipped)",
            points.display(),
            load_report.skipped
        )
        .into());
    }

    // Fails if any published feature does not parse; republishing would
    // otherwise drop it.
    let store = ParcelStore::open(config)?;
    let mut parcels = store.load_all(&IndicatifProgress::parcels_bar(multi, "Loading chunks"))?;
    let chunk_size = store.chunk_size().unwrap_or(config.chunks.chunk_size);

    let pass = EnrichmentPass::new(Arc::new(index), &config.enrichment, config.scoring.clone())
        .with_max_parcels(limit);
    let report = pass
        .run(
            &mut parcels,
            &IndicatifProgress::batches_bar(multi, "Enriching"),
        )
        .await;

    if report.updated > 0 {
        let mut builder = ChunkBuilder::new(&config.chunks.data_dir, chunk_size);
        for parcel in parcels {
            builder.add(parcel)?;
        }
        let published =
            builder.publish(&IndicatifProgress::batches_bar(multi, "Republishing chunks"))?;
        log::info!(
            "Republished {} parcels in {} chunks",
            published.parcels,
            published.chunks
        );
    } else {
        log::info!("No parcels updated; chunk set left as is");
    }

    println!(
        "Enrichment {report} in {:.1}s",
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

fn print_score(parcel: &Parcel, config: &Config) {
    let breakdown = parcel_map_scoring::explain_score(&parcel.attributes, &config.scoring);
    let derived = &parcel.derived;

    println!("Parcel:         {}", parcel.id);
    println!("Property type:  {}", derived.property_type);
    println!("Vacant:         {}", derived.is_vacant);
    println!("Absentee:       {}", derived.is_absentee);
    println!("Tax delinquent: {}", derived.is_tax_delinquent);
    println!("Base score:     {}", breakdown.base);
    for factor in &breakdown.factors {
        println!("  {:+4}  {}", factor.points, factor.tag);
    }
    println!("Score:          {}", breakdown.score);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use parcel_map_chunks::ChunkIndex;
    use serde_json::json;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("parcel_map_cli_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Publishes two point parcels one per chunk and writes a matching
    /// address point file.
    fn published_fixture(name: &str) -> (PathBuf, Config, PathBuf) {
        let dir = scratch_dir(name);
        let source = dir.join("parcels.geojson");
        std::fs::write(
            &source,
            json!({
                "type": "FeatureCollection",
                "features": [
                    {
                        "type": "Feature",
                        "geometry": { "type": "Point", "coordinates": [-97.74, 30.27] },
                        "properties": { "PROP_ID": "1" }
                    },
                    {
                        "type": "Feature",
                        "geometry": { "type": "Point", "coordinates": [-97.70, 30.30] },
                        "properties": { "PROP_ID": "2" }
                    }
                ]
            })
            .to_string(),
        )
        .unwrap();

        let points = dir.join("points.geojson");
        std::fs::write(
            &points,
            json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [-97.7401, 30.2701] },
                    "properties": { "Full_Addr": "1 MAIN ST" }
                }]
            })
            .to_string(),
        )
        .unwrap();

        let mut config = Config::default();
        config.chunks.data_dir = dir.join("data");
        build(
            &MultiProgress::new(),
            &config,
            &[source],
            &config.chunks.data_dir,
            1,
        )
        .unwrap();

        (dir, config, points)
    }

    #[tokio::test]
    async fn enrich_republishes_with_the_published_chunk_size() {
        let (dir, config, points) = published_fixture("enrich_layout");

        enrich(&MultiProgress::new(), &config, &points, None)
            .await
            .unwrap();

        let index = ChunkIndex::load(&config.chunks.data_dir).unwrap();
        assert_eq!(index.generation(), Some(2));
        assert_eq!(index.chunk_size(), Some(1));
        assert_eq!(index.total_chunks(), 2);

        let store = ParcelStore::open(&config).unwrap();
        let site = store.get("1").unwrap().unwrap().attributes.site.unwrap();
        assert_eq!(site.address, "1 MAIN ST");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn enrich_refuses_to_republish_over_malformed_features() {
        let (dir, config, points) = published_fixture("enrich_malformed");

        let before = ChunkIndex::load(&config.chunks.data_dir).unwrap();
        let path = config.chunks.data_dir.join(&before.entries()[0].file);
        let mut body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        body["features"].as_array_mut().unwrap().push(json!({
            "type": "Feature",
            "id": "unparseable",
            "geometry": { "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]] },
            "properties": {}
        }));
        let corrupted = body.to_string();
        std::fs::write(&path, &corrupted).unwrap();

        assert!(
            enrich(&MultiProgress::new(), &config, &points, None)
                .await
                .is_err()
        );

        let after = ChunkIndex::load(&config.chunks.data_dir).unwrap();
        assert_eq!(after.generation(), before.generation());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), corrupted);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn viewport_filter_flags_parse() {
        let cli = Cli::try_parse_from([
            "parcel_map",
            "viewport",
            "--bbox",
            "-97.8,30.2,-97.7,30.3",
            "--type",
            "vacant-land",
            "--tag",
            "large-lot",
            "--tag",
            "absentee-owner",
            "--max-value",
            "50000",
            "--tax-delinquent",
            "true",
            "--distressed",
            "--zip",
            "78701",
        ])
        .unwrap();

        let Commands::Viewport { bbox, limit, filter } = cli.command else {
            panic!("expected the viewport command");
        };
        assert_eq!(bbox, "-97.8,30.2,-97.7,30.3");
        assert_eq!(limit, None);

        let filter = ViewportFilter::from(filter);
        assert_eq!(filter.property_types, BTreeSet::from([PropertyType::VacantLand]));
        assert_eq!(
            filter.tags,
            BTreeSet::from([OpportunityTag::LargeLot, OpportunityTag::AbsenteeOwner])
        );
        assert_eq!(filter.max_market_value, Some(50_000.0));
        assert_eq!(filter.min_market_value, None);
        assert_eq!(filter.tax_delinquent, Some(true));
        assert_eq!(filter.absentee, None);
        assert!(filter.distressed);
        assert_eq!(filter.zip.as_deref(), Some("78701"));
    }
}

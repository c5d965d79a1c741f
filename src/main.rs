use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use region_partitioner::{
    config::DEFAULT_PARTS, invalidate, open_engine, view, ClusterParams, Crs, EngineConfig, Inputs, PartitionSet,
    RegionId, Selection, SourceOptions,
};
use tracing::info;

fn cli() -> Command {
    Command::new("Region Partitioner")
        .version("1.0")
        .author("Jesper Fjellin")
        .about("Splits each region into spatially compact sub-regions built from its blocks, caching the result per region")
        .arg(
            Arg::new("regions")
                .short('r')
                .long("regions")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("GeoJSON with region (or sub-region) polygons"),
        )
        .arg(
            Arg::new("blocks")
                .short('b')
                .long("blocks")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("GeoJSON with block polygons"),
        )
        .arg(
            Arg::new("region-field")
                .long("region-field")
                .default_value("comuna")
                .help("Property holding the region id; features sharing it are dissolved"),
        )
        .arg(
            Arg::new("source-epsg")
                .long("source-epsg")
                .default_value("4326")
                .value_parser(value_parser!(u32))
                .help("EPSG code of inputs that do not declare a CRS"),
        )
        .arg(
            Arg::new("working-epsg")
                .long("working-epsg")
                .default_value("22185")
                .value_parser(value_parser!(u32))
                .help("Planar EPSG code used for clipping and clustering"),
        )
        .arg(
            Arg::new("simplify")
                .long("simplify")
                .value_parser(value_parser!(f64))
                .help("Topology-preserving block simplification threshold, in squared working units"),
        )
        .arg(
            Arg::new("parts")
                .short('p')
                .long("parts")
                .default_value("6")
                .value_parser(value_parser!(usize))
                .help("Number of sub-regions per region"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .default_value("0")
                .value_parser(value_parser!(u64))
                .help("Clustering seed"),
        )
        .arg(
            Arg::new("max-iterations")
                .long("max-iterations")
                .default_value("300")
                .value_parser(value_parser!(usize))
                .help("Upper bound on clustering iterations"),
        )
        .arg(
            Arg::new("cache-dir")
                .long("cache-dir")
                .default_value("cache")
                .value_parser(value_parser!(PathBuf))
                .help("Directory holding one cached entry per region"),
        )
        .arg(
            Arg::new("region")
                .long("region")
                .conflicts_with("all")
                .help("Region id to partition"),
        )
        .arg(
            Arg::new("all")
                .long("all")
                .action(ArgAction::SetTrue)
                .help("Partition every region"),
        )
        .arg(
            Arg::new("part")
                .long("part")
                .requires("region")
                .help("Only output the partition with this label, e.g. \"7 - Part 3\""),
        )
        .arg(
            Arg::new("rebuild")
                .long("rebuild")
                .action(ArgAction::SetTrue)
                .help("Drop the cached entry first"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(value_parser!(PathBuf))
                .help("Write GeoJSON here instead of stdout"),
        )
}

fn write_output(sets: &[PartitionSet], selection: &Selection, output: Option<&PathBuf>) -> Result<()> {
    let mut features = Vec::new();
    for set in sets {
        features.extend(view::export(set, selection)?.features);
    }
    let collection = geojson::FeatureCollection { bbox: None, features, foreign_members: None };

    match output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &collection)?;
            writer.flush()?;
            info!(path = %path.display(), "wrote partitions");
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, &collection)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();

    let inputs = Inputs {
        regions: matches.get_one::<PathBuf>("regions").cloned().context("--regions is required")?,
        blocks: matches.get_one::<PathBuf>("blocks").cloned().context("--blocks is required")?,
        region_field: matches.get_one::<String>("region-field").cloned().unwrap_or_else(|| "comuna".into()),
        cache_dir: matches.get_one::<PathBuf>("cache-dir").cloned().unwrap_or_else(|| "cache".into()),
    };
    for file in [&inputs.regions, &inputs.blocks] {
        if !file.exists() {
            bail!("File not found: {}", file.display());
        }
    }

    let options = SourceOptions {
        source_crs: Crs::from_epsg(*matches.get_one::<u32>("source-epsg").unwrap_or(&4326))?,
        working_crs: Crs::from_epsg(*matches.get_one::<u32>("working-epsg").unwrap_or(&22185))?,
        simplify_tolerance: matches.get_one::<f64>("simplify").copied(),
    };
    if options.working_crs.is_geographic() {
        bail!("working CRS {} is not planar; clustering needs metric coordinates", options.working_crs);
    }

    let config = EngineConfig {
        n_parts: *matches.get_one::<usize>("parts").unwrap_or(&DEFAULT_PARTS),
        cluster: ClusterParams {
            seed: *matches.get_one::<u64>("seed").unwrap_or(&0),
            max_iterations: *matches.get_one::<usize>("max-iterations").unwrap_or(&300),
            ..ClusterParams::default()
        },
        ..EngineConfig::default()
    };

    let engine = open_engine(&inputs, &options, config).context("failed to load source data")?;
    let output = matches.get_one::<PathBuf>("output");
    let rebuild = matches.get_flag("rebuild");

    if matches.get_flag("all") {
        let mut sets = Vec::new();
        if rebuild {
            for id in engine.snapshot().region_ids() {
                invalidate(&inputs.cache_dir, &id)?;
            }
        }
        for (id, result) in engine.partition_all() {
            sets.push(result.with_context(|| format!("failed to partition region {id}"))?);
        }
        return write_output(&sets, &Selection::All, output);
    }

    let Some(region) = matches.get_one::<String>("region").and_then(|r| RegionId::parse(r)) else {
        println!("Available regions:");
        for id in engine.snapshot().region_ids() {
            println!("  {id}");
        }
        return Ok(());
    };

    if rebuild && invalidate(&inputs.cache_dir, &region)? {
        info!(region = %region, "dropped cached entry");
    }
    let set = engine.partitions(&region).with_context(|| format!("failed to partition region {region}"))?;

    let selection = Selection::from_label(matches.get_one::<String>("part").map(String::as_str));
    if let Selection::Part(label) = &selection {
        if selection.apply(&set.partitions).is_empty() {
            bail!("region {region} has no partition labelled \"{label}\"; available: {:?}", view::labels(&set.partitions));
        }
    }
    info!(region = %region, partitions = set.len(), "partitions ready");
    write_output(&[set], &selection, output)
}

extern crate log;
pub mod geofile;
pub mod osm;
pub mod route;
use crate::geofile::geojson::{
    read_segments_from_geojson_file, sliced_result_to_feature_collections,
    write_feature_collection, write_feature_to_geojson,
};
use crate::osm::conversion::{build_route_feature, read_osm_index_from_files};
use crate::osm::download::sync_osm_relation_to_file;
use crate::route::slicer::SlicerParams;
use crate::route::worker::RouteWorker;
use anyhow::anyhow;
use clap::Parser;
use indicatif::ProgressBar;
use serde::Deserialize;
use std::path::PathBuf;
use std::{fs, fs::read_to_string, path::Path};

/// Stitch a route and cut it into progressively drawn frames.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input config file.
    #[arg(short, long)]
    config_filepath: String,
}

#[derive(Deserialize, Debug)]
enum RouteConfig {
    Geojson {
        filepath: PathBuf,
    },
    OsmExport {
        filepaths: Vec<PathBuf>,
        relation_id: Option<i64>,
    },
    OsmRelation {
        relation_id: i64,
    },
}

fn default_frame_count() -> usize {
    20
}

#[derive(Deserialize, Debug)]
struct Config {
    route: RouteConfig,
    data_dir: PathBuf,
    #[serde(default = "default_frame_count")]
    frame_count: usize,
    #[serde(default)]
    slicer: SlicerParams,
}

/// Extract the route of an OSM relation and keep a GeoJSON copy of it in the data dir.
fn get_route_segments_from_osm(
    filepaths: &[PathBuf],
    relation_id: Option<i64>,
    data_dir: &Path,
) -> anyhow::Result<Option<Vec<geo::Geometry>>> {
    let osm_index = read_osm_index_from_files(filepaths)?;
    let route_feature = build_route_feature(&osm_index, relation_id)?;

    let route_filepath = data_dir.join("route.geojson");
    log::info!("Writing extracted route to {:?}", route_filepath);
    write_feature_to_geojson(&route_feature, &route_filepath)?;
    Ok(Some(vec![route_feature.geometry]))
}

fn try_main() -> anyhow::Result<()> {
    let args = Args::try_parse()?;
    if !Path::new(&args.config_filepath).exists() {
        return Err(anyhow!("Config file {} not found", &args.config_filepath));
    }
    let config_contents = read_to_string(args.config_filepath)?;
    let config: Config = serde_yaml::from_str(&config_contents)?;
    if config.frame_count == 0 {
        return Err(anyhow!("frame_count must be at least 1"));
    }
    fs::create_dir_all(&config.data_dir)?;

    let segments = match &config.route {
        RouteConfig::Geojson { filepath } => read_segments_from_geojson_file(filepath)?,
        RouteConfig::OsmExport {
            filepaths,
            relation_id,
        } => get_route_segments_from_osm(filepaths, *relation_id, &config.data_dir)?,
        RouteConfig::OsmRelation { relation_id } => {
            log::info!("Syncing OSM data for relation {}", relation_id);
            let osm_filepath = sync_osm_relation_to_file(*relation_id, &config.data_dir)?;
            get_route_segments_from_osm(&[osm_filepath], Some(*relation_id), &config.data_dir)?
        }
    };

    let worker = RouteWorker::spawn(config.slicer.clone())?;
    let total_length_km = worker.initialize(segments)?;
    log::info!("Route is {:.3} km long", total_length_km);

    let frames_dir = config.data_dir.join("frames");
    fs::create_dir_all(&frames_dir)?;
    log::info!(
        "Writing {} frames to {:?}",
        config.frame_count + 1,
        frames_dir
    );
    let bar = ProgressBar::new(config.frame_count as u64 + 1);
    for frame in 0..=config.frame_count {
        let progress = frame as f64 / config.frame_count as f64;
        let result = worker.query(progress)?;
        let (line_collection, buffer_collection) = sliced_result_to_feature_collections(&result);
        write_feature_collection(
            line_collection,
            &frames_dir.join(format!("frame_{:04}_line.geojson", frame)),
        )?;
        write_feature_collection(
            buffer_collection,
            &frames_dir.join(format!("frame_{:04}_buffer.geojson", frame)),
        )?;
        bar.inc(1);
    }
    bar.finish();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = try_main() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1)
    }
}

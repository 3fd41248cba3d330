use anyhow::{anyhow, Context};
use std::{
    fs,
    path::{Path, PathBuf},
};

const OVERPASS_INTERPRETER_URL: &str = "https://overpass-api.de/api/interpreter";

pub fn get_filename_for_relation(relation_id: i64) -> String {
    format!("relation_{relation_id}_osm.json")
}

/// Overpass QL for a relation together with its member ways and their nodes.
pub fn relation_query(relation_id: i64) -> String {
    format!("[out:json];relation({relation_id});(._;>;);out;")
}

pub fn download_osm_relation(relation_id: i64) -> anyhow::Result<String> {
    let client = reqwest::blocking::Client::builder()
        .user_agent("route-slicer")
        .build()?;
    let response = client
        .get(OVERPASS_INTERPRETER_URL)
        .query(&[("data", relation_query(relation_id))])
        .send()?
        .error_for_status()?;
    response.text().or(Err(anyhow!("No response text")))
}

/// Make sure the OSM export of a relation exists in `output_dir`, downloading it if needed.
pub fn sync_osm_relation_to_file(relation_id: i64, output_dir: &Path) -> anyhow::Result<PathBuf> {
    let output_filepath = output_dir.join(get_filename_for_relation(relation_id));
    if output_filepath.exists() {
        log::info!(
            "Local file exists for OSM relation {}: {:?}",
            relation_id,
            output_filepath.canonicalize()
        );
        return Ok(output_filepath);
    }

    log::info!("Downloading OSM relation {}", relation_id);
    let osm_data = download_osm_relation(relation_id)?;
    fs::create_dir_all(output_dir)?;
    fs::write(&output_filepath, osm_data)
        .with_context(|| format!("Could not write OSM data to {:?}", output_filepath))?;
    Ok(output_filepath)
}

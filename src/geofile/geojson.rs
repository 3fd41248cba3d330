use std::{fs, path::Path};

use anyhow::{anyhow, Context};
use geo::{Coord, LineString, MultiLineString, MultiPolygon};

use crate::route::slicer::SlicedResult;

use super::feature::Feature;

fn position_to_coord(position: &[f64]) -> anyhow::Result<Coord> {
    match position {
        [x, y, ..] => Ok(Coord { x: *x, y: *y }),
        _ => Err(anyhow!("Position {:?} has less than two values", position)),
    }
}

fn positions_to_line(positions: &[geojson::Position]) -> anyhow::Result<LineString> {
    positions
        .iter()
        .map(|position| position_to_coord(position))
        .collect::<anyhow::Result<Vec<Coord>>>()
        .map(LineString::new)
}

/// Convert line geometries, None for any other kind of geometry.
fn line_geometry(value: &geojson::Value) -> anyhow::Result<Option<geo::Geometry>> {
    let geometry = match value {
        geojson::Value::LineString(positions) => {
            geo::Geometry::LineString(positions_to_line(positions)?)
        }
        geojson::Value::MultiLineString(lines) => {
            let lines = lines
                .iter()
                .map(|positions| positions_to_line(positions))
                .collect::<anyhow::Result<Vec<LineString>>>()?;
            geo::Geometry::MultiLineString(MultiLineString::new(lines))
        }
        geojson::Value::GeometryCollection(geometries) => {
            let mut lines = Vec::new();
            for geometry in geometries {
                if let Some(line) = line_geometry(&geometry.value)? {
                    lines.push(line);
                }
            }
            geo::Geometry::GeometryCollection(geo::GeometryCollection(lines))
        }
        _ => return Ok(None),
    };
    Ok(Some(geometry))
}

/// Read route segments from GeoJSON text: a FeatureCollection, a single Feature or a bare Geometry.
///
/// Only LineString and MultiLineString geometries (also inside GeometryCollections) are kept.
/// A `null` document means there are no segments at all and gives None, which is different from
/// an empty FeatureCollection.
pub fn read_segments_from_geojson_str(contents: &str) -> anyhow::Result<Option<Vec<geo::Geometry>>> {
    let value: serde_json::Value = serde_json::from_str(contents)?;
    if value.is_null() {
        return Ok(None);
    }

    let geometries: Vec<Option<geojson::Geometry>> =
        match geojson::GeoJson::from_json_value(value)? {
            geojson::GeoJson::FeatureCollection(collection) => collection
                .features
                .into_iter()
                .map(|feature| feature.geometry)
                .collect(),
            geojson::GeoJson::Feature(feature) => vec![feature.geometry],
            geojson::GeoJson::Geometry(geometry) => vec![Some(geometry)],
        };

    let num_features = geometries.len();
    let mut segments = Vec::new();
    for geometry in geometries.iter().flatten() {
        if let Some(segment) = line_geometry(&geometry.value)? {
            segments.push(segment);
        }
    }
    if segments.len() != num_features {
        log::warn!(
            "Out of {} features read, only {} were lines.",
            num_features,
            segments.len()
        )
    }
    Ok(Some(segments))
}

pub fn read_segments_from_geojson_file(
    filepath: &Path,
) -> anyhow::Result<Option<Vec<geo::Geometry>>> {
    let contents = fs::read_to_string(filepath)
        .with_context(|| format!("Reading GeoJSON file {:?}", filepath))?;
    read_segments_from_geojson_str(&contents)
}

pub fn lines_to_feature_collection(lines: &MultiLineString) -> geojson::FeatureCollection {
    lines
        .0
        .iter()
        .map(|line| geojson::Feature::from(geojson::Geometry::new(geojson::Value::from(line))))
        .collect()
}

pub fn polygons_to_feature_collection(polygons: &MultiPolygon) -> geojson::FeatureCollection {
    polygons
        .0
        .iter()
        .map(|polygon| {
            geojson::Feature::from(geojson::Geometry::new(geojson::Value::from(polygon)))
        })
        .collect()
}

/// The line and buffer collections of a slice, ready to replace the contents of the 2D line
/// and 3D buffer sources of a map.
pub fn sliced_result_to_feature_collections(
    result: &SlicedResult,
) -> (geojson::FeatureCollection, geojson::FeatureCollection) {
    (
        lines_to_feature_collection(&result.line),
        polygons_to_feature_collection(&result.buffer),
    )
}

pub fn write_feature_collection(
    feature_collection: geojson::FeatureCollection,
    output_filepath: &Path,
) -> anyhow::Result<()> {
    let geojson_contents = geojson::GeoJson::from(feature_collection);
    fs::write(output_filepath, geojson_contents.to_string())
        .with_context(|| format!("Writing GeoJSON to {:?}", output_filepath))
}

pub fn write_feature_to_geojson(feature: &Feature, output_filepath: &Path) -> anyhow::Result<()> {
    let geojson_contents = geojson::GeoJson::from(geojson::Feature::from(feature));
    fs::write(output_filepath, geojson_contents.to_string())
        .with_context(|| format!("Writing GeoJSON to {:?}", output_filepath))
}

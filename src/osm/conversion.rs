use anyhow::{anyhow, Context};
use geo::{Coord, LineString, MultiLineString};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::geofile::feature::Feature;

/// Element of an Overpass JSON export.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OsmElement {
    Node {
        id: i64,
        lat: Option<f64>,
        lon: Option<f64>,
    },
    Way {
        id: i64,
        nodes: Option<Vec<i64>>,
    },
    Relation {
        id: i64,
        #[serde(default)]
        members: Vec<OsmMember>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct OsmMember {
    #[serde(rename = "type")]
    member_type: String,
    #[serde(rename = "ref")]
    reference: i64,
}

/// Overpass exports are either a plain array of elements or a full response object.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum OsmJsonExport {
    Elements(Vec<OsmElement>),
    Response { elements: Vec<OsmElement> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OsmRelation {
    pub id: i64,
    /// Ids of the way members, in member order.
    pub way_ids: Vec<i64>,
    pub tags: HashMap<String, String>,
}

/// Node coordinates, way node lists and relations of an OSM export.
#[derive(Debug, Default)]
pub struct OsmIndex {
    nodes: HashMap<i64, Coord>,
    ways: HashMap<i64, Vec<i64>>,
    relations: Vec<OsmRelation>,
}

impl OsmIndex {
    fn add_elements(&mut self, elements: Vec<OsmElement>) {
        for element in elements {
            match element {
                OsmElement::Node {
                    id,
                    lat: Some(lat),
                    lon: Some(lon),
                } => {
                    self.nodes.insert(id, Coord { x: lon, y: lat });
                }
                // Ways without node refs are only stubs of a relation export.
                OsmElement::Way {
                    id,
                    nodes: Some(nodes),
                } => {
                    self.ways.insert(id, nodes);
                }
                OsmElement::Relation { id, members, tags } => {
                    let way_ids = members
                        .into_iter()
                        .filter(|member| member.member_type == "way")
                        .map(|member| member.reference)
                        .collect();
                    self.relations.push(OsmRelation { id, way_ids, tags });
                }
                _ => {}
            }
        }
    }

    /// Add the nodes, ways and relations of an OSM XML document. Element order is kept, so the
    /// last relation of the file is also the last one here.
    fn add_osm_xml(&mut self, contents: &str) -> anyhow::Result<()> {
        let document = roxmltree::Document::parse(contents)?;
        for element in document.descendants().filter(|node| node.is_element()) {
            match element.tag_name().name() {
                "node" => {
                    let coord = Coord {
                        x: parse_attribute(&element, "lon")?,
                        y: parse_attribute(&element, "lat")?,
                    };
                    self.nodes.insert(parse_attribute(&element, "id")?, coord);
                }
                "way" => {
                    let node_ids = element
                        .children()
                        .filter(|child| child.tag_name().name() == "nd")
                        .map(|child| parse_attribute(&child, "ref"))
                        .collect::<anyhow::Result<Vec<i64>>>()?;
                    self.ways.insert(parse_attribute(&element, "id")?, node_ids);
                }
                "relation" => {
                    let mut way_ids = Vec::new();
                    let mut tags = HashMap::new();
                    for child in element.children() {
                        match child.tag_name().name() {
                            "member" if child.attribute("type") == Some("way") => {
                                way_ids.push(parse_attribute(&child, "ref")?)
                            }
                            "tag" => {
                                if let (Some(key), Some(value)) =
                                    (child.attribute("k"), child.attribute("v"))
                                {
                                    tags.insert(key.to_string(), value.to_string());
                                }
                            }
                            _ => {}
                        }
                    }
                    self.relations.push(OsmRelation {
                        id: parse_attribute(&element, "id")?,
                        way_ids,
                        tags,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn relations(&self) -> &Vec<OsmRelation> {
        &self.relations
    }
}

fn parse_attribute<T>(element: &roxmltree::Node, name: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = element.attribute(name).ok_or_else(|| {
        anyhow!(
            "<{}> element without {} attribute",
            element.tag_name().name(),
            name
        )
    })?;
    Ok(value.parse()?)
}

pub fn parse_osm_json(contents: &str) -> anyhow::Result<OsmIndex> {
    let mut index = OsmIndex::default();
    match serde_json::from_str::<OsmJsonExport>(contents)? {
        OsmJsonExport::Elements(elements) | OsmJsonExport::Response { elements } => {
            index.add_elements(elements)
        }
    }
    Ok(index)
}

fn is_xml_file(filepath: &Path) -> bool {
    matches!(
        filepath.extension().and_then(|extension| extension.to_str()),
        Some("osm") | Some("xml")
    )
}

/// Read and merge OSM export files in the given order. Files ending in `.osm` or `.xml` are read
/// as OSM XML, all others as Overpass JSON.
pub fn read_osm_index_from_files(filepaths: &[PathBuf]) -> anyhow::Result<OsmIndex> {
    let mut index = OsmIndex::default();
    for filepath in filepaths {
        let contents = fs::read_to_string(filepath)
            .with_context(|| format!("Reading OSM file {:?}", filepath))?;
        if is_xml_file(filepath) {
            index
                .add_osm_xml(&contents)
                .with_context(|| format!("Parsing OSM XML {:?}", filepath))?;
        } else {
            let file_index = parse_osm_json(&contents)
                .with_context(|| format!("Parsing OSM JSON {:?}", filepath))?;
            index.nodes.extend(file_index.nodes);
            index.ways.extend(file_index.ways);
            index.relations.extend(file_index.relations);
        }
    }
    log::info!(
        "Read {} nodes, {} ways and {} relations",
        index.nodes.len(),
        index.ways.len(),
        index.relations.len()
    );
    Ok(index)
}

/// Build the route of a relation as one MultiLineString feature, one line per way member.
///
/// Uses the relation with `relation_id`, or the last relation read if no id is given. Ways keep
/// the member order and their own direction. Nodes missing from the export are left out and ways
/// with less than two known nodes are dropped.
pub fn build_route_feature(index: &OsmIndex, relation_id: Option<i64>) -> anyhow::Result<Feature> {
    let relation = match relation_id {
        Some(relation_id) => index
            .relations()
            .iter()
            .find(|relation| relation.id == relation_id)
            .ok_or_else(|| anyhow!("Relation {} not found in OSM data", relation_id))?,
        None => index
            .relations()
            .last()
            .ok_or_else(|| anyhow!("No relation found in OSM data"))?,
    };

    let mut lines = Vec::new();
    for way_id in &relation.way_ids {
        match index.ways.get(way_id) {
            Some(node_ids) => {
                let coords: Vec<Coord> = node_ids
                    .iter()
                    .filter_map(|node_id| index.nodes.get(node_id).copied())
                    .collect();
                if coords.len() > 1 {
                    lines.push(LineString::new(coords));
                }
            }
            None => log::warn!(
                "Way {} is a member of relation {} but is not defined in the OSM data",
                way_id,
                relation.id
            ),
        }
    }
    log::info!(
        "Built route of relation {} from {} of {} way members",
        relation.id,
        lines.len(),
        relation.way_ids.len()
    );

    let mut attributes = HashMap::new();
    if let Some(name) = relation.tags.get("name") {
        attributes.insert("name".to_string(), name.clone());
    }
    if let Some(colour) = relation.tags.get("colour") {
        attributes.insert("color".to_string(), colour.clone());
    }
    Ok(Feature {
        geometry: geo::Geometry::MultiLineString(MultiLineString::new(lines)),
        attributes: Some(attributes),
    })
}
